//! Batch work queue over the `batch_status` table.
//!
//! An absent row is pending. Selection re-queues completed keys whose band
//! set has dropped below the full cutoff count, and `processing` rows whose
//! `started_at` has aged past the stale horizon (crash recovery).

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::{Array, BigInt, Double, Integer, Nullable, Text, Time};
use diesel_async::RunQueryDsl;

use crate::models::{BatchState, CacheKey, Intersection};
use crate::schema::batch_status;

use super::pool::{AsyncPgPool, DieselError};

/// Selection predicate shared by `get_pending` and `pending_count`.
///
/// An origin is selectable when its region is prioritised and either no
/// status row exists, or the row is pending/completed with fewer than the
/// required band rows, or the row is processing but stale.
const PENDING_WHERE: &str = r#"
    i.borough = ANY($4)
    AND (
        bs.status IS NULL
        OR (bs.status IN ('pending', 'completed') AND (
            SELECT COUNT(*) FROM isochrone_bands b
            WHERE b.origin_id = i.id AND b.mode = $1
              AND b.departure_time = $2 AND b.day_type = $3
        ) < $6)
        OR (bs.status = 'processing'
            AND bs.started_at < NOW() - ($5 * INTERVAL '1 second'))
    )
"#;

/// Full selection statement. Ordering is by the priority rank of the
/// region-tag array, ties broken by origin id, so each batch makes visible
/// progress in the densest areas first and the order stays stable for
/// worker affinity.
fn pending_select_sql() -> String {
    format!(
        r#"
        SELECT i.id, i.osm_node_id, i.name, i.lat, i.lng,
               i.borough, i.sample_group
        FROM intersections i
        LEFT JOIN batch_status bs
            ON bs.intersection_id = i.id AND bs.mode = $1
           AND bs.departure_time = $2 AND bs.day_type = $3
        WHERE {}
        ORDER BY array_position($4, i.borough), i.id
        LIMIT $7
        "#,
        PENDING_WHERE
    )
}

fn pending_count_sql() -> String {
    format!(
        r#"
        SELECT COUNT(*) AS count
        FROM intersections i
        LEFT JOIN batch_status bs
            ON bs.intersection_id = i.id AND bs.mode = $1
           AND bs.departure_time = $2 AND bs.day_type = $3
        WHERE {}
        "#,
        PENDING_WHERE
    )
}

#[derive(diesel::QueryableByName)]
struct OriginRow {
    #[diesel(sql_type = Integer)]
    id: i32,
    #[diesel(sql_type = BigInt)]
    osm_node_id: i64,
    #[diesel(sql_type = Nullable<Text>)]
    name: Option<String>,
    #[diesel(sql_type = Double)]
    lat: f64,
    #[diesel(sql_type = Double)]
    lng: f64,
    #[diesel(sql_type = Text)]
    borough: String,
    #[diesel(sql_type = Integer)]
    sample_group: i32,
}

impl From<OriginRow> for Intersection {
    fn from(row: OriginRow) -> Self {
        Intersection {
            id: row.id,
            osm_node_id: row.osm_node_id,
            name: row.name,
            lat: row.lat,
            lng: row.lng,
            borough: row.borough,
            sample_group: row.sample_group,
        }
    }
}

#[derive(diesel::QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

/// Parameters of one pending-origin selection.
#[derive(Debug, Clone)]
pub struct PendingQuery {
    /// Region tags eligible for batching, highest priority first.
    pub priority_regions: Vec<String>,
    /// Band rows required for a key to count as complete.
    pub required_bands: usize,
    /// Age in seconds after which a processing row is selectable again.
    pub stale_secs: i64,
}

/// Repository for batch-status rows and pending-origin selection.
#[derive(Clone)]
pub struct BatchQueueRepository {
    pool: AsyncPgPool,
}

impl BatchQueueRepository {
    pub fn new(pool: AsyncPgPool) -> Self {
        Self { pool }
    }

    /// Up to `limit` pending origins for a cache key, ordered by region
    /// priority then origin id. The ordering is stable so repeated batches
    /// assign each origin to the same worker lane.
    pub async fn get_pending(
        &self,
        key: &CacheKey,
        query: &PendingQuery,
        limit: i64,
    ) -> Result<Vec<Intersection>, DieselError> {
        let mut conn = self.pool.get().await?;

        let rows: Vec<OriginRow> = sql_query(pending_select_sql())
            .bind::<Text, _>(key.mode.as_str())
            .bind::<Time, _>(key.departure)
            .bind::<Text, _>(key.day_type.as_str())
            .bind::<Array<Text>, _>(&query.priority_regions)
            .bind::<BigInt, _>(query.stale_secs)
            .bind::<BigInt, _>(query.required_bands as i64)
            .bind::<BigInt, _>(limit)
            .load(&mut conn)
            .await?;

        Ok(rows.into_iter().map(Intersection::from).collect())
    }

    /// How many origins the selection predicate currently matches.
    pub async fn pending_count(
        &self,
        key: &CacheKey,
        query: &PendingQuery,
    ) -> Result<i64, DieselError> {
        let mut conn = self.pool.get().await?;

        let rows: Vec<CountRow> = sql_query(pending_count_sql())
            .bind::<Text, _>(key.mode.as_str())
            .bind::<Time, _>(key.departure)
            .bind::<Text, _>(key.day_type.as_str())
            .bind::<Array<Text>, _>(&query.priority_regions)
            .bind::<BigInt, _>(query.stale_secs)
            .bind::<BigInt, _>(query.required_bands as i64)
            .load(&mut conn)
            .await?;

        Ok(rows.get(0).map(|r| r.count).unwrap_or(0))
    }

    /// Move an origin to `processing`, stamping `started_at`.
    pub async fn mark_processing(
        &self,
        origin_id: i32,
        key: &CacheKey,
    ) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now();

        diesel::insert_into(batch_status::table)
            .values((
                batch_status::intersection_id.eq(origin_id),
                batch_status::mode.eq(key.mode.as_str()),
                batch_status::departure_time.eq(key.departure),
                batch_status::day_type.eq(key.day_type.as_str()),
                batch_status::status.eq(BatchState::Processing.as_str()),
                batch_status::started_at.eq(Some(now)),
            ))
            .on_conflict((
                batch_status::intersection_id,
                batch_status::mode,
                batch_status::departure_time,
                batch_status::day_type,
            ))
            .do_update()
            .set((
                batch_status::status.eq(BatchState::Processing.as_str()),
                batch_status::started_at.eq(Some(now)),
                batch_status::completed_at.eq(None::<DateTime<Utc>>),
                batch_status::error_message.eq(None::<String>),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Move an origin to `completed`, stamping `completed_at`.
    pub async fn mark_completed(
        &self,
        origin_id: i32,
        key: &CacheKey,
    ) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now();

        diesel::insert_into(batch_status::table)
            .values((
                batch_status::intersection_id.eq(origin_id),
                batch_status::mode.eq(key.mode.as_str()),
                batch_status::departure_time.eq(key.departure),
                batch_status::day_type.eq(key.day_type.as_str()),
                batch_status::status.eq(BatchState::Completed.as_str()),
                batch_status::completed_at.eq(Some(now)),
            ))
            .on_conflict((
                batch_status::intersection_id,
                batch_status::mode,
                batch_status::departure_time,
                batch_status::day_type,
            ))
            .do_update()
            .set((
                batch_status::status.eq(BatchState::Completed.as_str()),
                batch_status::completed_at.eq(Some(now)),
                batch_status::error_message.eq(None::<String>),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Move an origin to `failed` with its error message.
    pub async fn mark_failed(
        &self,
        origin_id: i32,
        key: &CacheKey,
        error: &str,
    ) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now();

        diesel::insert_into(batch_status::table)
            .values((
                batch_status::intersection_id.eq(origin_id),
                batch_status::mode.eq(key.mode.as_str()),
                batch_status::departure_time.eq(key.departure),
                batch_status::day_type.eq(key.day_type.as_str()),
                batch_status::status.eq(BatchState::Failed.as_str()),
                batch_status::completed_at.eq(Some(now)),
                batch_status::error_message.eq(Some(error)),
            ))
            .on_conflict((
                batch_status::intersection_id,
                batch_status::mode,
                batch_status::departure_time,
                batch_status::day_type,
            ))
            .do_update()
            .set((
                batch_status::status.eq(BatchState::Failed.as_str()),
                batch_status::completed_at.eq(Some(now)),
                batch_status::error_message.eq(Some(error)),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Operator action: move all failed rows for a key back to pending.
    pub async fn reset_failed(&self, key: &CacheKey) -> Result<usize, DieselError> {
        let mut conn = self.pool.get().await?;

        diesel::update(
            batch_status::table
                .filter(batch_status::mode.eq(key.mode.as_str()))
                .filter(batch_status::departure_time.eq(key.departure))
                .filter(batch_status::day_type.eq(key.day_type.as_str()))
                .filter(batch_status::status.eq(BatchState::Failed.as_str())),
        )
        .set((
            batch_status::status.eq(BatchState::Pending.as_str()),
            batch_status::error_message.eq(None::<String>),
        ))
        .execute(&mut conn)
        .await
    }

    /// Per-status row counters for a cache key.
    pub async fn status_counts(&self, key: &CacheKey) -> Result<Vec<(String, i64)>, DieselError> {
        let mut conn = self.pool.get().await?;

        batch_status::table
            .filter(batch_status::mode.eq(key.mode.as_str()))
            .filter(batch_status::departure_time.eq(key.departure))
            .filter(batch_status::day_type.eq(key.day_type.as_str()))
            .group_by(batch_status::status)
            .select((batch_status::status, diesel::dsl::count_star()))
            .load::<(String, i64)>(&mut conn)
            .await
    }

    /// Failed rows with their error messages, for the status report.
    pub async fn recent_failures(
        &self,
        key: &CacheKey,
        limit: i64,
    ) -> Result<Vec<(i32, Option<String>)>, DieselError> {
        let mut conn = self.pool.get().await?;

        batch_status::table
            .filter(batch_status::mode.eq(key.mode.as_str()))
            .filter(batch_status::departure_time.eq(key.departure))
            .filter(batch_status::day_type.eq(key.day_type.as_str()))
            .filter(batch_status::status.eq(BatchState::Failed.as_str()))
            .order(batch_status::intersection_id.asc())
            .limit(limit)
            .select((batch_status::intersection_id, batch_status::error_message))
            .load::<(i32, Option<String>)>(&mut conn)
            .await
    }

    /// Origins whose band set is complete for a cache key.
    pub async fn cached_origin_count(
        &self,
        key: &CacheKey,
        required_bands: usize,
    ) -> Result<i64, DieselError> {
        let mut conn = self.pool.get().await?;

        let rows: Vec<CountRow> = sql_query(
            r#"
            SELECT COUNT(*) AS count FROM (
                SELECT origin_id FROM isochrone_bands
                WHERE mode = $1 AND departure_time = $2 AND day_type = $3
                GROUP BY origin_id
                HAVING COUNT(*) >= $4
            ) fully_cached
            "#,
        )
        .bind::<Text, _>(key.mode.as_str())
        .bind::<Time, _>(key.departure)
        .bind::<Text, _>(key.day_type.as_str())
        .bind::<BigInt, _>(required_bands as i64)
        .load(&mut conn)
        .await?;

        Ok(rows.get(0).map(|r| r.count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PRIORITY_REGIONS;

    #[test]
    fn selection_orders_by_region_priority_then_id() {
        // Manhattan outranks every other region regardless of origin id.
        assert_eq!(PRIORITY_REGIONS[0], "Manhattan");
        assert_eq!(
            PRIORITY_REGIONS,
            ["Manhattan", "Brooklyn", "Queens", "Bronx", "Staten Island"]
        );
        let sql = pending_select_sql();
        assert!(sql.contains("ORDER BY array_position($4, i.borough), i.id"));
        assert!(sql.contains("LIMIT $7"));
        assert!(pending_count_sql().contains("COUNT(*)"));
    }

    #[test]
    fn selection_predicate_covers_requeue_and_stale_recovery() {
        // Absent row, short completed band set, and stale processing rows
        // must all be selectable; failed rows must not be.
        assert!(PENDING_WHERE.contains("bs.status IS NULL"));
        assert!(PENDING_WHERE.contains("IN ('pending', 'completed')"));
        assert!(PENDING_WHERE.contains("< $6"));
        assert!(PENDING_WHERE.contains("'processing'"));
        assert!(PENDING_WHERE.contains("INTERVAL '1 second'"));
        assert!(!PENDING_WHERE.contains("'failed'"));
    }
}
