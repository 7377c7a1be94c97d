//! Intersection origin reads and ingest upserts.

use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::{BigInt, Bool, Double, Integer, Nullable, Text, Time};
use diesel_async::RunQueryDsl;

use crate::models::{Bbox, CacheKey, Intersection};
use crate::schema::intersections;

use super::pool::{AsyncPgPool, DieselError};

/// An origin with its cached-state flag for the viewport listing.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ViewportIntersection {
    #[serde(flatten)]
    pub intersection: Intersection,
    pub is_computed: bool,
}

/// A new origin to ingest. `sample_group` is derived from the OSM node id
/// so re-ingest is stable.
#[derive(Debug, Clone)]
pub struct NewIntersection {
    pub osm_node_id: i64,
    pub name: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub borough: String,
}

impl NewIntersection {
    pub fn sample_group(&self) -> i32 {
        (self.osm_node_id.rem_euclid(4)) as i32
    }
}

#[derive(diesel::QueryableByName)]
struct ViewportRow {
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
    #[diesel(sql_type = Bool)]
    is_computed: bool,
}

/// Repository for the `intersections` table.
#[derive(Clone)]
pub struct IntersectionRepository {
    pool: AsyncPgPool,
}

impl IntersectionRepository {
    pub fn new(pool: AsyncPgPool) -> Self {
        Self { pool }
    }

    /// Origins inside a bounding box, flagged `is_computed` when a
    /// 30-minute band row exists under the cache key. `sample_group`
    /// filters to a quarter of the origins for sparse rendering.
    pub async fn in_viewport(
        &self,
        bbox: &Bbox,
        limit: i64,
        key: &CacheKey,
        sample_group: Option<i32>,
    ) -> Result<Vec<ViewportIntersection>, DieselError> {
        let mut conn = self.pool.get().await?;

        let rows: Vec<ViewportRow> = sql_query(
            r#"
            SELECT i.id, i.osm_node_id, i.name, i.lat, i.lng,
                   i.borough, i.sample_group,
                   EXISTS (
                       SELECT 1 FROM isochrone_bands b
                       WHERE b.origin_id = i.id AND b.mode = $5
                         AND b.departure_time = $6 AND b.day_type = $7
                         AND b.cutoff_minutes = 30
                   ) AS is_computed
            FROM intersections i
            WHERE i.lat BETWEEN $1 AND $2
              AND i.lng BETWEEN $3 AND $4
              AND ($8 IS NULL OR i.sample_group = $8)
            ORDER BY i.id
            LIMIT $9
            "#,
        )
        .bind::<Double, _>(bbox.min_lat)
        .bind::<Double, _>(bbox.max_lat)
        .bind::<Double, _>(bbox.min_lng)
        .bind::<Double, _>(bbox.max_lng)
        .bind::<Text, _>(key.mode.as_str())
        .bind::<Time, _>(key.departure)
        .bind::<Text, _>(key.day_type.as_str())
        .bind::<Nullable<Integer>, _>(sample_group)
        .bind::<BigInt, _>(limit)
        .load(&mut conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ViewportIntersection {
                intersection: Intersection {
                    id: row.id,
                    osm_node_id: row.osm_node_id,
                    name: row.name,
                    lat: row.lat,
                    lng: row.lng,
                    borough: row.borough,
                    sample_group: row.sample_group,
                },
                is_computed: row.is_computed,
            })
            .collect())
    }

    /// Total origin count.
    pub async fn count(&self) -> Result<i64, DieselError> {
        let mut conn = self.pool.get().await?;
        intersections::table.count().get_result(&mut conn).await
    }

    /// Upsert one origin keyed by OSM node id. The geometry point is
    /// derived from lat/lng inside the statement.
    pub async fn upsert(&self, origin: &NewIntersection) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        sql_query(
            r#"
            INSERT INTO intersections
                (osm_node_id, name, lat, lng, borough, sample_group, geom)
            VALUES ($1, $2, $3, $4, $5, $6,
                    ST_SetSRID(ST_MakePoint($4, $3), 4326)::geography)
            ON CONFLICT (osm_node_id) DO UPDATE SET
                name = EXCLUDED.name,
                lat = EXCLUDED.lat,
                lng = EXCLUDED.lng,
                borough = EXCLUDED.borough,
                sample_group = EXCLUDED.sample_group,
                geom = EXCLUDED.geom
            "#,
        )
        .bind::<BigInt, _>(origin.osm_node_id)
        .bind::<Nullable<Text>, _>(origin.name.as_deref())
        .bind::<Double, _>(origin.lat)
        .bind::<Double, _>(origin.lng)
        .bind::<Text, _>(&origin.borough)
        .bind::<Integer, _>(origin.sample_group())
        .execute(&mut conn)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_group_is_stable_and_in_range() {
        for node_id in [0i64, 1, 2, 3, 4, 7, 1_000_003, -5] {
            let origin = NewIntersection {
                osm_node_id: node_id,
                name: None,
                lat: 40.7,
                lng: -74.0,
                borough: "Manhattan".to_string(),
            };
            let group = origin.sample_group();
            assert!((0..4).contains(&group), "group {} out of range", group);
            assert_eq!(group, origin.sample_group());
        }
    }
}
