//! Transit stop reads and ingest upserts. Stops are independent of the
//! isochrone cache and served raw by the query layer.

use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::{BigInt, Double, Text};
use diesel_async::RunQueryDsl;

use crate::models::{Bbox, TransitStop};
use crate::schema::transit_stops;

use super::pool::{AsyncPgPool, DieselError};

/// A new stop to ingest, as read from a GTFS stops.txt.
#[derive(Debug, Clone)]
pub struct NewTransitStop {
    /// Agency-qualified stop id (`<agency>_<stop_id>`); raw GTFS ids are
    /// only unique within a single feed.
    pub gtfs_stop_id: String,
    pub stop_name: String,
    pub lat: f64,
    pub lng: f64,
    pub stop_type: String,
    pub agency: String,
}

#[derive(Queryable)]
struct StopRecord {
    id: i32,
    gtfs_stop_id: String,
    stop_name: String,
    lat: f64,
    lng: f64,
    stop_type: String,
    agency: String,
}

impl From<StopRecord> for TransitStop {
    fn from(record: StopRecord) -> Self {
        TransitStop {
            id: record.id,
            gtfs_stop_id: record.gtfs_stop_id,
            stop_name: record.stop_name,
            lat: record.lat,
            lng: record.lng,
            stop_type: record.stop_type,
            agency: record.agency,
        }
    }
}

#[derive(diesel::QueryableByName)]
struct StopRow {
    #[diesel(sql_type = diesel::sql_types::Integer)]
    id: i32,
    #[diesel(sql_type = Text)]
    gtfs_stop_id: String,
    #[diesel(sql_type = Text)]
    stop_name: String,
    #[diesel(sql_type = Double)]
    lat: f64,
    #[diesel(sql_type = Double)]
    lng: f64,
    #[diesel(sql_type = Text)]
    stop_type: String,
    #[diesel(sql_type = Text)]
    agency: String,
}

/// Repository for the `transit_stops` table.
#[derive(Clone)]
pub struct TransitStopRepository {
    pool: AsyncPgPool,
}

impl TransitStopRepository {
    pub fn new(pool: AsyncPgPool) -> Self {
        Self { pool }
    }

    /// Stops inside a bounding box.
    pub async fn in_viewport(
        &self,
        bbox: &Bbox,
        limit: i64,
    ) -> Result<Vec<TransitStop>, DieselError> {
        let mut conn = self.pool.get().await?;

        let records: Vec<StopRecord> = transit_stops::table
            .filter(transit_stops::lat.between(bbox.min_lat, bbox.max_lat))
            .filter(transit_stops::lng.between(bbox.min_lng, bbox.max_lng))
            .order(transit_stops::id.asc())
            .limit(limit)
            .load(&mut conn)
            .await?;

        Ok(records.into_iter().map(TransitStop::from).collect())
    }

    /// Stops within `radius_m` metres of a point, nearest first.
    pub async fn nearby(
        &self,
        lat: f64,
        lng: f64,
        radius_m: f64,
        limit: i64,
    ) -> Result<Vec<TransitStop>, DieselError> {
        let mut conn = self.pool.get().await?;

        let rows: Vec<StopRow> = sql_query(
            r#"
            SELECT id, gtfs_stop_id, stop_name, lat, lng, stop_type, agency
            FROM transit_stops
            WHERE ST_DWithin(geom, ST_SetSRID(ST_MakePoint($2, $1), 4326)::geography, $3)
            ORDER BY geom <-> ST_SetSRID(ST_MakePoint($2, $1), 4326)::geography
            LIMIT $4
            "#,
        )
        .bind::<Double, _>(lat)
        .bind::<Double, _>(lng)
        .bind::<Double, _>(radius_m)
        .bind::<BigInt, _>(limit)
        .load(&mut conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| TransitStop {
                id: row.id,
                gtfs_stop_id: row.gtfs_stop_id,
                stop_name: row.stop_name,
                lat: row.lat,
                lng: row.lng,
                stop_type: row.stop_type,
                agency: row.agency,
            })
            .collect())
    }

    /// Upsert one stop keyed by its agency-qualified GTFS stop id.
    pub async fn upsert(&self, stop: &NewTransitStop) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        sql_query(
            r#"
            INSERT INTO transit_stops
                (gtfs_stop_id, stop_name, lat, lng, stop_type, agency, geom)
            VALUES ($1, $2, $3, $4, $5, $6,
                    ST_SetSRID(ST_MakePoint($4, $3), 4326)::geography)
            ON CONFLICT (gtfs_stop_id) DO UPDATE SET
                stop_name = EXCLUDED.stop_name,
                lat = EXCLUDED.lat,
                lng = EXCLUDED.lng,
                stop_type = EXCLUDED.stop_type,
                agency = EXCLUDED.agency,
                geom = EXCLUDED.geom
            "#,
        )
        .bind::<Text, _>(&stop.gtfs_stop_id)
        .bind::<Text, _>(&stop.stop_name)
        .bind::<Double, _>(stop.lat)
        .bind::<Double, _>(stop.lng)
        .bind::<Text, _>(&stop.stop_type)
        .bind::<Text, _>(&stop.agency)
        .execute(&mut conn)
        .await?;
        Ok(())
    }
}
