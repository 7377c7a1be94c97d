//! Isochrone band persistence and reads.
//!
//! All geometry stays on the PostGIS side: bands arrive as GeoJSON strings
//! and are converted with `ST_GeomFromGeoJSON`, reads come back through
//! `ST_AsGeoJSON`. Clipping against the land boundary happens inside the
//! save statement so the clipped and unclipped forms are written together.

use std::sync::Arc;

use diesel::sql_query;
use diesel::sql_types::{Double, Integer, Nullable, Text, Time, Timestamptz};
use diesel_async::RunQueryDsl;
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::models::{BandMap, Bbox, CacheKey, Intersection, ModeStats, TravelMode};

use super::pool::{AsyncPgPool, DieselError};

/// Simplification tolerance in degrees, roughly 11 m at this latitude.
/// Caps serialised payload size on every read path.
const SIMPLIFY_TOLERANCE_DEG: f64 = 0.0001;

/// Per-band upsert. The clipped geometry is the polygon part of the
/// validity-repaired intersection with the land boundary; when that
/// intersection is NULL or empty (boundary missing, or an origin entirely
/// off the coastline mask) the raw input is stored verbatim instead.
const SAVE_BAND_SQL: &str = r#"
WITH input AS (
    SELECT ST_SetSRID(ST_GeomFromGeoJSON($6), 4326) AS geom
),
clipped AS (
    SELECT ST_CollectionExtract(
               ST_MakeValid(ST_Intersection(input.geom, lb.geometry)), 3) AS geom
    FROM input, land_boundary lb
)
INSERT INTO isochrone_bands
    (origin_id, mode, departure_time, day_type, cutoff_minutes,
     geometry, geometry_unclipped, computed_at)
SELECT $1, $2, $3, $4, $5,
       CASE WHEN clipped.geom IS NULL OR ST_IsEmpty(clipped.geom)
            THEN input.geom ELSE clipped.geom END,
       input.geom,
       NOW()
FROM input LEFT JOIN clipped ON TRUE
ON CONFLICT (origin_id, mode, departure_time, day_type, cutoff_minutes)
DO UPDATE SET geometry = EXCLUDED.geometry,
              geometry_unclipped = EXCLUDED.geometry_unclipped,
              computed_at = EXCLUDED.computed_at
"#;

#[derive(diesel::QueryableByName)]
struct BandRow {
    #[diesel(sql_type = Integer)]
    cutoff_minutes: i32,
    #[diesel(sql_type = Nullable<Text>)]
    geojson: Option<String>,
}

#[derive(diesel::QueryableByName)]
struct NearestBandRow {
    #[diesel(sql_type = Integer)]
    id: i32,
    #[diesel(sql_type = diesel::sql_types::BigInt)]
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
    #[diesel(sql_type = Text)]
    mode: String,
    #[diesel(sql_type = Integer)]
    cutoff_minutes: i32,
    #[diesel(sql_type = Nullable<Text>)]
    geojson: Option<String>,
}

impl NearestBandRow {
    fn intersection(&self) -> Intersection {
        Intersection {
            id: self.id,
            osm_node_id: self.osm_node_id,
            name: self.name.clone(),
            lat: self.lat,
            lng: self.lng,
            borough: self.borough.clone(),
            sample_group: self.sample_group,
        }
    }
}

#[derive(diesel::QueryableByName)]
struct ExtentRow {
    #[diesel(sql_type = Double)]
    min_lng: f64,
    #[diesel(sql_type = Double)]
    min_lat: f64,
    #[diesel(sql_type = Double)]
    max_lng: f64,
    #[diesel(sql_type = Double)]
    max_lat: f64,
}

#[derive(diesel::QueryableByName)]
struct ModeStatsRow {
    #[diesel(sql_type = Text)]
    mode: String,
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    band_rows: i64,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    oldest: Option<chrono::DateTime<chrono::Utc>>,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    newest: Option<chrono::DateTime<chrono::Utc>>,
}

/// Repository for isochrone band rows and the land boundary.
#[derive(Clone)]
pub struct IsochroneRepository {
    pool: AsyncPgPool,
    band_extent: Arc<OnceCell<Option<Bbox>>>,
}

impl IsochroneRepository {
    pub fn new(pool: AsyncPgPool, band_extent: Arc<OnceCell<Option<Bbox>>>) -> Self {
        Self { pool, band_extent }
    }

    /// Upsert one row per band. Writes are independent; an interruption
    /// leaves a partial band set that the selection predicate re-queues.
    pub async fn save(
        &self,
        origin_id: i32,
        key: &CacheKey,
        bands: &BandMap,
    ) -> Result<usize, DieselError> {
        let mut conn = self.pool.get().await?;
        let mut saved = 0;

        for (cutoff, geometry) in bands {
            let geojson = geometry.to_string();
            sql_query(SAVE_BAND_SQL)
                .bind::<Integer, _>(origin_id)
                .bind::<Text, _>(key.mode.as_str())
                .bind::<Time, _>(key.departure)
                .bind::<Text, _>(key.day_type.as_str())
                .bind::<Integer, _>(*cutoff as i32)
                .bind::<Text, _>(&geojson)
                .execute(&mut conn)
                .await?;
            saved += 1;
        }

        Ok(saved)
    }

    /// The band map for a specific origin, or None if no band exists.
    pub async fn cached(
        &self,
        origin_id: i32,
        key: &CacheKey,
    ) -> Result<Option<BandMap>, DieselError> {
        let mut conn = self.pool.get().await?;

        let rows: Vec<BandRow> = sql_query(
            r#"
            SELECT cutoff_minutes,
                   ST_AsGeoJSON(ST_Simplify(geometry, $5)) AS geojson
            FROM isochrone_bands
            WHERE origin_id = $1 AND mode = $2
              AND departure_time = $3 AND day_type = $4
            ORDER BY cutoff_minutes
            "#,
        )
        .bind::<Integer, _>(origin_id)
        .bind::<Text, _>(key.mode.as_str())
        .bind::<Time, _>(key.departure)
        .bind::<Text, _>(key.day_type.as_str())
        .bind::<Double, _>(SIMPLIFY_TOLERANCE_DEG)
        .load(&mut conn)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(band_map_from_rows(rows)))
    }

    /// Nearest origin (great-circle) holding any band under the key, with
    /// its bands, in a single round-trip.
    pub async fn nearest_with_isochrone(
        &self,
        lat: f64,
        lng: f64,
        key: &CacheKey,
    ) -> Result<Option<(Intersection, BandMap)>, DieselError> {
        let mut conn = self.pool.get().await?;

        let rows: Vec<NearestBandRow> = sql_query(
            r#"
            WITH nearest AS (
                SELECT i.id, i.osm_node_id, i.name, i.lat, i.lng,
                       i.borough, i.sample_group
                FROM intersections i
                WHERE EXISTS (
                    SELECT 1 FROM isochrone_bands b
                    WHERE b.origin_id = i.id AND b.mode = $3
                      AND b.departure_time = $4 AND b.day_type = $5
                )
                ORDER BY i.geom <-> ST_SetSRID(ST_MakePoint($2, $1), 4326)::geography
                LIMIT 1
            )
            SELECT n.id, n.osm_node_id, n.name, n.lat, n.lng,
                   n.borough, n.sample_group,
                   b.mode, b.cutoff_minutes,
                   ST_AsGeoJSON(ST_Simplify(b.geometry, $6)) AS geojson
            FROM nearest n
            JOIN isochrone_bands b ON b.origin_id = n.id
                AND b.mode = $3 AND b.departure_time = $4 AND b.day_type = $5
            ORDER BY b.cutoff_minutes
            "#,
        )
        .bind::<Double, _>(lat)
        .bind::<Double, _>(lng)
        .bind::<Text, _>(key.mode.as_str())
        .bind::<Time, _>(key.departure)
        .bind::<Text, _>(key.day_type.as_str())
        .bind::<Double, _>(SIMPLIFY_TOLERANCE_DEG)
        .load(&mut conn)
        .await?;

        let first = match rows.get(0) {
            Some(row) => row.intersection(),
            None => return Ok(None),
        };
        let bands = band_map_from_rows(
            rows.into_iter()
                .map(|r| BandRow {
                    cutoff_minutes: r.cutoff_minutes,
                    geojson: r.geojson,
                })
                .collect(),
        );
        Ok(Some((first, bands)))
    }

    /// Nearest origin holding bands under BOTH transit and bike for the
    /// given departure and day type; returns both band sets.
    pub async fn nearest_with_both_modes(
        &self,
        lat: f64,
        lng: f64,
        departure: chrono::NaiveTime,
        day_type: crate::models::DayType,
    ) -> Result<Option<(Intersection, BandMap, BandMap)>, DieselError> {
        let mut conn = self.pool.get().await?;

        let rows: Vec<NearestBandRow> = sql_query(
            r#"
            WITH nearest AS (
                SELECT i.id, i.osm_node_id, i.name, i.lat, i.lng,
                       i.borough, i.sample_group
                FROM intersections i
                WHERE EXISTS (
                    SELECT 1 FROM isochrone_bands b
                    WHERE b.origin_id = i.id AND b.mode = 'transit'
                      AND b.departure_time = $3 AND b.day_type = $4
                )
                AND EXISTS (
                    SELECT 1 FROM isochrone_bands b
                    WHERE b.origin_id = i.id AND b.mode = 'bike'
                      AND b.departure_time = $3 AND b.day_type = $4
                )
                ORDER BY i.geom <-> ST_SetSRID(ST_MakePoint($2, $1), 4326)::geography
                LIMIT 1
            )
            SELECT n.id, n.osm_node_id, n.name, n.lat, n.lng,
                   n.borough, n.sample_group,
                   b.mode, b.cutoff_minutes,
                   ST_AsGeoJSON(ST_Simplify(b.geometry, $5)) AS geojson
            FROM nearest n
            JOIN isochrone_bands b ON b.origin_id = n.id
                AND b.mode IN ('transit', 'bike')
                AND b.departure_time = $3 AND b.day_type = $4
            ORDER BY b.mode, b.cutoff_minutes
            "#,
        )
        .bind::<Double, _>(lat)
        .bind::<Double, _>(lng)
        .bind::<Time, _>(departure)
        .bind::<Text, _>(day_type.as_str())
        .bind::<Double, _>(SIMPLIFY_TOLERANCE_DEG)
        .load(&mut conn)
        .await?;

        let origin = match rows.get(0) {
            Some(row) => row.intersection(),
            None => return Ok(None),
        };

        let mut transit = BandMap::new();
        let mut bike = BandMap::new();
        for row in rows {
            let geometry = match parse_band_geojson(row.geojson.as_deref()) {
                Some(g) => g,
                None => continue,
            };
            let target = match TravelMode::from_str(&row.mode) {
                Some(TravelMode::Transit) => &mut transit,
                Some(TravelMode::Bike) => &mut bike,
                _ => continue,
            };
            target.insert(row.cutoff_minutes as u32, geometry);
        }
        Ok(Some((origin, transit, bike)))
    }

    /// Per-mode band-row counts and timestamp ranges.
    pub async fn mode_stats(&self) -> Result<Vec<ModeStats>, DieselError> {
        let mut conn = self.pool.get().await?;

        let rows: Vec<ModeStatsRow> = sql_query(
            r#"
            SELECT mode, COUNT(*) AS band_rows,
                   MIN(computed_at) AS oldest, MAX(computed_at) AS newest
            FROM isochrone_bands
            GROUP BY mode
            ORDER BY mode
            "#,
        )
        .load(&mut conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ModeStats {
                mode: r.mode,
                band_rows: r.band_rows,
                oldest: r.oldest,
                newest: r.newest,
            })
            .collect())
    }

    /// Bounding box of all band geometry, memoised after first read.
    pub async fn band_extent(&self) -> Result<Option<Bbox>, DieselError> {
        let extent = self
            .band_extent
            .get_or_try_init(|| async {
                let mut conn = self.pool.get().await?;
                let rows: Vec<ExtentRow> = sql_query(
                    r#"
                    SELECT ST_XMin(extent) AS min_lng, ST_YMin(extent) AS min_lat,
                           ST_XMax(extent) AS max_lng, ST_YMax(extent) AS max_lat
                    FROM (SELECT ST_Extent(geometry) AS extent FROM isochrone_bands) e
                    WHERE extent IS NOT NULL
                    "#,
                )
                .load(&mut conn)
                .await?;
                Ok::<_, DieselError>(rows.get(0).map(|r| Bbox {
                    min_lat: r.min_lat,
                    max_lat: r.max_lat,
                    min_lng: r.min_lng,
                    max_lng: r.max_lng,
                }))
            })
            .await?;
        Ok(*extent)
    }

    /// Replace the land boundary with a new (multi)polygon.
    pub async fn replace_land_boundary(&self, geojson: &str) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        sql_query("DELETE FROM land_boundary")
            .execute(&mut conn)
            .await?;
        sql_query(
            "INSERT INTO land_boundary (geometry) \
             VALUES (ST_Multi(ST_SetSRID(ST_GeomFromGeoJSON($1), 4326)))",
        )
        .bind::<Text, _>(geojson)
        .execute(&mut conn)
        .await?;
        Ok(())
    }
}

fn band_map_from_rows(rows: Vec<BandRow>) -> BandMap {
    let mut bands = BandMap::new();
    for row in rows {
        if let Some(geometry) = parse_band_geojson(row.geojson.as_deref()) {
            bands.insert(row.cutoff_minutes as u32, geometry);
        }
    }
    bands
}

fn parse_band_geojson(geojson: Option<&str>) -> Option<Value> {
    geojson.and_then(|s| serde_json::from_str(s).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_statement_clips_with_raw_fallback() {
        // Polygon extraction over a validity-repaired intersection,
        // falling back to the raw input when the clip comes up empty.
        assert!(SAVE_BAND_SQL.contains("ST_CollectionExtract"));
        assert!(SAVE_BAND_SQL.contains("ST_MakeValid(ST_Intersection"));
        assert!(SAVE_BAND_SQL.contains("ST_IsEmpty"));
        assert!(SAVE_BAND_SQL.contains("THEN input.geom"));
        assert!(SAVE_BAND_SQL.contains("ON CONFLICT"));
    }

    #[test]
    fn band_map_skips_unparseable_geometry() {
        let rows = vec![
            BandRow {
                cutoff_minutes: 15,
                geojson: Some(r#"{"type":"Polygon","coordinates":[]}"#.to_string()),
            },
            BandRow {
                cutoff_minutes: 30,
                geojson: None,
            },
            BandRow {
                cutoff_minutes: 45,
                geojson: Some("not json".to_string()),
            },
        ];
        let bands = band_map_from_rows(rows);
        assert_eq!(bands.len(), 1);
        assert!(bands.contains_key(&15));
    }
}
