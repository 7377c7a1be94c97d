//! Database context: pool ownership, schema initialisation and repository
//! access.

use std::sync::Arc;

use diesel_async::SimpleAsyncConnection;
use tokio::sync::OnceCell;

use crate::models::{Bbox, CacheKey, ModeStats};

use super::intersections::IntersectionRepository;
use super::isochrones::IsochroneRepository;
use super::pool::{AsyncPgPool, DieselError};
use super::queue::BatchQueueRepository;
use super::stops::TransitStopRepository;

/// Aggregate store statistics for the stats endpoint and CLI.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub total_intersections: i64,
    pub cached_origins: i64,
    pub modes: Vec<ModeStats>,
    pub status_counts: Vec<(String, i64)>,
}

/// Unified entry point for database operations. Create one context per
/// command or service, then use it to access all repositories.
#[derive(Clone)]
pub struct DbContext {
    pool: AsyncPgPool,
    // Band geometry is effectively static outside batch mode; the extent is
    // read once and memoised for the life of the process.
    band_extent: Arc<OnceCell<Option<Bbox>>>,
}

impl DbContext {
    /// Create a new context from a connection URL.
    pub fn new(database_url: &str) -> Result<Self, DieselError> {
        let pool = AsyncPgPool::new(database_url, 10)?;
        Ok(Self {
            pool,
            band_extent: Arc::new(OnceCell::new()),
        })
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &AsyncPgPool {
        &self.pool
    }

    /// Verify the database is reachable.
    pub async fn test_connection(&self) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute("SELECT 1").await
    }

    /// Get an intersection repository.
    pub fn intersections(&self) -> IntersectionRepository {
        IntersectionRepository::new(self.pool.clone())
    }

    /// Get an isochrone band repository.
    pub fn isochrones(&self) -> IsochroneRepository {
        IsochroneRepository::new(self.pool.clone(), self.band_extent.clone())
    }

    /// Get a batch queue repository.
    pub fn queue(&self) -> BatchQueueRepository {
        BatchQueueRepository::new(self.pool.clone())
    }

    /// Get a transit stop repository.
    pub fn stops(&self) -> TransitStopRepository {
        TransitStopRepository::new(self.pool.clone())
    }

    /// Aggregate statistics for one cache key. `required_bands` is the
    /// configured cutoff count an origin needs to count as fully cached.
    pub async fn stats(
        &self,
        key: &CacheKey,
        required_bands: usize,
    ) -> Result<StoreStats, DieselError> {
        Ok(StoreStats {
            total_intersections: self.intersections().count().await?,
            cached_origins: self.queue().cached_origin_count(key, required_bands).await?,
            modes: self.isochrones().mode_stats().await?,
            status_counts: self.queue().status_counts(key).await?,
        })
    }

    /// Initialise the schema. Idempotent; requires PostGIS.
    pub async fn init_schema(&self) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        conn.batch_execute(
            r#"
            CREATE EXTENSION IF NOT EXISTS postgis;

            -- Street intersection origins. Immutable after ingest.
            CREATE TABLE IF NOT EXISTS intersections (
                id SERIAL PRIMARY KEY,
                osm_node_id BIGINT NOT NULL UNIQUE,
                name TEXT,
                lat DOUBLE PRECISION NOT NULL,
                lng DOUBLE PRECISION NOT NULL,
                borough TEXT NOT NULL,
                sample_group INTEGER NOT NULL DEFAULT 0,
                geom GEOGRAPHY(Point, 4326) NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_intersections_geom
                ON intersections USING GIST (geom);
            CREATE INDEX IF NOT EXISTS idx_intersections_borough
                ON intersections (borough);

            -- One row per (cache key, cutoff); a fully cached origin has
            -- exactly eight rows for one cache key.
            CREATE TABLE IF NOT EXISTS isochrone_bands (
                origin_id INTEGER NOT NULL REFERENCES intersections(id),
                mode TEXT NOT NULL,
                departure_time TIME NOT NULL,
                day_type TEXT NOT NULL,
                cutoff_minutes INTEGER NOT NULL,
                geometry GEOMETRY(Geometry, 4326) NOT NULL,
                geometry_unclipped GEOMETRY(Geometry, 4326) NOT NULL,
                computed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (origin_id, mode, departure_time, day_type, cutoff_minutes)
            );
            CREATE INDEX IF NOT EXISTS idx_isochrone_bands_geometry
                ON isochrone_bands USING GIST (geometry);

            -- Work queue; an absent row means pending.
            CREATE TABLE IF NOT EXISTS batch_status (
                intersection_id INTEGER NOT NULL REFERENCES intersections(id),
                mode TEXT NOT NULL,
                departure_time TIME NOT NULL,
                day_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                started_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ,
                error_message TEXT,
                UNIQUE (intersection_id, mode, departure_time, day_type)
            );

            -- Dry land for the region; reachable polygons are clipped to it.
            CREATE TABLE IF NOT EXISTS land_boundary (
                geometry GEOMETRY(MultiPolygon, 4326) NOT NULL
            );

            CREATE TABLE IF NOT EXISTS transit_stops (
                id SERIAL PRIMARY KEY,
                -- Agency-qualified; raw GTFS stop ids collide across feeds.
                gtfs_stop_id TEXT NOT NULL UNIQUE,
                stop_name TEXT NOT NULL,
                lat DOUBLE PRECISION NOT NULL,
                lng DOUBLE PRECISION NOT NULL,
                stop_type TEXT NOT NULL,
                agency TEXT NOT NULL,
                geom GEOGRAPHY(Point, 4326) NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_transit_stops_geom
                ON transit_stops USING GIST (geom);
            "#,
        )
        .await
    }
}
