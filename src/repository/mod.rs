//! Geospatial cache store.
//!
//! Sole owner of SQL and of geometry encoding. All database access goes
//! through diesel-async against PostgreSQL with PostGIS; queries touching a
//! geometry column use `sql_query` with typed binds, everything else uses
//! the query DSL over `crate::schema`.

pub mod context;
pub mod intersections;
pub mod isochrones;
pub mod pool;
pub mod queue;
pub mod stops;

pub use context::DbContext;
pub use intersections::{IntersectionRepository, ViewportIntersection};
pub use isochrones::IsochroneRepository;
pub use pool::{AsyncPgPool, DieselError};
pub use queue::BatchQueueRepository;
pub use stops::TransitStopRepository;
