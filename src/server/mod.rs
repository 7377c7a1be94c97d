//! Read-only HTTP serving layer over the isochrone cache.
//!
//! Thin adapters only: handlers parse parameters, call into the store, and
//! assemble GeoJSON responses with a `source: "cache"` marker. Nothing is
//! computed at request time.

mod handlers;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;

use crate::config::Settings;
use crate::repository::DbContext;

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub ctx: DbContext,
    /// Band rows an origin needs under one cache key to count as cached.
    pub required_bands: usize,
}

/// Start the server and block until shutdown.
pub async fn serve(settings: &Settings) -> anyhow::Result<()> {
    let ctx = DbContext::new(&settings.database_url)?;
    ctx.test_connection().await?;

    let state = AppState {
        ctx,
        required_bands: settings.cutoffs.len(),
    };
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("serving isochrone cache on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
