//! reachmap - pre-computed travel-time isochrone cache.
//!
//! Batch pipeline that drives an external trip-planning engine over every
//! street intersection in the NY tri-state region, persists clipped
//! reachability polygons per cutoff, and serves a cache-only read API.

mod batch;
mod cli;
mod config;
mod geometry;
mod ingest;
mod models;
mod repository;
mod routing;
mod schema;
mod server;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    // Initialize logging based on verbosity
    let default_filter = if cli::is_verbose() {
        "reachmap=info"
    } else {
        "reachmap=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Run CLI
    cli::run().await
}
