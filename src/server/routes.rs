//! Router configuration for the read API.

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/click", get(handlers::api_click))
        .route("/api/isochrone/:id", get(handlers::api_isochrone))
        .route(
            "/api/intersections/viewport",
            get(handlers::api_intersections_viewport),
        )
        .route(
            "/api/transit/stops/viewport",
            get(handlers::api_stops_viewport),
        )
        .route("/api/transit/stops/nearby", get(handlers::api_stops_nearby))
        .route("/api/modes", get(handlers::api_modes))
        .route("/api/stats", get(handlers::api_stats))
        .route("/api/health", get(handlers::api_health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
