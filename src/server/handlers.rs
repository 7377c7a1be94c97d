//! API endpoint handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::models::{BandMap, Bbox, CacheKey, DayType, TravelMode};

use super::AppState;

const DEFAULT_MODE: TravelMode = TravelMode::Transit;
const DEFAULT_TIME: &str = "10:00:00";
const DEFAULT_DAY_TYPE: DayType = DayType::Weekday;

const DEFAULT_VIEWPORT_LIMIT: i64 = 500;
const MAX_VIEWPORT_LIMIT: i64 = 2000;
const DEFAULT_NEARBY_RADIUS_M: f64 = 500.0;
const MAX_NEARBY_RADIUS_M: f64 = 5000.0;

/// Parameters for the click and per-origin isochrone endpoints.
#[derive(Debug, Deserialize)]
pub struct IsochroneParams {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub mode: Option<String>,
    pub time: Option<String>,
    #[serde(rename = "dayType")]
    pub day_type: Option<String>,
}

/// Viewport parameters for intersections and stops.
#[derive(Debug, Deserialize)]
pub struct ViewportParams {
    #[serde(rename = "minLat")]
    pub min_lat: Option<f64>,
    #[serde(rename = "maxLat")]
    pub max_lat: Option<f64>,
    #[serde(rename = "minLng")]
    pub min_lng: Option<f64>,
    #[serde(rename = "maxLng")]
    pub max_lng: Option<f64>,
    pub limit: Option<i64>,
    pub mode: Option<String>,
    pub time: Option<String>,
    #[serde(rename = "dayType")]
    pub day_type: Option<String>,
    #[serde(rename = "sampleGroup")]
    pub sample_group: Option<i32>,
}

/// Nearby-stop parameters.
#[derive(Debug, Deserialize)]
pub struct NearbyParams {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub radius: Option<f64>,
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": message}))).into_response()
}

fn store_error(e: impl std::fmt::Display) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": e.to_string()})),
    )
        .into_response()
}

/// Resolve mode/time/dayType parameters into a cache key, applying the
/// serving defaults.
fn parse_key(
    mode: Option<&str>,
    time: Option<&str>,
    day_type: Option<&str>,
) -> Result<CacheKey, String> {
    let mode = match mode {
        Some(m) => TravelMode::from_str(m).ok_or_else(|| format!("unknown mode '{}'", m))?,
        None => DEFAULT_MODE,
    };
    let departure = chrono::NaiveTime::parse_from_str(time.unwrap_or(DEFAULT_TIME), "%H:%M:%S")
        .map_err(|_| "time must be HH:MM:SS".to_string())?;
    let day_type = match day_type {
        Some(d) => DayType::from_str(d).ok_or_else(|| format!("unknown dayType '{}'", d))?,
        None => DEFAULT_DAY_TYPE,
    };
    Ok(CacheKey::new(mode, departure, day_type))
}

fn parse_bbox(params: &ViewportParams) -> Result<Bbox, &'static str> {
    match (
        params.min_lat,
        params.max_lat,
        params.min_lng,
        params.max_lng,
    ) {
        (Some(min_lat), Some(max_lat), Some(min_lng), Some(max_lng)) => Ok(Bbox {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        }),
        _ => Err("minLat, maxLat, minLng and maxLng are required"),
    }
}

/// Band map keyed `isochrone_15m`..`isochrone_180m` for the response body.
fn isochrone_json(bands: &BandMap) -> Value {
    let mut object = serde_json::Map::new();
    for (cutoff, geometry) in bands {
        object.insert(format!("isochrone_{}m", cutoff), geometry.clone());
    }
    Value::Object(object)
}

/// `GET /api/click?lat&lng&mode&time&dayType`
///
/// Nearest cached origin to the clicked point, with its bands. The special
/// `mode=compare` returns transit and bike band sets from one origin.
pub async fn api_click(
    State(state): State<AppState>,
    Query(params): Query<IsochroneParams>,
) -> Response {
    let (lat, lng) = match (params.lat, params.lng) {
        (Some(lat), Some(lng)) => (lat, lng),
        _ => return bad_request("lat and lng are required"),
    };

    let isochrones = state.ctx.isochrones();

    // Quick rejection for clicks outside all cached geometry.
    if let Ok(Some(extent)) = isochrones.band_extent().await {
        if !extent.contains(lat, lng) {
            return not_found("No cached isochrone near this location");
        }
    }

    if params.mode.as_deref() == Some("compare") {
        let key = match parse_key(None, params.time.as_deref(), params.day_type.as_deref()) {
            Ok(key) => key,
            Err(message) => return bad_request(&message),
        };
        return match isochrones
            .nearest_with_both_modes(lat, lng, key.departure, key.day_type)
            .await
        {
            Ok(Some((intersection, transit, bike))) => Json(json!({
                "intersection": intersection,
                "isochrone": {
                    "transit": isochrone_json(&transit),
                    "bike": isochrone_json(&bike),
                },
                "source": "cache",
            }))
            .into_response(),
            Ok(None) => not_found("No origin cached for both modes near this location"),
            Err(e) => store_error(e),
        };
    }

    let key = match parse_key(
        params.mode.as_deref(),
        params.time.as_deref(),
        params.day_type.as_deref(),
    ) {
        Ok(key) => key,
        Err(message) => return bad_request(&message),
    };

    match isochrones.nearest_with_isochrone(lat, lng, &key).await {
        Ok(Some((intersection, bands))) => Json(json!({
            "intersection": intersection,
            "isochrone": isochrone_json(&bands),
            "source": "cache",
        }))
        .into_response(),
        Ok(None) => not_found("No cached isochrone near this location"),
        Err(e) => store_error(e),
    }
}

/// `GET /api/isochrone/:id?mode&time&dayType`
pub async fn api_isochrone(
    State(state): State<AppState>,
    Path(origin_id): Path<i32>,
    Query(params): Query<IsochroneParams>,
) -> Response {
    let key = match parse_key(
        params.mode.as_deref(),
        params.time.as_deref(),
        params.day_type.as_deref(),
    ) {
        Ok(key) => key,
        Err(message) => return bad_request(&message),
    };

    match state.ctx.isochrones().cached(origin_id, &key).await {
        Ok(Some(bands)) => Json(json!({
            "isochrone": isochrone_json(&bands),
            "source": "cache",
        }))
        .into_response(),
        Ok(None) => not_found("No cached isochrone for this intersection"),
        Err(e) => store_error(e),
    }
}

/// `GET /api/intersections/viewport?minLat&maxLat&minLng&maxLng&limit&mode&sampleGroup`
pub async fn api_intersections_viewport(
    State(state): State<AppState>,
    Query(params): Query<ViewportParams>,
) -> Response {
    let bbox = match parse_bbox(&params) {
        Ok(bbox) => bbox,
        Err(message) => return bad_request(message),
    };
    let key = match parse_key(
        params.mode.as_deref(),
        params.time.as_deref(),
        params.day_type.as_deref(),
    ) {
        Ok(key) => key,
        Err(message) => return bad_request(&message),
    };
    let limit = params
        .limit
        .unwrap_or(DEFAULT_VIEWPORT_LIMIT)
        .clamp(1, MAX_VIEWPORT_LIMIT);

    match state
        .ctx
        .intersections()
        .in_viewport(&bbox, limit, &key, params.sample_group)
        .await
    {
        Ok(intersections) => Json(json!({
            "count": intersections.len(),
            "intersections": intersections,
        }))
        .into_response(),
        Err(e) => store_error(e),
    }
}

/// `GET /api/transit/stops/viewport?minLat&maxLat&minLng&maxLng&limit`
pub async fn api_stops_viewport(
    State(state): State<AppState>,
    Query(params): Query<ViewportParams>,
) -> Response {
    let bbox = match parse_bbox(&params) {
        Ok(bbox) => bbox,
        Err(message) => return bad_request(message),
    };
    let limit = params
        .limit
        .unwrap_or(DEFAULT_VIEWPORT_LIMIT)
        .clamp(1, MAX_VIEWPORT_LIMIT);

    match state.ctx.stops().in_viewport(&bbox, limit).await {
        Ok(stops) => Json(json!({"count": stops.len(), "stops": stops})).into_response(),
        Err(e) => store_error(e),
    }
}

/// `GET /api/transit/stops/nearby?lat&lng&radius`
pub async fn api_stops_nearby(
    State(state): State<AppState>,
    Query(params): Query<NearbyParams>,
) -> Response {
    let (lat, lng) = match (params.lat, params.lng) {
        (Some(lat), Some(lng)) => (lat, lng),
        _ => return bad_request("lat and lng are required"),
    };
    let radius = params
        .radius
        .unwrap_or(DEFAULT_NEARBY_RADIUS_M)
        .clamp(1.0, MAX_NEARBY_RADIUS_M);

    match state.ctx.stops().nearby(lat, lng, radius, 100).await {
        Ok(stops) => Json(json!({"count": stops.len(), "stops": stops})).into_response(),
        Err(e) => store_error(e),
    }
}

/// `GET /api/modes`
pub async fn api_modes() -> Response {
    let modes: Vec<_> = TravelMode::all()
        .into_iter()
        .map(|mode| json!({"id": mode.as_str(), "label": mode.label()}))
        .collect();
    Json(modes).into_response()
}

/// `GET /api/stats?mode&time&dayType`
pub async fn api_stats(
    State(state): State<AppState>,
    Query(params): Query<IsochroneParams>,
) -> Response {
    let key = match parse_key(
        params.mode.as_deref(),
        params.time.as_deref(),
        params.day_type.as_deref(),
    ) {
        Ok(key) => key,
        Err(message) => return bad_request(&message),
    };

    match state.ctx.stats(&key, state.required_bands).await {
        Ok(stats) => Json(json!({
            "mode": key.mode.as_str(),
            "dayType": key.day_type.as_str(),
            "time": key.departure.format("%H:%M:%S").to_string(),
            "intersections": stats.total_intersections,
            "cached_origins": stats.cached_origins,
            "modes": stats.modes,
            "batch_status": stats
                .status_counts
                .iter()
                .map(|(status, count)| json!({"status": status, "count": count}))
                .collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(e) => store_error(e),
    }
}

/// `GET /api/health`
pub async fn api_health(State(state): State<AppState>) -> Response {
    match state.ctx.test_connection().await {
        Ok(()) => Json(json!({"status": "ok"})).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "unavailable", "error": e.to_string()})),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_parsing_applies_defaults() {
        let key = parse_key(None, None, None).unwrap();
        assert_eq!(key.mode, TravelMode::Transit);
        assert_eq!(key.day_type, DayType::Weekday);
        assert_eq!(
            key.departure,
            chrono::NaiveTime::from_hms_opt(10, 0, 0).unwrap()
        );
    }

    #[test]
    fn key_parsing_rejects_unknown_values() {
        assert!(parse_key(Some("teleport"), None, None).is_err());
        assert!(parse_key(None, Some("25:99"), None).is_err());
        assert!(parse_key(None, None, Some("holiday")).is_err());

        let key = parse_key(Some("transit-bike"), Some("08:30:00"), Some("sunday")).unwrap();
        assert_eq!(key.mode, TravelMode::TransitBike);
        assert_eq!(key.day_type, DayType::Sunday);
    }

    #[test]
    fn viewport_requires_a_full_bounding_box() {
        let mut params = ViewportParams {
            min_lat: Some(40.6),
            max_lat: Some(40.9),
            min_lng: Some(-74.1),
            max_lng: None,
            limit: None,
            mode: None,
            time: None,
            day_type: None,
            sample_group: None,
        };
        assert!(parse_bbox(&params).is_err());

        params.max_lng = Some(-73.8);
        let bbox = parse_bbox(&params).unwrap();
        assert_eq!(bbox.min_lat, 40.6);
        assert_eq!(bbox.max_lng, -73.8);
    }

    #[test]
    fn isochrone_keys_are_cutoff_suffixed() {
        let mut bands = BandMap::new();
        bands.insert(15, json!({"type": "Polygon", "coordinates": []}));
        bands.insert(180, json!({"type": "Polygon", "coordinates": []}));

        let body = isochrone_json(&bands);
        assert!(body.get("isochrone_15m").is_some());
        assert!(body.get("isochrone_180m").is_some());
        assert!(body.get("isochrone_30m").is_none());
    }
}
