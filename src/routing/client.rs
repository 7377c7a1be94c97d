//! Client for the routing worker's isochrone endpoint.
//!
//! One request per origin carrying all cutoffs, with a parallel per-cutoff
//! fallback for a known worker defect in which the SPT projection collapses
//! to a single shape across cutoffs. The client never retries; retry policy
//! belongs to the batch orchestrator.

use chrono::NaiveTime;
use futures_util::future::join_all;
use serde_json::Value;

use crate::config::Settings;
use crate::geometry::{bands_from_feature_collection, distinct_geometry_count};
use crate::models::{BandMap, DayType, TravelMode};

/// All routing-call failures collapse into one string-valued error; callers
/// record it, they do not branch on subtype.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct RoutingError(pub String);

impl From<reqwest::Error> for RoutingError {
    fn from(e: reqwest::Error) -> Self {
        RoutingError(e.to_string())
    }
}

/// One isochrone computation request: a location plus the non-origin
/// dimensions of its cache key.
#[derive(Debug, Clone)]
pub struct IsochroneRequest {
    pub lat: f64,
    pub lng: f64,
    pub mode: TravelMode,
    pub departure: NaiveTime,
    pub day_type: DayType,
}

/// Stateless wrapper over a routing worker HTTP endpoint.
#[derive(Clone)]
pub struct RoutingClient {
    client: reqwest::Client,
    cutoffs: Vec<u32>,
    weekday_date: chrono::NaiveDate,
    saturday_date: chrono::NaiveDate,
    sunday_date: chrono::NaiveDate,
    tz_offset: String,
}

impl RoutingClient {
    pub fn new(settings: &Settings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(settings.routing_timeout)
            .connect_timeout(settings.routing_timeout)
            .pool_max_idle_per_host(settings.http_max_idle_per_host)
            .gzip(true)
            .build()
            .expect("Failed to create routing HTTP client");

        Self {
            client,
            cutoffs: settings.cutoffs.clone(),
            weekday_date: settings.weekday_date,
            saturday_date: settings.saturday_date,
            sunday_date: settings.sunday_date,
            tz_offset: settings.tz_offset.clone(),
        }
    }

    /// Compute isochrones for one origin against a specific worker.
    ///
    /// Issues a single multi-cutoff request first. When the worker returns
    /// fewer than two distinct geometries the per-cutoff fallback runs, one
    /// request per cutoff in parallel; individual per-cutoff failures are
    /// tolerated and the merged result holds only the cutoffs that
    /// succeeded.
    pub async fn compute_isochrones(
        &self,
        req: &IsochroneRequest,
        worker_base: &str,
    ) -> Result<BandMap, RoutingError> {
        let bands = self.fetch_bands(req, worker_base, &self.cutoffs).await?;

        if bands.is_empty() {
            return Err(RoutingError(format!(
                "empty feature collection from {}",
                worker_base
            )));
        }

        if distinct_geometry_count(&bands) >= 2 {
            return Ok(bands);
        }

        tracing::info!(
            "worker {} collapsed {} cutoffs to one geometry, retrying per cutoff",
            worker_base,
            self.cutoffs.len()
        );

        let fetches = self
            .cutoffs
            .iter()
            .map(|&cutoff| self.fetch_single(req, worker_base, cutoff));
        let results = join_all(fetches).await;

        let mut merged = BandMap::new();
        for (&cutoff, result) in self.cutoffs.iter().zip(results) {
            match result {
                Ok(Some(geometry)) => {
                    merged.insert(cutoff, geometry);
                }
                Ok(None) => {
                    tracing::warn!("worker {} returned no band for {}m", worker_base, cutoff);
                }
                Err(e) => {
                    tracing::warn!("per-cutoff request {}m against {} failed: {}", cutoff, worker_base, e);
                }
            }
        }

        if merged.is_empty() {
            return Err(RoutingError(format!(
                "all per-cutoff requests against {} failed",
                worker_base
            )));
        }

        Ok(merged)
    }

    /// Issue one isochrone request and parse the returned bands.
    async fn fetch_bands(
        &self,
        req: &IsochroneRequest,
        worker_base: &str,
        cutoffs: &[u32],
    ) -> Result<BandMap, RoutingError> {
        let url = format!("{}/otp/traveltime/isochrone", worker_base);

        let mut params: Vec<(String, String)> = vec![
            ("batch".to_string(), "true".to_string()),
            ("location".to_string(), format!("{},{}", req.lat, req.lng)),
            ("time".to_string(), self.departure_timestamp(req)),
        ];
        for (key, value) in mode_params(req.mode) {
            params.push((key.to_string(), value.to_string()));
        }
        for cutoff in cutoffs {
            params.push(("cutoff".to_string(), format!("PT{}M", cutoff)));
        }

        let response = self.client.get(&url).query(&params).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RoutingError(format!(
                "worker {} returned HTTP {}",
                worker_base,
                status.as_u16()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| RoutingError(format!("invalid response body: {}", e)))?;

        Ok(bands_from_feature_collection(&body))
    }

    /// Fetch one cutoff. The returned geometry is keyed by the requested
    /// cutoff even when the feature's own `time` bin disagrees slightly.
    async fn fetch_single(
        &self,
        req: &IsochroneRequest,
        worker_base: &str,
        cutoff: u32,
    ) -> Result<Option<Value>, RoutingError> {
        let mut bands = self.fetch_bands(req, worker_base, &[cutoff]).await?;
        Ok(bands
            .remove(&cutoff)
            .or_else(|| bands.into_values().next()))
    }

    /// `<date>T<HH:MM:SS><offset>` with the date picked by day type.
    fn departure_timestamp(&self, req: &IsochroneRequest) -> String {
        let date = match req.day_type {
            DayType::Weekday => self.weekday_date,
            DayType::Saturday => self.saturday_date,
            DayType::Sunday => self.sunday_date,
        };
        format!(
            "{}T{}{}",
            date.format("%Y-%m-%d"),
            req.departure.format("%H:%M:%S"),
            self.tz_offset
        )
    }
}

/// Translate a travel mode into the worker's parameter vocabulary.
fn mode_params(mode: TravelMode) -> &'static [(&'static str, &'static str)] {
    match mode {
        TravelMode::Transit => &[("modes", "TRANSIT,WALK")],
        TravelMode::TransitBike => &[
            ("modes", "TRANSIT"),
            ("accessModes", "BIKE"),
            ("egressModes", "BIKE"),
        ],
        TravelMode::Bike => &[("modes", "BIKE")],
        TravelMode::Walk => &[("modes", "WALK")],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn test_client(server_cutoffs: &[u32]) -> RoutingClient {
        let mut settings = Settings::default();
        settings.cutoffs = server_cutoffs.to_vec();
        RoutingClient::new(&settings)
    }

    fn request() -> IsochroneRequest {
        IsochroneRequest {
            lat: 40.75,
            lng: -73.99,
            mode: TravelMode::Transit,
            departure: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            day_type: DayType::Weekday,
        }
    }

    fn feature(seconds: u32, offset: f64) -> Value {
        json!({
            "type": "Feature",
            "properties": {"time": seconds.to_string()},
            "geometry": {
                "type": "Polygon",
                "coordinates": [[
                    [-74.0 + offset, 40.7],
                    [-73.9 + offset, 40.7],
                    [-73.9 + offset, 40.8],
                    [-74.0 + offset, 40.7]
                ]]
            }
        })
    }

    fn collection(features: Vec<Value>) -> String {
        json!({"type": "FeatureCollection", "features": features}).to_string()
    }

    #[test]
    fn mode_translation() {
        assert_eq!(
            mode_params(TravelMode::Transit),
            &[("modes", "TRANSIT,WALK")]
        );
        assert_eq!(
            mode_params(TravelMode::TransitBike),
            &[
                ("modes", "TRANSIT"),
                ("accessModes", "BIKE"),
                ("egressModes", "BIKE"),
            ]
        );
        assert_eq!(mode_params(TravelMode::Bike), &[("modes", "BIKE")]);
        assert_eq!(mode_params(TravelMode::Walk), &[("modes", "WALK")]);
    }

    #[test]
    fn departure_timestamp_uses_day_type_date_and_offset() {
        let client = test_client(&[15]);
        let stamp = client.departure_timestamp(&request());
        assert_eq!(stamp, "2025-06-11T10:00:00-05:00");

        let mut saturday = request();
        saturday.day_type = DayType::Saturday;
        assert_eq!(
            client.departure_timestamp(&saturday),
            "2025-06-14T10:00:00-05:00"
        );
    }

    #[tokio::test]
    async fn multi_cutoff_success_is_a_single_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/otp/traveltime/isochrone")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(collection(vec![feature(900, 0.0), feature(1800, 0.1)]))
            .expect(1)
            .create_async()
            .await;

        let client = test_client(&[15, 30]);
        let bands = client
            .compute_isochrones(&request(), &server.url())
            .await
            .unwrap();

        assert_eq!(bands.len(), 2);
        assert!(bands.contains_key(&15));
        assert!(bands.contains_key(&30));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn collapsed_response_triggers_per_cutoff_fallback() {
        let mut server = mockito::Server::new_async().await;

        // The multi-cutoff request carries both cutoffs; per-cutoff requests
        // end with their single cutoff parameter.
        let multi = server
            .mock("GET", "/otp/traveltime/isochrone")
            .match_query(Matcher::Regex("cutoff=PT15M&cutoff=PT30M$".to_string()))
            .with_status(200)
            .with_body(collection(vec![feature(900, 0.0), feature(1800, 0.0)]))
            .expect(1)
            .create_async()
            .await;
        let single_15 = server
            .mock("GET", "/otp/traveltime/isochrone")
            .match_query(Matcher::Regex("cutoff=PT15M$".to_string()))
            .with_status(200)
            .with_body(collection(vec![feature(900, 0.0)]))
            .expect(1)
            .create_async()
            .await;
        let single_30 = server
            .mock("GET", "/otp/traveltime/isochrone")
            .match_query(Matcher::Regex("cutoff=PT30M$".to_string()))
            .with_status(200)
            .with_body(collection(vec![feature(1800, 0.5)]))
            .expect(1)
            .create_async()
            .await;

        let client = test_client(&[15, 30]);
        let bands = client
            .compute_isochrones(&request(), &server.url())
            .await
            .unwrap();

        assert_eq!(bands.len(), 2);
        assert_ne!(bands[&15], bands[&30]);
        multi.assert_async().await;
        single_15.assert_async().await;
        single_30.assert_async().await;
    }

    #[tokio::test]
    async fn fallback_tolerates_individual_cutoff_failures() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("GET", "/otp/traveltime/isochrone")
            .match_query(Matcher::Regex("cutoff=PT15M&cutoff=PT30M$".to_string()))
            .with_status(200)
            .with_body(collection(vec![feature(900, 0.0), feature(1800, 0.0)]))
            .create_async()
            .await;
        server
            .mock("GET", "/otp/traveltime/isochrone")
            .match_query(Matcher::Regex("cutoff=PT15M$".to_string()))
            .with_status(200)
            .with_body(collection(vec![feature(900, 0.2)]))
            .create_async()
            .await;
        server
            .mock("GET", "/otp/traveltime/isochrone")
            .match_query(Matcher::Regex("cutoff=PT30M$".to_string()))
            .with_status(500)
            .create_async()
            .await;

        let client = test_client(&[15, 30]);
        let bands = client
            .compute_isochrones(&request(), &server.url())
            .await
            .unwrap();

        assert_eq!(bands.len(), 1);
        assert!(bands.contains_key(&15));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/otp/traveltime/isochrone")
            .match_query(Matcher::Any)
            .with_status(502)
            .create_async()
            .await;

        let client = test_client(&[15, 30]);
        let err = client
            .compute_isochrones(&request(), &server.url())
            .await
            .unwrap_err();
        assert!(err.0.contains("502"), "unexpected error: {}", err.0);
    }

    #[tokio::test]
    async fn empty_feature_collection_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/otp/traveltime/isochrone")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(collection(vec![]))
            .create_async()
            .await;

        let client = test_client(&[15, 30]);
        let err = client
            .compute_isochrones(&request(), &server.url())
            .await
            .unwrap_err();
        assert!(err.0.contains("empty feature collection"));
    }
}
