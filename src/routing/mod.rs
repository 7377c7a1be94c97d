//! Routing worker fleet directory and client.

mod client;

pub use client::{IsochroneRequest, RoutingClient, RoutingError};

use std::time::Duration;

/// Health-probe timeout; the probe is a liveness signal, not a routing call.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Static ordered list of routing worker base URLs.
///
/// The order is load-bearing: the orchestrator assigns origin `i` to worker
/// `i mod n`, so a stable list keeps each origin on the same worker across
/// repeated batches and keeps that worker's routing caches warm.
#[derive(Clone)]
pub struct WorkerFleet {
    base_urls: Vec<String>,
    probe: reqwest::Client,
}

impl WorkerFleet {
    pub fn new(base_urls: Vec<String>) -> Self {
        assert!(!base_urls.is_empty(), "worker fleet requires at least one URL");
        let probe = reqwest::Client::builder()
            .timeout(HEALTH_TIMEOUT)
            .build()
            .expect("Failed to create health-probe HTTP client");
        Self { base_urls, probe }
    }

    /// Number of workers in the fleet.
    pub fn len(&self) -> usize {
        self.base_urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base_urls.is_empty()
    }

    /// The worker assigned to lane `i` (wraps modulo fleet size).
    pub fn worker(&self, i: usize) -> &str {
        &self.base_urls[i % self.base_urls.len()]
    }

    /// Probe the first worker's root path. The routing graph takes minutes
    /// to load on a cold start, so callers poll this before batching.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/", self.base_urls[0]);
        match self.probe.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("worker health probe failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_assignment_wraps_modulo_fleet_size() {
        let fleet = WorkerFleet::new(vec![
            "http://w0".to_string(),
            "http://w1".to_string(),
            "http://w2".to_string(),
        ]);
        assert_eq!(fleet.worker(0), "http://w0");
        assert_eq!(fleet.worker(1), "http://w1");
        assert_eq!(fleet.worker(2), "http://w2");
        assert_eq!(fleet.worker(3), "http://w0");
        assert_eq!(fleet.worker(17), "http://w2");
    }

    #[tokio::test]
    async fn health_check_reports_fleet_state() {
        let mut server = mockito::Server::new_async().await;

        let up = server
            .mock("GET", "/")
            .with_status(200)
            .with_body("OK")
            .create_async()
            .await;
        let fleet = WorkerFleet::new(vec![server.url()]);
        assert!(fleet.health_check().await);
        up.assert_async().await;

        let down = server
            .mock("GET", "/")
            .with_status(503)
            .create_async()
            .await;
        assert!(!fleet.health_check().await);
        down.assert_async().await;
    }
}
