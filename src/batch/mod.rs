//! Batch orchestrator.
//!
//! Drives the routing client over the pending-origin queue with worker
//! affinity and records every outcome through the store. Within one origin
//! the writes are strictly ordered (mark processing → save bands → mark
//! completed) on the same task; across origins there is no ordering.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;

use crate::config::Settings;
use crate::models::{BandMap, CacheKey, Intersection, PRIORITY_REGIONS};
use crate::repository::queue::PendingQuery;
use crate::repository::{BatchQueueRepository, DbContext, IsochroneRepository};
use crate::routing::{IsochroneRequest, RoutingClient, WorkerFleet};

/// Literal recorded when the largest band comes back without coordinates.
pub const EMPTY_ISOCHRONE_ERROR: &str = "Empty isochrone - no reachable area";

/// Outcome counters for one batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchOutcome {
    pub selected: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Summary of a full batch loop run.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoopSummary {
    pub batches: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Poll the fleet's health probe until it answers or attempts run out.
///
/// The routing graph takes minutes to load on a cold start; hammering an
/// unready fleet just burns the timeout budget.
pub async fn wait_for_workers(
    fleet: &WorkerFleet,
    attempts: u32,
    interval: Duration,
) -> anyhow::Result<()> {
    for attempt in 1..=attempts {
        if fleet.health_check().await {
            println!("{} Routing workers ready", style("✓").green());
            return Ok(());
        }
        println!(
            "{} Waiting for routing workers ({}/{})...",
            style("→").cyan(),
            attempt,
            attempts
        );
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    anyhow::bail!(
        "Routing worker fleet not healthy after {} attempts",
        attempts
    )
}

/// Pair selected origins with worker lanes.
///
/// Origin at index `i` in selection order goes to worker `i mod N`, so a
/// stable pending set sends each origin to the same worker across batches
/// and that worker's routing caches stay warm. No work-stealing: a slow
/// worker slows its own lane only.
fn pair_with_workers<'a>(
    origins: &'a [Intersection],
    fleet: &'a WorkerFleet,
) -> Vec<(&'a Intersection, &'a str)> {
    origins
        .iter()
        .enumerate()
        .map(|(i, origin)| (origin, fleet.worker(i)))
        .collect()
}

/// The largest cutoff must come back with coordinates; an empty largest
/// band means the worker truncated its search.
fn validate_bands(bands: &BandMap, max_cutoff: u32) -> Result<(), &'static str> {
    match bands.get(&max_cutoff) {
        Some(geometry) if !crate::geometry::has_empty_coordinates(geometry) => Ok(()),
        _ => Err(EMPTY_ISOCHRONE_ERROR),
    }
}

/// Orchestrates batches for one cache key.
pub struct BatchOrchestrator {
    fleet: WorkerFleet,
    client: RoutingClient,
    queue: BatchQueueRepository,
    isochrones: IsochroneRepository,
    batch_size: usize,
    max_batches: usize,
    required_bands: usize,
    max_cutoff: u32,
    stale_secs: i64,
}

impl BatchOrchestrator {
    pub fn new(settings: &Settings, ctx: &DbContext) -> Self {
        let max_cutoff = settings
            .cutoffs
            .iter()
            .copied()
            .max()
            .unwrap_or(crate::models::MAX_CUTOFF_MINUTES);
        Self {
            fleet: WorkerFleet::new(settings.routing_workers.clone()),
            client: RoutingClient::new(settings),
            queue: ctx.queue(),
            isochrones: ctx.isochrones(),
            batch_size: settings.batch_size,
            max_batches: settings.max_batches,
            required_bands: settings.cutoffs.len(),
            max_cutoff,
            stale_secs: settings.stale_horizon.as_secs() as i64,
        }
    }

    pub fn fleet(&self) -> &WorkerFleet {
        &self.fleet
    }

    fn pending_query(&self) -> PendingQuery {
        PendingQuery {
            priority_regions: PRIORITY_REGIONS.iter().map(|s| s.to_string()).collect(),
            required_bands: self.required_bands,
            stale_secs: self.stale_secs,
        }
    }

    /// Run one batch: select, dispatch with affinity, record outcomes.
    pub async fn run_batch(
        &self,
        key: &CacheKey,
        parallelism: usize,
    ) -> anyhow::Result<BatchOutcome> {
        let origins = self
            .queue
            .get_pending(key, &self.pending_query(), self.batch_size as i64)
            .await?;
        if origins.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let pairs = pair_with_workers(&origins, &self.fleet);
        let selected = pairs.len();

        let completed = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));

        let pb = ProgressBar::new(selected as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );

        let mut handles = Vec::with_capacity(selected);
        for (origin, worker) in pairs {
            let origin = origin.clone();
            let worker = worker.to_string();
            let key = *key;
            let queue = self.queue.clone();
            let isochrones = self.isochrones.clone();
            let client = self.client.clone();
            let max_cutoff = self.max_cutoff;
            let completed = completed.clone();
            let failed = failed.clone();
            let semaphore = semaphore.clone();
            let pb = pb.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let outcome = process_origin(
                    &origin, &worker, &key, &client, &queue, &isochrones, max_cutoff,
                )
                .await;
                match outcome {
                    Ok(()) => {
                        completed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        tracing::warn!("origin {} failed: {}", origin.id, e);
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
                pb.inc(1);
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
        pb.finish_and_clear();

        Ok(BatchOutcome {
            selected,
            completed: completed.load(Ordering::Relaxed),
            failed: failed.load(Ordering::Relaxed),
        })
    }

    /// Run batches until the queue drains or the batch cap is reached,
    /// printing per-batch progress.
    pub async fn run_loop(
        &self,
        key: &CacheKey,
        parallelism: usize,
        total_origins: i64,
    ) -> anyhow::Result<LoopSummary> {
        let mut summary = LoopSummary::default();

        for batch_no in 1..=self.max_batches {
            let before = self
                .queue
                .cached_origin_count(key, self.required_bands)
                .await?;
            let start = Instant::now();

            let outcome = self.run_batch(key, parallelism).await?;
            if outcome.selected == 0 {
                println!("{} Queue drained, nothing pending", style("✓").green());
                break;
            }

            summary.batches = batch_no;
            summary.completed += outcome.completed;
            summary.failed += outcome.failed;

            let after = self
                .queue
                .cached_origin_count(key, self.required_bands)
                .await?;
            let remaining = self.queue.pending_count(key, &self.pending_query()).await?;
            let elapsed = start.elapsed().as_secs_f64();
            let rate = if elapsed > 0.0 {
                outcome.completed as f64 / elapsed
            } else {
                0.0
            };

            println!(
                "{} Batch {}: {}/{} cached (+{}, {:.1}/s), {} failed, {} remaining",
                style("→").cyan(),
                batch_no,
                after,
                total_origins,
                after - before,
                rate,
                outcome.failed,
                remaining
            );
        }

        Ok(summary)
    }
}

/// One origin's pipeline. The three store writes happen strictly in order
/// on this task.
async fn process_origin(
    origin: &Intersection,
    worker: &str,
    key: &CacheKey,
    client: &RoutingClient,
    queue: &BatchQueueRepository,
    isochrones: &IsochroneRepository,
    max_cutoff: u32,
) -> anyhow::Result<()> {
    queue.mark_processing(origin.id, key).await?;

    let request = IsochroneRequest {
        lat: origin.lat,
        lng: origin.lng,
        mode: key.mode,
        departure: key.departure,
        day_type: key.day_type,
    };

    let bands = match client.compute_isochrones(&request, worker).await {
        Ok(bands) => bands,
        Err(e) => {
            queue.mark_failed(origin.id, key, &e.to_string()).await?;
            anyhow::bail!("routing error: {}", e);
        }
    };

    if let Err(reason) = validate_bands(&bands, max_cutoff) {
        queue.mark_failed(origin.id, key, reason).await?;
        anyhow::bail!("{}", reason);
    }

    match isochrones.save(origin.id, key, &bands).await {
        Ok(saved) => {
            tracing::debug!("origin {}: saved {} bands via {}", origin.id, saved, worker);
        }
        Err(e) => {
            // Best effort; if this transition also fails the processing row
            // ages past the stale horizon and the origin is re-selected.
            let _ = queue.mark_failed(origin.id, key, &e.to_string()).await;
            anyhow::bail!("persistence error: {}", e);
        }
    }

    queue.mark_completed(origin.id, key).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn origin(id: i32) -> Intersection {
        Intersection {
            id,
            osm_node_id: id as i64,
            name: None,
            lat: 40.75,
            lng: -73.99,
            borough: "Manhattan".to_string(),
            sample_group: 0,
        }
    }

    fn polygon() -> serde_json::Value {
        json!({
            "type": "Polygon",
            "coordinates": [[
                [-74.0, 40.7], [-73.9, 40.7], [-73.9, 40.8], [-74.0, 40.7]
            ]]
        })
    }

    #[test]
    fn affinity_assigns_by_index_mod_fleet_size() {
        let fleet = WorkerFleet::new((0..15).map(|i| format!("http://w{}", i)).collect());
        let origins: Vec<Intersection> = (1..=30).map(origin).collect();

        let pairs = pair_with_workers(&origins, &fleet);
        assert_eq!(pairs.len(), 30);
        for (i, (origin, worker)) in pairs.iter().enumerate() {
            assert_eq!(*worker, format!("http://w{}", i % 15));
            assert_eq!(origin.id, (i + 1) as i32);
        }

        // Stable selection order implies stable assignment across runs.
        let again = pair_with_workers(&origins, &fleet);
        for (a, b) in pairs.iter().zip(again.iter()) {
            assert_eq!(a.1, b.1);
        }
    }

    #[test]
    fn validation_rejects_empty_or_missing_largest_band() {
        let mut bands = BandMap::new();
        for cutoff in [15u32, 30, 45, 60, 90, 120, 150] {
            bands.insert(cutoff, polygon());
        }
        // 180-minute band missing entirely.
        assert_eq!(validate_bands(&bands, 180), Err(EMPTY_ISOCHRONE_ERROR));

        // Present but without coordinates.
        bands.insert(180, json!({"type": "Polygon", "coordinates": []}));
        assert_eq!(validate_bands(&bands, 180), Err(EMPTY_ISOCHRONE_ERROR));

        bands.insert(180, polygon());
        assert_eq!(validate_bands(&bands, 180), Ok(()));
    }
}
