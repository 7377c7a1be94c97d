//! Reference data loading commands.

use std::path::Path;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::Settings;
use crate::ingest::{extract_land_geometry, parse_gtfs_stops, parse_intersections};
use crate::repository::DbContext;

fn upsert_progress(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb
}

/// Load intersections from a GeoJSON FeatureCollection.
pub async fn cmd_ingest_intersections(settings: &Settings, file: &Path) -> anyhow::Result<()> {
    let contents = tokio::fs::read_to_string(file).await?;
    let records = parse_intersections(&contents)?;
    if records.is_empty() {
        anyhow::bail!("No usable intersection features in {}", file.display());
    }

    let ctx = DbContext::new(&settings.database_url)?;
    let repo = ctx.intersections();

    let pb = upsert_progress(records.len() as u64);
    let mut loaded = 0usize;
    let mut failed = 0usize;
    for record in &records {
        match repo.upsert(record).await {
            Ok(()) => loaded += 1,
            Err(e) => {
                tracing::warn!("failed to upsert node {}: {}", record.osm_node_id, e);
                failed += 1;
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    println!(
        "{} Loaded {} intersections from {}",
        style("✓").green(),
        loaded,
        file.display()
    );
    if failed > 0 {
        println!("{} {} rows failed (see log)", style("!").yellow(), failed);
    }
    Ok(())
}

/// Load transit stops from a GTFS stops.txt.
pub async fn cmd_ingest_stops(
    settings: &Settings,
    file: &Path,
    agency: &str,
    stop_type: &str,
) -> anyhow::Result<()> {
    let contents = tokio::fs::read_to_string(file).await?;
    let stops = parse_gtfs_stops(&contents, agency, stop_type)?;
    if stops.is_empty() {
        anyhow::bail!("No usable stops in {}", file.display());
    }

    let ctx = DbContext::new(&settings.database_url)?;
    let repo = ctx.stops();

    let pb = upsert_progress(stops.len() as u64);
    let mut loaded = 0usize;
    for stop in &stops {
        match repo.upsert(stop).await {
            Ok(()) => loaded += 1,
            Err(e) => tracing::warn!("failed to upsert stop {}: {}", stop.gtfs_stop_id, e),
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    println!(
        "{} Loaded {} {} stops for {}",
        style("✓").green(),
        loaded,
        stop_type,
        agency
    );
    Ok(())
}

/// Replace the land boundary used for clipping.
pub async fn cmd_ingest_land(settings: &Settings, file: &Path) -> anyhow::Result<()> {
    let contents = tokio::fs::read_to_string(file).await?;
    let geometry = extract_land_geometry(&contents)?;

    let ctx = DbContext::new(&settings.database_url)?;
    ctx.isochrones()
        .replace_land_boundary(&geometry.to_string())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load land boundary: {}", e))?;

    println!(
        "{} Land boundary loaded from {}",
        style("✓").green(),
        file.display()
    );
    Ok(())
}
