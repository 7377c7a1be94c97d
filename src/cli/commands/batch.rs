//! Batch pipeline commands.

use console::style;

use crate::batch::{wait_for_workers, BatchOrchestrator};
use crate::config::Settings;
use crate::models::PRIORITY_REGIONS;
use crate::repository::queue::PendingQuery;
use crate::repository::DbContext;

use super::parse_cache_key;

fn pending_query(settings: &Settings) -> PendingQuery {
    PendingQuery {
        priority_regions: PRIORITY_REGIONS.iter().map(|s| s.to_string()).collect(),
        required_bands: settings.cutoffs.len(),
        stale_secs: settings.stale_horizon.as_secs() as i64,
    }
}

/// Run the batch pipeline until the queue drains.
pub async fn cmd_batch_run(
    settings: &Settings,
    mode: &str,
    time: &str,
    day_type: &str,
    parallelism: usize,
) -> anyhow::Result<()> {
    let key = parse_cache_key(mode, time, day_type)?;

    let ctx = DbContext::new(&settings.database_url)?;
    ctx.test_connection()
        .await
        .map_err(|e| anyhow::anyhow!("Database unreachable: {}", e))?;

    let orchestrator = BatchOrchestrator::new(settings, &ctx);

    println!(
        "{} Batch run for {} on {} across {} workers, parallelism {}",
        style("→").cyan(),
        style(key).bold(),
        settings.date_for(key.day_type),
        orchestrator.fleet().len(),
        parallelism
    );

    wait_for_workers(
        orchestrator.fleet(),
        settings.health_attempts,
        settings.health_interval,
    )
    .await?;

    let total = ctx.intersections().count().await?;
    let summary = orchestrator.run_loop(&key, parallelism, total).await?;

    println!(
        "{} Finished after {} batches: {} completed, {} failed",
        style("✓").green(),
        summary.batches,
        summary.completed,
        summary.failed
    );
    if summary.failed > 0 {
        println!(
            "  Re-queue failures with {}",
            style(format!("reachmap batch retry {} {} {}", mode, time, day_type)).bold()
        );
    }
    Ok(())
}

/// Show queue progress for a cache key.
pub async fn cmd_batch_status(
    settings: &Settings,
    mode: &str,
    time: &str,
    day_type: &str,
) -> anyhow::Result<()> {
    let key = parse_cache_key(mode, time, day_type)?;
    let ctx = DbContext::new(&settings.database_url)?;
    let queue = ctx.queue();

    let total = ctx.intersections().count().await?;
    let cached = queue
        .cached_origin_count(&key, settings.cutoffs.len())
        .await?;
    let pending = queue.pending_count(&key, &pending_query(settings)).await?;
    let counts = queue.status_counts(&key).await?;

    println!("{}", style(format!("Batch status: {}", key)).bold());
    println!("{}", "-".repeat(40));
    let percent = if total > 0 {
        cached as f64 * 100.0 / total as f64
    } else {
        0.0
    };
    println!("  Cached origins: {}/{} ({:.1}%)", cached, total, percent);
    println!("  Pending selection: {}", pending);
    for (status, count) in &counts {
        println!("  {:<12} {}", format!("{}:", status), count);
    }

    let failures = queue.recent_failures(&key, 10).await?;
    if !failures.is_empty() {
        println!("\n{}", style("Recent failures").bold());
        for (origin_id, error) in failures {
            println!(
                "  #{:<8} {}",
                origin_id,
                error.unwrap_or_else(|| "(no message)".to_string())
            );
        }
    }
    Ok(())
}

/// Move failed origins back to pending.
pub async fn cmd_batch_retry(
    settings: &Settings,
    mode: &str,
    time: &str,
    day_type: &str,
) -> anyhow::Result<()> {
    let key = parse_cache_key(mode, time, day_type)?;
    let ctx = DbContext::new(&settings.database_url)?;

    let reset = ctx.queue().reset_failed(&key).await?;
    if reset == 0 {
        println!("{} No failed origins for {}", style("!").yellow(), key);
    } else {
        println!(
            "{} Reset {} failed origins to pending; rerun {}",
            style("✓").green(),
            reset,
            style(format!("reachmap batch run {} {} {}", mode, time, day_type)).bold()
        );
    }
    Ok(())
}
