//! Schema initialisation command.

use console::style;

use crate::config::Settings;
use crate::repository::DbContext;

/// Create the schema and verify PostGIS is available.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    let ctx = DbContext::new(&settings.database_url)?;

    println!("{} Initialising schema...", style("→").cyan());
    ctx.init_schema()
        .await
        .map_err(|e| anyhow::anyhow!("Schema initialisation failed: {}", e))?;

    println!("{} Database ready", style("✓").green());
    println!(
        "  Next: load data with {} and {}",
        style("reachmap ingest intersections <file>").bold(),
        style("reachmap ingest land <file>").bold()
    );
    Ok(())
}
