//! Web server command.

use console::style;

use crate::config::Settings;

/// Start the read-only API server.
pub async fn cmd_serve(settings: &Settings) -> anyhow::Result<()> {
    println!(
        "{} Starting reachmap API at http://0.0.0.0:{}",
        style("→").cyan(),
        settings.port
    );
    println!("  Press Ctrl+C to stop");

    crate::server::serve(settings).await
}
