//! CLI parser and command dispatch.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Settings;

#[derive(Parser)]
#[command(name = "reachmap")]
#[command(about = "Pre-computed travel-time isochrone cache for the NY tri-state region")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialise the database schema (requires PostGIS)
    Init,

    /// Load reference data into the store
    Ingest {
        #[command(subcommand)]
        command: IngestCommands,
    },

    /// Pre-compute isochrones for pending intersections
    Batch {
        #[command(subcommand)]
        command: BatchCommands,
    },

    /// Start the read-only API server
    Serve {
        /// Port to listen on (overrides PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[derive(Subcommand)]
enum IngestCommands {
    /// Load intersections from a GeoJSON FeatureCollection of points
    Intersections {
        /// Path to the GeoJSON file
        file: PathBuf,
    },
    /// Load transit stops from a GTFS stops.txt
    Stops {
        /// Path to stops.txt
        file: PathBuf,
        /// Agency name recorded on each stop
        #[arg(long)]
        agency: String,
        /// Stop type (subway, bus, rail, ferry)
        #[arg(long, default_value = "subway")]
        stop_type: String,
    },
    /// Load the land boundary polygon used for clipping
    Land {
        /// Path to a GeoJSON (Multi)Polygon
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum BatchCommands {
    /// Run batches until the queue drains or the batch cap is reached
    Run {
        /// Travel mode (transit, transit-bike, bike, walk)
        #[arg(default_value = "transit")]
        mode: String,
        /// Departure time of day (HH:MM:SS)
        #[arg(default_value = "10:00:00")]
        time: String,
        /// Day type (weekday, saturday, sunday)
        #[arg(default_value = "weekday")]
        day_type: String,
        /// Concurrent origin computations
        #[arg(default_value = "15")]
        parallelism: usize,
    },
    /// Show queue progress for a cache key
    Status {
        #[arg(default_value = "transit")]
        mode: String,
        #[arg(default_value = "10:00:00")]
        time: String,
        #[arg(default_value = "weekday")]
        day_type: String,
    },
    /// Move failed origins back to pending
    Retry {
        #[arg(default_value = "transit")]
        mode: String,
        #[arg(default_value = "10:00:00")]
        time: String,
        #[arg(default_value = "weekday")]
        day_type: String,
    },
}

/// Parse arguments and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load();

    match cli.command {
        Commands::Init => commands::init::cmd_init(&settings).await,
        Commands::Ingest { command } => match command {
            IngestCommands::Intersections { file } => {
                commands::ingest::cmd_ingest_intersections(&settings, &file).await
            }
            IngestCommands::Stops {
                file,
                agency,
                stop_type,
            } => commands::ingest::cmd_ingest_stops(&settings, &file, &agency, &stop_type).await,
            IngestCommands::Land { file } => {
                commands::ingest::cmd_ingest_land(&settings, &file).await
            }
        },
        Commands::Batch { command } => match command {
            BatchCommands::Run {
                mode,
                time,
                day_type,
                parallelism,
            } => commands::batch::cmd_batch_run(&settings, &mode, &time, &day_type, parallelism)
                .await,
            BatchCommands::Status {
                mode,
                time,
                day_type,
            } => commands::batch::cmd_batch_status(&settings, &mode, &time, &day_type).await,
            BatchCommands::Retry {
                mode,
                time,
                day_type,
            } => commands::batch::cmd_batch_retry(&settings, &mode, &time, &day_type).await,
        },
        Commands::Serve { port } => {
            if let Some(port) = port {
                settings.port = port;
            }
            commands::serve::cmd_serve(&settings).await
        }
    }
}
