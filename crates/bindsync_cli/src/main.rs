//! bindsync CLI
//!
//! Command-line tools for operating a bindsync binding store.
//!
//! # Commands
//!
//! - `inspect` - List bindings, filtered by backend, model, local or external id
//! - `verify` - Re-check the uniqueness constraints of a store
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// bindsync binding store tools.
#[derive(Parser)]
#[command(name = "bindsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List bindings
    Inspect {
        /// Only bindings of this backend
        #[arg(short, long)]
        backend: Option<u32>,

        /// Only bindings of this model
        #[arg(short, long)]
        model: Option<String>,

        /// Only the binding of this local record
        #[arg(short, long)]
        local_id: Option<u64>,

        /// Only the binding of this remote record
        #[arg(short, long)]
        external_id: Option<u64>,

        /// Only bindings not yet exported
        #[arg(short, long)]
        unexported: bool,

        /// Include soft-deleted bindings
        #[arg(short, long)]
        inactive: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify the uniqueness constraints of a store
    Verify,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect {
            backend,
            model,
            local_id,
            external_id,
            unexported,
            inactive,
            format,
        } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            let query = commands::inspect::Query {
                backend,
                model,
                local_id,
                external_id,
                unexported,
                inactive,
            };
            commands::inspect::run(&path, &query, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Version => {
            println!("bindsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("bindsync engine v{}", bindsync_engine::VERSION);
        }
    }

    Ok(())
}
