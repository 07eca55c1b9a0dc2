//! stuck-monitor: host process for the stuck-detection engine.
//!
//! Reads JSON-line requests from stdin, feeds them to the process-wide
//! engine, and writes responses plus engine events as JSON lines on stdout.
//! Logs go to stderr (or a file) so stdout stays a clean protocol stream.
//!
//! ## Subcommands
//!
//! - `serve`: run the engine and the line protocol until stdin closes
//! - `check-config`: validate a settings file and print the effective config

mod logging;
mod serve;
mod settings;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stuck-monitor")]
#[command(about = "Detects stalled task sessions and reports alerts")]
#[command(version)]
struct Cli {
    /// Write logs to this file instead of stderr
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine, reading requests from stdin
    Serve {
        /// Settings file (TOML); defaults to ~/.stuck-monitor/config.toml
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Validate a settings file and print the effective configuration
    CheckConfig {
        /// Settings file (TOML); defaults to ~/.stuck-monitor/config.toml
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    let _logging_guard = logging::init(cli.log_file.as_deref());

    match cli.command {
        Commands::Serve { config } => {
            if let Err(e) = serve::run(config) {
                tracing::error!(error = %e, "stuck-monitor serve failed");
                std::process::exit(1);
            }
        }
        Commands::CheckConfig { config } => match settings::effective_config(config) {
            Ok(config) => match serde_json::to_string_pretty(&config) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to render configuration");
                    std::process::exit(1);
                }
            },
            Err(e) => {
                tracing::error!(error = %e, "Configuration rejected");
                std::process::exit(1);
            }
        },
    }
}
