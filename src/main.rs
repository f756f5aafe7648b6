//! Network lab CLI
//!
//! Runs built-in or JSON-described scenarios on Linux network namespaces
//! (or the in-memory simulator) and records probe results.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{cmd_check, cmd_list, cmd_run, cmd_show, load_config, RunOverrides};
use netlab::Backend;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Lab configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario from file or preset and save probe results
    Run {
        /// Scenario file path (JSON) or preset name
        scenario: String,

        /// Result file (overrides the scenario's own)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Substrate to build the topology on
        #[arg(long, value_enum)]
        backend: Option<Backend>,

        /// Run ip/tc/sysctl through `sudo -n`
        #[arg(long)]
        sudo: bool,

        /// Seconds to wait for each probe reply
        #[arg(long)]
        wait: Option<u64>,
    },

    /// List available scenarios and presets
    List,

    /// Print a scenario as JSON
    Show {
        /// Scenario file path (JSON) or preset name
        scenario: String,
    },

    /// Check whether network namespaces can be created
    Check {
        /// Check access through `sudo -n`
        #[arg(long)]
        sudo: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            scenario,
            output,
            backend,
            sudo,
            wait,
        } => {
            let config = load_config(cli.config.as_deref()).await?;
            let overrides = RunOverrides {
                output,
                backend,
                sudo,
                wait,
            };
            cmd_run(config, &scenario, overrides).await?;
        }
        Commands::List => {
            cmd_list()?;
        }
        Commands::Show { scenario } => {
            cmd_show(&scenario).await?;
        }
        Commands::Check { sudo } => {
            let config = load_config(cli.config.as_deref()).await?;
            let config = RunOverrides {
                sudo,
                ..Default::default()
            }
            .apply(config);
            cmd_check(&config)?;
        }
    }

    Ok(())
}
