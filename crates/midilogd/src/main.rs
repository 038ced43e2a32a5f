//! midilogd - capture a live MIDI input to session files
//!
//! Subcommands:
//! - `midilogd run` - Log the configured input port until Ctrl-C (default)
//! - `midilogd finalize [DIR]` - Patch track lengths of retrieved logs
//! - `midilogd ports` - List MIDI input ports
//! - `midilogd config` - Print the effective configuration

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use midilog::{finalize_dir, FinalizeOutcome};
use midilogconf::MidilogConfig;
use tracing::{debug, info};

mod capture;
mod input;
mod telemetry;

#[derive(Parser)]
#[command(name = "midilogd")]
#[command(about = "Capture live MIDI into single-track MIDI files")]
#[command(version)]
struct Cli {
    /// Config file (replaces ./midilog.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Log the configured input port until interrupted
    Run,

    /// Write real track lengths into captured logs
    Finalize {
        /// Directory holding the logs (defaults to paths.log_dir)
        dir: Option<PathBuf>,
    },

    /// List available MIDI input ports
    Ports,

    /// Print the effective configuration as TOML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = MidilogConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    telemetry::init(&config.infra.telemetry.log_level)?;
    debug!(
        "Config files: {:?}, env overrides: {:?}",
        sources.files, sources.env_overrides
    );

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to build runtime")?;
            info!("midilogd {} starting", env!("CARGO_PKG_VERSION"));
            runtime.block_on(capture::run(&config))?;
            info!("midilogd shutdown complete");
        }
        Commands::Finalize { dir } => {
            let dir = dir.unwrap_or_else(|| config.infra.paths.log_dir.clone());
            finalize(&dir)?;
        }
        Commands::Ports => {
            let ports = input::list_input_ports()?;
            if ports.is_empty() {
                println!("No MIDI input ports found");
            }
            for port in ports {
                println!("{:>3}  {}", port.index, port.name);
            }
        }
        Commands::Config => {
            print!("{}", config.to_toml());
        }
    }

    Ok(())
}

fn finalize(dir: &std::path::Path) -> Result<()> {
    let reports = finalize_dir(dir)
        .with_context(|| format!("Failed to read log directory {}", dir.display()))?;

    let mut failed = 0;
    for report in &reports {
        match &report.outcome {
            Ok(FinalizeOutcome::Patched { track_length, .. }) => {
                println!("{}: {} bytes", report.path.display(), track_length)
            }
            Ok(FinalizeOutcome::Skipped) => println!("{}: skipped", report.path.display()),
            Err(e) => {
                println!("{}: {}", report.path.display(), e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} logs could not be finalized", failed, reports.len());
    }
    Ok(())
}
