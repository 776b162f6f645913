//! CLI Entry Point for spectro-daq
//!
//! Drives the session controller against the simulated spectrometer:
//! - `discover` lists the monochromators and detectors in the catalog
//! - `run` connects, initializes, applies the configured parameters and acquires
//! - `config` prints the effective configuration after file and environment merging
//!
//! # Usage
//!
//! ```bash
//! spectro-daq discover
//! spectro-daq run --acquisitions 3 --json
//! spectro-daq --config config/spectro.toml run
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use spectro_daq::config::{SpectroConfig, DEFAULT_CONFIG_PATH};
use spectro_daq::hardware::mock::MockSpectrometer;
use spectro_daq::hardware::DeviceKind;
use spectro_daq::logging;
use spectro_daq::session::SessionController;
use spectro_daq::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "spectro-daq")]
#[command(about = "Monochromator + CCD session control", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the units reported by the catalog
    Discover,

    /// Print the effective configuration as TOML
    Config,

    /// Connect, initialize, apply parameters and acquire
    Run {
        /// Number of acquisitions
        #[arg(long, default_value = "1")]
        acquisitions: u32,

        /// Print acquisition summaries as JSON lines
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = SpectroConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    logging::init_from_config(&config)?;
    info!(application = %config.application.name, "Starting");

    let proxy = Arc::new(MockSpectrometer::from_config(&config.simulation));
    let controller = SessionController::new(proxy, config.session.clone());

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Discover => discover(&controller).await,
        Commands::Run { acquisitions, json } => {
            let outcome = run(&controller, &config, acquisitions, json).await;
            if let Err(e) = controller.teardown().await {
                warn!(error = %e, "Teardown failed");
            }
            outcome
        }
    }
}

async fn discover(controller: &SessionController) -> Result<()> {
    let catalog = controller.discover().await?;
    for kind in [DeviceKind::Monochromator, DeviceKind::Detector] {
        println!("{} ({}):", kind, catalog.count(kind));
        for device in catalog.devices(kind) {
            println!("  {}", device);
        }
    }
    Ok(())
}

async fn run(
    controller: &SessionController,
    config: &SpectroConfig,
    acquisitions: u32,
    json: bool,
) -> Result<()> {
    controller.select_and_connect().await?;
    controller.initialize_and_wait().await?;

    if let Some(caps) = controller.capabilities().await {
        info!(chip = ?caps.chip_geometry(), "Detector ready");
    }

    // Partial application leaves the session Ready; acquire with what was accepted.
    if let Err(e) = controller.apply_parameters(&config.acquisition).await {
        if e.kind() != ErrorKind::PartialApply {
            return Err(e.into());
        }
        warn!(error = %e, "Continuing with partially applied parameters");
    }

    let timeout = config.session.acquisition_timeout();
    for n in 1..=acquisitions {
        let result = controller.acquire(timeout).await?;
        let summary = result.summary();
        if json {
            println!("{}", serde_json::to_string(&summary)?);
        } else {
            println!(
                "#{n}: {} samples ({}x{}), min {:.1}, max {:.1}, mean {:.1}",
                summary.samples, summary.width, summary.height, summary.min, summary.max, summary.mean
            );
        }
    }

    Ok(())
}
