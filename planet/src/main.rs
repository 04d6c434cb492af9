//! Local satellite network binary.
//!
//! Provisions the configured number of satellites, runs them until Ctrl-C or
//! until one fails, then shuts every satellite down.
//!
//! # Usage
//!
//! ```bash
//! cargo run --package planet -- run --config planet.toml
//! cargo run --package planet -- run --satellites 2 --log-level debug
//! cargo run --package planet -- run --satellite-config satellite.toml
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use slog::{Drain, Logger, o};

use planet::{Planet, PlanetConfig, Reconfigure};

#[derive(Parser, Debug)]
#[command(name = "planet")]
#[command(about = "Runs a local network of satellites")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Provision and run satellites
    Run {
        /// Path to the planet configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Satellite config file used as the template for every satellite
        #[arg(long)]
        satellite_config: Option<PathBuf>,

        /// Override the number of satellites
        #[arg(long)]
        satellites: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let logger = create_logger(&args.log_level);

    match args.command {
        Command::Run {
            config,
            satellite_config,
            satellites,
        } => run(logger, config, satellite_config, satellites).await,
    }
}

async fn run(
    logger: Logger,
    config: Option<PathBuf>,
    satellite_config: Option<PathBuf>,
    satellites: Option<usize>,
) -> Result<()> {
    let mut config = match &config {
        Some(path) => PlanetConfig::from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => PlanetConfig::default(),
    };
    if let Some(path) = &satellite_config {
        config = config.with_satellite_template(path).with_context(|| {
            format!("Failed to load satellite config from {}", path.display())
        })?;
    }
    if let Some(count) = satellites {
        config.satellite_count = count;
    }
    let count = config.satellite_count;

    let mut planet = Planet::new(logger.clone(), config, Reconfigure::default())
        .context("Failed to create planet")?;

    if let Err(err) = planet.new_satellites(count).await {
        if let Err(shutdown_err) = planet.shutdown().await {
            slog::warn!(logger, "Shutdown after failed provisioning reported errors"; "error" => %shutdown_err);
        }
        return Err(err).context("Failed to provision satellites");
    }
    for satellite in planet.satellites() {
        slog::info!(logger, "Satellite ready";
            "label" => satellite.label(),
            "url" => satellite.url(),
            "private" => satellite.private_addr(),
            "console" => %satellite.console.listener.addr(),
            "admin" => %satellite.admin.addr(),
            "dir" => %satellite.storage_dir().display());
    }

    planet.start();
    slog::info!(logger, "Planet running, press Ctrl-C to stop"; "satellites" => count);

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            slog::info!(logger, "Shutdown signal received");
        }
        Some((label, result)) = planet.wait_any() => {
            match result {
                Ok(()) => slog::warn!(logger, "Satellite stopped unexpectedly"; "label" => &label),
                Err(err) => slog::error!(logger, "Satellite failed"; "label" => &label, "error" => %err),
            }
        }
    }

    planet.shutdown().await.context("Shutdown failed")?;
    slog::info!(logger, "Planet stopped");
    Ok(())
}

fn create_logger(level: &str) -> Logger {
    use slog::Level;
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::Trace,
        "debug" => Level::Debug,
        "info" => Level::Info,
        "warn" => Level::Warning,
        "error" => Level::Error,
        _ => Level::Info,
    };

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog::LevelFilter::new(drain, level).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!("version" => env!("CARGO_PKG_VERSION")))
}
