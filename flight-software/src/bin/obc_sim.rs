//! Run the mission executive on mock hardware.
//!
//! Mission time is driven from the host clock, optionally accelerated, and
//! state files are kept in a host directory so the clock survives restarts.
//! Prometheus metrics are served on `/metrics`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use flight_software::adcs::{AdcsMode, CommandedAdcs};
use flight_software::experiments::FiboExperiment;
use flight_software::metrics;
use flight_software::{AntennaHardware, MissionConfig, Obc, ObcHardware};
use hardware::fram::Fram;
use hardware::mock::{MemoryFram, MockAntennaDriver, MockI2cBus, MockPowerControl, MockRtc};
use shared::fs::DirFileSystem;
use tracing::{info, warn};

const FRAM_SIZE: usize = 8 * 1024;
const CLOCK_STEP: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(author, version, about = "Run the OBC mission executive on mock hardware")]
struct Args {
    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// JSON file overriding mission configuration defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the persisted state files
    #[arg(short, long, default_value = "obc-data")]
    data_dir: PathBuf,

    /// Port of the metrics HTTP server
    #[arg(short, long, default_value = "9100")]
    metrics_port: u16,

    /// Mission time acceleration factor
    #[arg(short, long, default_value = "1")]
    speed: u32,

    /// Drive the antennas through the I2C miniport protocol on a mock bus
    #[arg(long)]
    i2c_antenna: bool,

    /// Experiment code to request once the executive is running
    #[arg(short, long)]
    experiment: Option<u8>,
}

fn load_config(path: Option<&PathBuf>) -> Result<MissionConfig> {
    let Some(path) = path else {
        return Ok(MissionConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Unable to read {}", path.display()))?;
    MissionConfig::from_json(&text).with_context(|| format!("Invalid config {}", path.display()))
}

fn mock_hardware(args: &Args) -> ObcHardware {
    let antenna = if args.i2c_antenna {
        AntennaHardware::Bus(Arc::new(MockI2cBus::new()))
    } else {
        AntennaHardware::Driver(Arc::new(MockAntennaDriver::new()))
    };

    ObcHardware {
        fs: Arc::new(DirFileSystem::with_path(args.data_dir.clone())),
        power: Arc::new(MockPowerControl::new()),
        antenna,
        fram: [0, 1, 2].map(|_| Arc::new(MemoryFram::new(FRAM_SIZE)) as Arc<dyn Fram>),
        rtc: Arc::new(MockRtc::new(Duration::ZERO)),
        adcs: Arc::new(CommandedAdcs::new(AdcsMode::Detumbling)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let config = load_config(args.config.as_ref())?;
    info!("Mission configuration: {config:?}");

    let obc = Arc::new(Obc::new(mock_hardware(&args), config)?);
    let handle = obc.start()?;

    if let Some(code) = args.experiment {
        if code != FiboExperiment::CODE {
            warn!("Experiment {code} is not registered");
        }
        obc.request_experiment(code);
    }

    let clock = {
        let obc = obc.clone();
        let step = CLOCK_STEP * args.speed.max(1);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLOCK_STEP);
            loop {
                interval.tick().await;
                obc.advance_time(step);
            }
        })
    };

    let address = format!("0.0.0.0:{}", args.metrics_port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Unable to bind {address}"))?;
    info!("Serving metrics on http://{address}/metrics");

    axum::serve(listener, metrics::router(obc.metrics().clone()))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Unable to listen for Ctrl-C: {e}");
            }
        })
        .await?;

    info!("Shutting down");
    clock.abort();
    tokio::task::spawn_blocking(move || handle.shutdown()).await?;

    let info = obc.experiment_info();
    info!(
        "Boot #{}, {} passes, {} experiments completed",
        obc.boot_index(),
        obc.metrics().passes(),
        info.iteration_counter
    );
    Ok(())
}
