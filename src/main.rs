use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use openarm_zenoh_bridge::config;
use openarm_zenoh_bridge::runtime::{self, BridgeOpts};

/// Joint-state bridge for the arm's serial actuator bus
#[derive(Parser, Debug)]
struct Args {
    /// Serial port of the actuator bus
    #[arg(long, default_value = config::DEFAULT_PORT)]
    port: String,

    /// Joint angle limits file (JSON, radians)
    #[arg(long, default_value = config::DEFAULT_LIMITS_PATH)]
    limits: PathBuf,

    /// Calibration store path
    #[arg(long, default_value = config::DEFAULT_CALIBRATION_PATH)]
    calibration: PathBuf,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let args = Args::parse();
    let opts = BridgeOpts {
        port: args.port,
        limits_path: args.limits,
        calibration_path: args.calibration,
    };

    if let Err(e) = runtime::run(opts).await {
        eprintln!("Bridge error: {}", e);
        std::process::exit(1);
    }
}
