//! Trafikväder daemon
//!
//! Usage:
//!   trafikvader --id 1401 --token <token>
//!   trafikvader --id 1401 --id 1402 --device station
//!   trafikvader --name Kalmar --schema 2 -c trafikvader.yaml

use anyhow::Context;
use std::sync::Arc;
use tokio::sync::watch;

use trafikvader::bus::{self, Transport};
use trafikvader::{Args, Config, Fetcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let args: Args = argh::from_env();

    if args.version {
        println!("trafikvader {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    log::info!("Starting trafikvader...");
    log::info!(
        "  Stations: {} {}",
        config.selector.field(),
        config.selector.values().join(", ")
    );
    log::info!("  Schema: {:?}, layout: {:?}", config.schema, config.layout);
    log::info!("  Poll interval: {}s", config.poll_interval.as_secs());
    log::info!("  MQTT broker: {} (client {})", config.mqtt.address, config.mqtt.client_id);

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    ctrlc::set_handler({
        let shutdown_tx = shutdown_tx.clone();
        move || {
            log::info!("Received Ctrl+C, shutting down gracefully...");
            shutdown_tx.send(()).ok();
        }
    })
    .context("failed to install signal handler")?;

    let fetcher = Fetcher::new(&config).context("failed to create HTTP client")?;
    let (transport, connection) =
        bus::mqtt::connect(&config.mqtt).context("failed to set up MQTT client")?;
    let transport: Arc<dyn Transport> = transport;

    if let Err(e) =
        trafikvader::lifecycle::run(&config, &fetcher, transport, connection, shutdown_rx).await
    {
        log::error!("{}", e);
        std::process::exit(1);
    }

    log::info!("trafikvader stopped.");
    Ok(())
}
