// src/main.rs
// Entry point for the personnel RAKF localization service: loads
// configuration, builds one RakfLocalizer per `rakf` tracker, wires
// transports and persistence, and runs the service loop until SIGHUP
// triggers a config reload or Ctrl-C requests shutdown.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};
use tokio_util::sync::CancellationToken;

use personnel_rakf::config;
use personnel_rakf::error::ServiceError;
use personnel_rakf::persistence::{RedisStateStore, StateStore};
use personnel_rakf::service;
use personnel_rakf::transport::{LapinTransport, Transport};

/// Personnel localization service driven by a RAKF estimator per tag axis.
#[derive(Debug, Parser)]
#[command(name = "personnel-rakf")]
struct Cli {
    /// Path to the YAML localization configuration.
    #[arg(short, long)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    info!("starting personnel-rakf localization service");

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("fatal error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), ServiceError> {
    loop {
        let localization = config::load(&cli.config)?;
        info!(
            "loaded configuration version {} with {} tracker(s)",
            localization.version,
            localization.trackers.len()
        );

        let trackers = service::build_trackers(&localization.trackers)?;

        let transport: Arc<dyn Transport> = connect_transport(&localization.trackers).await?;
        let store: Option<Arc<dyn StateStore>> = connect_store(&localization.trackers).await?;

        subscribe_trackers(&localization.trackers, &trackers, transport.as_ref()).await?;

        let shutdown = CancellationToken::new();
        let signal_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received shutdown signal");
                signal_shutdown.cancel();
            }
        });

        #[cfg(unix)]
        let reload = {
            let reload_token = CancellationToken::new();
            let signal_reload = reload_token.clone();
            tokio::spawn(async move {
                if let Ok(mut hangup) =
                    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
                {
                    hangup.recv().await;
                    info!("received SIGHUP, reloading configuration");
                    signal_reload.cancel();
                }
            });
            reload_token
        };
        #[cfg(not(unix))]
        let reload = CancellationToken::new();

        let combined = shutdown.clone();
        let combined_reload = reload.clone();
        tokio::spawn(async move {
            combined_reload.cancelled().await;
            combined.cancel();
        });

        service::run(trackers, transport, store, shutdown.clone()).await;

        if !reload.is_cancelled() {
            break;
        }
        info!("config reload requested, re-entering outer loop");
    }

    Ok(())
}

async fn connect_transport(
    trackers: &[config::TrackerConfig],
) -> Result<Arc<dyn Transport>, ServiceError> {
    let uri = trackers
        .iter()
        .flat_map(|t| t.protocol.subscribers.iter().chain(&t.protocol.publishers))
        .next()
        .map(|endpoint| endpoint.uri.clone())
        .unwrap_or_else(|| "amqp://127.0.0.1:5672/%2f".to_string());

    let transport = LapinTransport::connect(&uri).await?;
    Ok(Arc::new(transport))
}

/// Binds every `rakf` tracker's ingest queue to its configured subscriber
/// exchanges, so inbound AMQP deliveries land in the queue the service loop
/// drains each tick.
async fn subscribe_trackers(
    tracker_configs: &[config::TrackerConfig],
    trackers: &[service::Tracker],
    transport: &dyn Transport,
) -> Result<(), ServiceError> {
    let rakf_configs = tracker_configs.iter().filter(|t| t.algorithm.kind == "rakf");

    for (tracker_config, tracker) in rakf_configs.zip(trackers) {
        for endpoint in &tracker_config.protocol.subscribers {
            let queue = Arc::clone(&tracker.queue);
            transport
                .subscribe(&endpoint.exchange, Box::new(move |record| queue.push_record(record)))
                .await?;
        }
    }
    Ok(())
}

async fn connect_store(
    trackers: &[config::TrackerConfig],
) -> Result<Option<Arc<dyn StateStore>>, ServiceError> {
    let db_config = trackers.iter().find_map(|t| t.in_mem_db.as_ref());
    match db_config {
        None => Ok(None),
        Some(db) => {
            let password = db.credentials.as_ref().map(|c| c.password.as_str());
            let store = RedisStateStore::connect(&db.server.address, db.server.port, password).await?;
            Ok(Some(Arc::new(store)))
        }
    }
}
