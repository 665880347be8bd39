//! # Slot Broker - Main Entry Point
//!
//! Two ways to run the broker:
//! - `serve`: the HTTP surface in front of the scheduling provider
//! - `sync-markers`: one behavioural marker reconciliation run, then exit
//!
//! Configuration comes from a YAML file (`--config`, `BROKER_CONFIG_PATH` or
//! `config/broker.yaml`) with `BROKER_*` environment overrides on top.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use slot_broker::crm::DynamicsCrmClient;
use slot_broker::observability::telemetry::{properties, BusinessEvent};
use slot_broker::observability::{init_logging, Telemetry, TracingTelemetry};
use slot_broker::sync::SyncReport;
use slot_broker::upstream::HttpBookingProvider;
use slot_broker::{AppState, BrokerConfig, BrokerResult, BrokerServer, SyncController};

#[derive(Debug, Parser)]
#[command(name = "slot-broker", version, about = "Regional booking-slot broker")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(
        short,
        long,
        env = "BROKER_CONFIG_PATH",
        default_value = "config/broker.yaml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server
    Serve,
    /// Push CRM behavioural markers to provider bookings once, then exit
    SyncMarkers,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match BrokerConfig::load_from_file(&cli.config).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Failed to load configuration from {}: {}",
                cli.config.display(),
                e
            );
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.logging);
    info!("Slot broker version: {}", env!("CARGO_PKG_VERSION"));

    let telemetry: Arc<dyn Telemetry> = Arc::new(TracingTelemetry);

    let result = match cli.command {
        Command::Serve => serve(&config, telemetry).await,
        Command::SyncMarkers => sync_markers(&config, telemetry).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Slot broker exited with error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn serve(config: &BrokerConfig, telemetry: Arc<dyn Telemetry>) -> BrokerResult<()> {
    let state = AppState::from_config(config, telemetry).await?;
    BrokerServer::new(config.server.clone(), state).start().await
}

async fn sync_markers(config: &BrokerConfig, telemetry: Arc<dyn Telemetry>) -> BrokerResult<()> {
    info!("Starting behavioural marker sync");

    match run_sync(config, telemetry.clone()).await {
        Ok(report) => {
            info!(
                total = report.total,
                synced = report.synced.len(),
                skipped = report.skipped.len(),
                "Behavioural marker sync complete"
            );
            Ok(())
        }
        Err(e) => {
            telemetry.event(
                BusinessEvent::BmsError,
                "Behavioural marker sync failed",
                properties([("error", e.to_string())]),
            );
            Err(e)
        }
    }
}

async fn run_sync(config: &BrokerConfig, telemetry: Arc<dyn Telemetry>) -> BrokerResult<SyncReport> {
    let crm = Arc::new(DynamicsCrmClient::from_config(&config.crm, telemetry.clone())?);
    let provider = Arc::new(HttpBookingProvider::from_config(&config.tcn, telemetry)?);
    SyncController::new(crm, provider).run().await
}
