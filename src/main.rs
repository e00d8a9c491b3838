//! depguard
//!
//! Connects the application's broker and document store, keeps them healthy,
//! and shuts the process down when one of them cannot recover.
//!
//! # Architecture Overview
//!
//! ```text
//!   config (TOML + env) ──▶ logging / metrics
//!            │
//!            ▼
//!   ┌──────────────────────────── Registry ────────────────────────────┐
//!   │  broker   (lapin)    ── health ──┐                               │
//!   │  docstore (mongodb)  ── health ──┼──▶ CRITICAL? ──▶ disconnect_all │
//!   └──────────────────────────────────┼───────────────────────────────┘
//!                                      ▼
//!                               Shutdown(Critical) ──▶ exit 1
//!   SIGINT / SIGTERM ──▶ disconnect_all ──▶ exit 0
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use depguard::broker::{AmqpConnector, BrokerClient};
use depguard::config::{self, AppConfig};
use depguard::docstore::{DocStoreClient, MongoDriver};
use depguard::lifecycle::{wait_for_signal, Shutdown, ShutdownReason};
use depguard::observability::{logging, metrics};
use depguard::registry::Registry;

const BROKER: &str = "broker";
const DOCSTORE: &str = "docstore";

#[derive(Parser, Debug)]
#[command(name = "depguard", version, about = "Keeps broker and document-store connections alive")]
struct Cli {
    /// Path to a TOML config file. Defaults plus environment variables when omitted.
    #[arg(short, long, env = "DEPGUARD_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.config.as_deref() {
        Some(path) => config::load_config(path),
        None => config::from_env(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("depguard: {}", e);
            return ExitCode::FAILURE;
        }
    };

    logging::init_logging(&config.observability);
    tracing::info!(
        app = %config.app.name,
        environment = %config.app.environment,
        version = env!("CARGO_PKG_VERSION"),
        "depguard starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    match run(config).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: AppConfig) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let app = config.app.name.as_str();
    let shutdown = Shutdown::new();
    let mut shutdown_rx = shutdown.subscribe();
    let registry = Registry::new(shutdown.clone());

    let connector = AmqpConnector::new(&config.broker, config.app.environment)?;
    let broker = BrokerClient::new(
        BROKER,
        config.broker.clone(),
        config.liveness.max_reconnect(app, BROKER),
        Arc::new(connector),
    );
    registry.register(broker, BROKER)?;

    let driver = MongoDriver::new(&config.docstore, app).await?;
    let docstore = DocStoreClient::new(
        DOCSTORE,
        Arc::new(driver),
        config.docstore.connect_retry,
        config.liveness.max_reconnect(app, DOCSTORE),
    );
    registry.register(docstore, DOCSTORE)?;

    if let Err(e) = registry.connect_all().await {
        tracing::error!(error = %e, "Initial connect failed, shutting down");
        registry.disconnect_all().await;
        return Ok(ExitCode::FAILURE);
    }

    let reason = tokio::select! {
        result = wait_for_signal() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for shutdown signals");
            }
            registry.disconnect_all().await;
            ShutdownReason::Signal
        }
        received = shutdown_rx.recv() => match received {
            Ok(reason) => reason,
            Err(e) => {
                tracing::error!(error = %e, "Shutdown channel closed unexpectedly");
                registry.disconnect_all().await;
                ShutdownReason::Signal
            }
        },
    };

    tracing::info!(reason = %reason, "Shutdown complete");
    Ok(ExitCode::from(reason.exit_code() as u8))
}
