//! # roomcast
//!
//! Binary entry point. `roomcast serve` runs a gateway instance;
//! `roomcast broker` runs the standalone TCP broker that instances share.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use roomcast_broker::{Broker, BrokerServer, MemoryBroker, TcpBroker};
use roomcast_hub::Coordinator;
use roomcast_server::{hub_config, RelayServer, ServerConfig};
use roomcast_settings::{BrokerKind, BrokerSettings, RoomcastSettings};
use roomcast_telemetry::{init_telemetry, TelemetryConfig};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Room-scoped WebSocket broadcast service.
#[derive(Parser, Debug)]
#[command(name = "roomcast", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a gateway instance.
    Serve {
        /// Settings file (defaults to `$ROOMCAST_CONFIG` or `./roomcast.json`).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Host to bind (overrides settings).
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (overrides settings).
        #[arg(long)]
        port: Option<u16>,
        /// `memory` or `tcp://HOST:PORT` (overrides settings).
        #[arg(long)]
        broker: Option<String>,
    },
    /// Run the standalone TCP broker.
    Broker {
        /// Address to listen on.
        #[arg(long, default_value = "127.0.0.1:7400")]
        listen: String,
        /// Log filter directive.
        #[arg(long, default_value = "info")]
        log_level: String,
    },
}

/// Parse a `--broker` value into broker settings.
fn apply_broker_arg(settings: &mut BrokerSettings, arg: &str) -> Result<()> {
    if arg.eq_ignore_ascii_case("memory") {
        settings.kind = BrokerKind::Memory;
    } else if let Some(addr) = arg.strip_prefix("tcp://") {
        if addr.is_empty() {
            bail!("--broker tcp:// needs an address");
        }
        settings.kind = BrokerKind::Tcp;
        addr.clone_into(&mut settings.address);
    } else {
        bail!("unknown --broker '{arg}', expected 'memory' or 'tcp://HOST:PORT'");
    }
    Ok(())
}

fn build_broker(settings: &BrokerSettings) -> Arc<dyn Broker> {
    match settings.kind {
        BrokerKind::Memory => Arc::new(MemoryBroker::new()),
        BrokerKind::Tcp => Arc::new(
            TcpBroker::new(settings.address.clone())
                .with_connect_timeout(Duration::from_millis(settings.connect_timeout_ms)),
        ),
    }
}

async fn serve(settings: RoomcastSettings) -> Result<()> {
    let broker = build_broker(&settings.broker);
    let coordinator = Coordinator::new(broker, hub_config(&settings.hub));
    info!(
        instance = %coordinator.instance_id(),
        broker = %settings.broker.kind,
        "starting roomcast"
    );
    let supervisor = coordinator.start();

    let mut server = RelayServer::new(ServerConfig::from_settings(&settings.server), coordinator);
    match roomcast_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => warn!(error = %e, "metrics disabled"),
    }

    let (addr, serve_task) = server
        .listen()
        .await
        .with_context(|| format!("failed to bind {}:{}", settings.server.host, settings.server.port))?;
    info!(%addr, "ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested");

    server.shutdown().drain(vec![serve_task], None).await;
    supervisor.stop().await;
    info!("roomcast stopped");
    Ok(())
}

async fn run_broker(listen: &str) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind broker on {listen}"))?;
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    let _ = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
        }
        on_signal.cancel();
    });
    BrokerServer::new().serve(listener, cancel).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            host,
            port,
            broker,
        } => {
            let mut settings = roomcast_settings::load_settings(config.as_deref())
                .context("failed to load settings")?;
            if let Some(host) = host {
                settings.server.host = host;
            }
            if let Some(port) = port {
                settings.server.port = port;
            }
            if let Some(broker) = broker.as_deref() {
                apply_broker_arg(&mut settings.broker, broker)?;
            }
            settings.validate().context("invalid settings")?;

            let _telemetry = init_telemetry(&TelemetryConfig {
                level: settings.logging.level.clone(),
                module_levels: Vec::new(),
                json: settings.logging.json,
            })?;
            serve(settings).await
        }
        Command::Broker { listen, log_level } => {
            let _telemetry = init_telemetry(&TelemetryConfig {
                level: log_level,
                ..TelemetryConfig::default()
            })?;
            run_broker(&listen).await
        }
    }
}
