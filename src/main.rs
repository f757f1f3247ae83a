//! Policy gateway (v1)
//!
//! An API gateway that runs an ordered policy list over every exchange,
//! built with Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌───────────────────────────────────────────────────────┐
//!                    │                    POLICY GATEWAY                      │
//!   Client Request   │  ┌────────┐   ┌───────────────┐   ┌───────────────┐   │
//!   ─────────────────┼─▶│  http  │──▶│ RequestChain  │──▶│   connector   │───┼──▶ Upstream
//!                    │  │ server │   │ P1 → P2 → Pn  │   │ (hyper-util)  │   │
//!                    │  └────────┘   └───────┬───────┘   └───────┬───────┘   │
//!                    │                failure │                   │           │
//!                    │                        ▼                   ▼           │
//!   Client Response  │  ┌────────┐   ┌───────────────────────────────────┐   │
//!   ◀────────────────┼──│response│◀──│   ResponseChain  Pn → P2 → P1     │◀──┼─── Upstream
//!                    │  └────────┘   └───────────────────────────────────┘   │
//!                    │                                                        │
//!                    │   config · observability · lifecycle                   │
//!                    └───────────────────────────────────────────────────────┘
//! ```
//!
//! The binary runs with an empty policy list (a pass-through proxy).
//! Embedders supply their own bindings through `GatewayServer::new`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use policy_gateway::config::{load_config, validate_config, ConfigError, GatewayConfig};
use policy_gateway::http::{GatewayServer, UpstreamConnector};
use policy_gateway::lifecycle::{spawn_signal_listener, Shutdown};
use policy_gateway::observability::{init_logging, init_metrics};

#[derive(Parser)]
#[command(name = "policy-gateway")]
#[command(about = "API gateway running an ordered policy chain", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`
    #[arg(short, long)]
    bind: Option<String>,

    /// Override `upstream.url`
    #[arg(short, long)]
    upstream: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // 1. Configuration
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }
    if let Some(upstream) = args.upstream {
        config.upstream.url = upstream;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    // 2. Observability
    init_logging(&config.observability)?;
    tracing::info!("policy-gateway v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        init_metrics(addr)?;
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.url,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    // 3. Upstream connector and server
    let connector = Arc::new(UpstreamConnector::new(&config.upstream, &config.timeouts)?);
    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = GatewayServer::new(config, Vec::new(), connector);

    // 4. Run until signalled
    let shutdown = Shutdown::new();
    spawn_signal_listener(&shutdown);
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
