//! # Helmsman
//!
//! Runs one leader election for this node and reports the result over HTTP.
//!
//! ## Architecture
//! ```text
//! helmsman ──lease──▶ Redis (if reachable)
//!     │
//!     └──gossip──▶ peers (fallback)
//!     │
//!   GET /leader
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use helmsman::config::{AppConfig, Overrides};
use helmsman::{ElectorSelector, GossipTransport, LockBackend, RedisLockBackend};

mod routes;

use routes::AppState;

/// Helmsman - leader election sidecar
#[derive(Parser, Debug)]
#[command(name = "helmsman")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/helmsman.toml")]
    config: String,

    /// Redis URL for the lease backend (overrides config)
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Status listen address (overrides config)
    #[arg(short, long, env = "LISTEN_ADDR")]
    listen: Option<String>,

    /// Election namespace (overrides config)
    #[arg(long, env = "ELECTION_NAMESPACE")]
    namespace: Option<String>,

    /// Election name (overrides config)
    #[arg(long, env = "ELECTION_NAME")]
    name: Option<String>,

    /// Election identity (overrides config)
    #[arg(long, env = "ELECTION_IDENTITY")]
    identity: Option<String>,

    /// This node's contender ID (overrides config)
    #[arg(long, env = "NODE_ID")]
    node_id: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            redis_url: self.redis_url.clone(),
            listen_addr: self.listen.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            identity: self.identity.clone(),
            node_id: self.node_id.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level, args.json_logs)?;

    info!("⎈ Starting Helmsman v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::load(&args.config, &args.overrides())?;
    info!(node_id = %config.node_id, "📋 Configuration loaded from {}", args.config);

    let timing = config.election.timing()?;
    let identity = config.election.identity();

    let lock_backend = match config.redis_url.as_deref() {
        Some(url) => {
            let backend = RedisLockBackend::new(url).context("Failed to create Redis lock backend")?;
            Some(Arc::new(backend) as Arc<dyn LockBackend>)
        }
        None => None,
    };
    let membership = Arc::new(GossipTransport::new(
        config.gossip.clone(),
        config.node_id.clone(),
    ));

    let selector = ElectorSelector::new(config.node_id.clone(), lock_backend, membership)
        .with_probe(Arc::new(config.lease_probe.probe()));

    let elector = selector
        .elect(identity, Some(timing))
        .await
        .context("Failed to start leader election")?;
    info!(key = %elector.identity().unique_key(), %timing, "🗳️ Election started");

    // Log every role change
    let mut transitions = elector.subscribe();
    tokio::spawn(async move {
        loop {
            match transitions.recv().await {
                Ok(t) => info!(from = %t.from, to = %t.to, "Leadership changed"),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Missed leadership changes");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let elector = Arc::new(elector);
    let app = routes::create_router(AppState {
        elector: elector.clone(),
        node_id: config.node_id.clone(),
    });

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!("🚀 Helmsman status listening on {}", config.listen_addr);

    // Handle graceful shutdown
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
        info!("🛑 Shutdown signal received");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    // The router is gone, so this is the last reference
    match Arc::try_unwrap(elector) {
        Ok(elector) => elector.stop().await,
        Err(_) => tracing::warn!("Elector still shared at shutdown, releasing on drop"),
    }

    info!("👋 Helmsman shutdown complete");
    Ok(())
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }

    Ok(())
}
