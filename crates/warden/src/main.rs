//! Main application entry point for the warden proxy.
//!
//! Wires the control plane, the RCON wire client, and the WebSocket
//! gateway together: CLI parsing, configuration loading, logging setup,
//! and graceful shutdown on termination signals.

mod cli;
mod config;
mod signals;

use anyhow::Context;
use cli::CliArgs;
use config::{AppConfig, LoggingSettings};
use control_plane::{BroadcastHub, SessionManager};
use gateway::Gateway;
use rcon_client::TcpConnector;
use signals::setup_signal_handlers;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// ============================================================================
// Logging Setup
// ============================================================================

/// Initialize the logging system.
fn setup_logging(config: &LoggingSettings) -> anyhow::Result<()> {
    let log_level = config.level.as_str();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .init();
    }

    info!("🔧 Logging initialized with level: {}", log_level);
    Ok(())
}

// ============================================================================
// Application
// ============================================================================

struct Application {
    config: AppConfig,
}

impl Application {
    /// Loads configuration, applies CLI overrides, and initializes logging.
    async fn new(args: CliArgs) -> anyhow::Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path)
            .await
            .with_context(|| format!("loading {}", args.config_path.display()))?;

        if let Some(bind_address) = args.bind_address {
            config.gateway.bind_address = bind_address;
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        if let Err(e) = config.validate() {
            anyhow::bail!("configuration validation failed: {e}");
        }

        setup_logging(&config.logging)?;
        display_banner();
        info!("📂 Config: {}", args.config_path.display());

        Ok(Self { config })
    }

    /// Runs the proxy until a termination signal arrives.
    async fn run(self) -> anyhow::Result<()> {
        info!("📋 Configuration Summary:");
        info!("  🌐 Gateway bind address: {}", self.config.gateway.bind_address);
        info!(
            "  📡 Hub queues: {} events/subscriber, eviction after {} full publishes",
            self.config.hub.queue_capacity, self.config.hub.eviction_threshold
        );

        let hub = Arc::new(BroadcastHub::new(self.config.hub.clone()));
        let manager = Arc::new(SessionManager::new(TcpConnector::new(), hub));
        let gateway = Gateway::bind(&self.config.gateway.bind_address, manager.clone())
            .await
            .context("binding gateway listener")?;

        let gateway_handle = tokio::spawn(gateway.run());

        info!("✅ Warden is now running!");
        info!(
            "🎮 Control panels connect on ws://{}",
            self.config.gateway.bind_address
        );
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        setup_signal_handlers().await?;

        info!("🛑 Shutdown signal received, initiating graceful shutdown...");
        gateway_handle.abort();

        // Deregistering closes every backend link and stops its poller.
        for snapshot in manager.list_servers() {
            let _ = manager.deregister(&snapshot.backend).await;
        }

        info!("✅ Warden shutdown complete");
        Ok(())
    }
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Display the startup banner using proper logging.
fn display_banner() {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    info!("╔══════════════════════════════════════════╗");
    info!("║             🛡️ WARDEN PROXY 🛡️            ║");
    info!("║                 v{}                   ║", version);
    info!("║                                          ║");
    info!("║  Session Proxy & Status Broadcast        ║");
    info!("║  Engine for Game-Server Backends         ║");
    info!("║                                          ║");
    info!("║  🔗 Serialized RCON Sessions             ║");
    info!("║  ⏱️ Per-Backend Health Polling            ║");
    info!("║  📡 Bounded-Queue Status Broadcast       ║");
    info!("║  🌐 WebSocket Control Surface            ║");
    info!("║                                          ║");
    info!("╚══════════════════════════════════════════╝");
}
