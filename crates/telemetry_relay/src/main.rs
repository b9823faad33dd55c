//! Main application entry point for the telemetry relay.
//!
//! Loads configuration, sets up logging, builds the backend sink and runs the
//! relay hub until a termination signal arrives.

mod cli;
mod config;
mod signals;

use anyhow::{anyhow, Context};
use clap::Parser;
use cli::CliArgs;
use config::{AppConfig, LoggingSettings};
use relay_hub::{BackendSink, HttpSink, RelayServer};
use signals::wait_for_shutdown_signal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level when set.
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
            .try_init()?;
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
            .try_init()?;
    }

    info!("🔧 Logging initialized with level: {}", log_level);
    Ok(())
}

/// The configured relay, ready to run.
pub struct Application {
    config: AppConfig,
    server: Arc<RelayServer>,
}

impl Application {
    /// Loads configuration, applies CLI overrides, and builds the server.
    pub async fn new(args: CliArgs) -> anyhow::Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(bind_address) = args.bind_address {
            config.server.bind_address = bind_address;
        }
        if let Some(backend_url) = args.backend_url {
            config.backend.url = backend_url;
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        config
            .validate()
            .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;

        setup_logging(&config.logging)?;

        let hub_config = config.to_hub_config()?;
        let sink: Option<Arc<dyn BackendSink>> = if hub_config.backend.enabled {
            let sink = HttpSink::new(
                hub_config.backend.url.clone(),
                hub_config.backend.timeout,
                hub_config.backend.link_cooldown,
            )
            .context("Failed to create backend sink")?;
            Some(Arc::new(sink))
        } else {
            None
        };

        info!(
            "🚀 Telemetry Relay v{} | Config: {}",
            env!("CARGO_PKG_VERSION"),
            args.config_path.display()
        );

        Ok(Self {
            config,
            server: Arc::new(RelayServer::new(hub_config, sink)),
        })
    }

    /// Runs the hub until a termination signal, then shuts it down.
    pub async fn run(self) -> anyhow::Result<()> {
        info!("📋 Configuration Summary:");
        info!(
            "  🌐 Listening on: ws://{}{}",
            self.config.server.bind_address, self.config.server.ws_path
        );
        info!("  👥 Max connections: {}", self.config.server.max_connections);
        info!(
            "  📦 Queue capacity: {} | Tick: {}ms | Grace period: {}ms",
            self.config.relay.queue_capacity, self.config.relay.tick_interval_ms, self.config.relay.grace_period_ms
        );
        if self.config.backend.enabled {
            info!(
                "  📡 Backend: {} (timeout {}ms)",
                self.config.backend.url, self.config.backend.timeout_ms
            );
        } else {
            info!("  📡 Backend: disabled");
        }

        let mut server_handle = {
            let server = self.server.clone();
            tokio::spawn(async move { server.start().await })
        };

        info!("🛑 Press Ctrl+C to gracefully shutdown");

        tokio::select! {
            result = &mut server_handle => {
                // The server only returns on its own when startup failed.
                return match result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(anyhow!("Server error: {}", e)),
                    Err(e) => Err(anyhow!("Server task failed: {}", e)),
                };
            }
            signal = wait_for_shutdown_signal() => {
                signal?;
            }
        }

        info!("🛑 Shutdown signal received, initiating graceful shutdown...");
        self.server.shutdown().await?;

        match tokio::time::timeout(Duration::from_secs(5), server_handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => error!("❌ Server error during shutdown: {}", e),
            Ok(Err(e)) => error!("❌ Server task failed: {}", e),
            Err(_) => warn!("⏳ Server did not stop within 5s, exiting anyway"),
        }

        let stats = self.server.relay_queue().stats();
        info!(
            "📊 Relay totals: {} event(s) queued, {} dropped at capacity",
            stats.accepted, stats.dropped
        );
        info!("✅ Telemetry relay shutdown complete");
        Ok(())
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let app = match Application::new(args).await {
        Ok(app) => app,
        Err(e) => {
            eprintln!("❌ Failed to start application: {:?}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app.run().await {
        error!("❌ Application error: {:?}", e);
        std::process::exit(1);
    }

    Ok(())
}
