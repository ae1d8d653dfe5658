//! chathub-server binary.

use chathub_server::config::{Overrides, ServerConfig, SigningSecret};
use chathub_server::{HmacVerifier, Hub};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// chathub-server: chat connection hub
#[derive(Parser, Debug)]
#[command(name = "chathub-server", version, about = "Chat connection hub")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "~/.chathub/config.toml")]
    config: String,

    /// Line protocol (TCP) port
    #[arg(long)]
    line_port: Option<u16>,

    /// WebSocket port
    #[arg(long)]
    ws_port: Option<u16>,

    /// Outbound queue capacity per connection
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Seconds between liveness probes
    #[arg(long)]
    probe_interval: Option<u64>,

    /// Log resource usage periodically
    #[arg(long)]
    monitor: bool,

    /// Deliver broadcasts back to their sender
    #[arg(long)]
    self_echo: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting chathub-server");

    let overrides = Overrides {
        line_port: cli.line_port,
        ws_port: cli.ws_port,
        queue_capacity: cli.queue_capacity,
        probe_interval: cli.probe_interval,
        monitor: cli.monitor,
        self_echo: cli.self_echo,
    };
    let config_path = PathBuf::from(&cli.config);
    let server_config = match ServerConfig::load(Some(&config_path), &overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let secret = match server_config.signing_secret() {
        SigningSecret::Configured(secret) => secret,
        SigningSecret::Generated(secret) => {
            warn!("no auth secret configured, generated one for this process");
            eprintln!("chathub-server: auth secret {}", hex::encode(&secret));
            secret
        }
    };

    let hub = Hub::new(server_config.hub, Arc::new(HmacVerifier::new(secret)));
    let handle = match hub.start().await {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "failed to start hub");
            std::process::exit(1);
        }
    };

    shutdown_signal().await;
    info!("received shutdown signal");
    handle.stop().await;

    info!("chathub-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
