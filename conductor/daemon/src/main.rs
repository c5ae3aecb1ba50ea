//! Roleplay Tutor Daemon
//!
//! HTTP server for the roleplay tutor. Browser UIs and the CLI client create
//! sessions here and receive each assistant turn as a stream of NDJSON frames.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (127.0.0.1:8000, Ollama on 127.0.0.1:11435)
//! roleplay-daemon
//!
//! # Custom config file and model
//! roleplay-daemon --config ./tutor.toml --model mistral
//!
//! # With verbose logging
//! RUST_LOG=debug roleplay-daemon
//! ```
//!
//! # Environment Variables
//!
//! - `ROLEPLAY_CONFIG`: Config file path
//! - `ROLEPLAY_LISTEN`: Listen address
//! - `OLLAMA_HOST`: Ollama host, `host` or `host:port`
//! - `ROLEPLAY_MODEL`: Default model
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)
//!
//! See `roleplay_core::config` for the remaining settings.
//!
//! # Signals
//!
//! - SIGTERM/SIGINT: Graceful shutdown (in-flight streams are finished)

mod server;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{error, info};

use roleplay_core::{InMemorySessionStore, OllamaBackend, Tutor, TutorConfig};

use crate::server::ApiServer;

/// Command-line arguments; these override the config file and environment
#[derive(Debug, Parser)]
#[command(name = "roleplay-daemon", version, about = "Roleplay language tutor daemon")]
struct Args {
    /// Path to a TOML config file
    #[arg(long, env = "ROLEPLAY_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 127.0.0.1:8000
    #[arg(long)]
    listen: Option<String>,

    /// Ollama host, `host` or `host:port`
    #[arg(long)]
    ollama_host: Option<String>,

    /// Default model
    #[arg(long)]
    model: Option<String>,

    /// Generate an opening line for every new session
    #[arg(long)]
    greet: bool,
}

impl Args {
    fn apply(&self, config: &mut TutorConfig) {
        if let Some(listen) = &self.listen {
            config.listen_addr = listen.clone();
        }
        if let Some(host) = &self.ollama_host {
            let host = host.clone();
            config.apply_env(|key| (key == "OLLAMA_HOST").then(|| host.clone()));
        }
        if let Some(model) = &self.model {
            config.default_model = model.clone();
        }
        if self.greet {
            config.greet_on_create = true;
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        () = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("roleplay_daemon=info".parse()?)
                .add_directive("roleplay_core=info".parse()?),
        )
        .with_target(true)
        .init();

    let args = Args::parse();

    let mut config =
        TutorConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate()?;

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("Invalid listen address: {}", config.listen_addr))?;

    info!(
        pid = std::process::id(),
        ollama = %format!("{}:{}", config.ollama_host, config.ollama_port),
        model = %config.default_model,
        "Starting roleplay daemon"
    );

    let backend = OllamaBackend::from_config(&config)?;
    let tutor = Tutor::new(backend, InMemorySessionStore::new(), config);

    ApiServer::new(tutor, addr).run(shutdown_signal()).await?;

    info!("Daemon stopped");
    Ok(())
}
