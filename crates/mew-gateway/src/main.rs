// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::Parser;
use mew_audit::AuditLogs;
use mew_config::{GatewayConfig, SpacesConfig};
use mew_gateway::{AppState, build_app, heartbeat};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mew-gateway", version, about = "MEW gateway")]
struct Args {
    /// Gateway config file (TOML); MEW_* environment variables overlay it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Space participant tables (TOML).
    #[arg(long)]
    spaces: Option<PathBuf>,

    /// Override the bind address, e.g. 127.0.0.1:8765.
    #[arg(long)]
    bind: Option<String>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => GatewayConfig::load(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => GatewayConfig::default(),
    };
    config.apply_env().context("apply MEW_* environment")?;

    if config.gateway_logging_enabled {
        let filter = if args.debug {
            EnvFilter::new("mew=debug,mew_gateway=debug")
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mew=info"))
        };
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    for warning in config.validate().context("validate config")? {
        warn!(%warning, "config warning");
    }

    let spaces_config = match &args.spaces {
        Some(path) => SpacesConfig::load(path)
            .with_context(|| format!("load spaces config {}", path.display()))?,
        None => SpacesConfig::default(),
    };
    for warning in spaces_config.warnings() {
        warn!(%warning, "space config warning");
    }

    let audit = AuditLogs::open(
        std::path::Path::new(&config.log_dir),
        config.envelope_history_enabled,
        config.capability_decisions_enabled,
    )
    .await
    .with_context(|| format!("open audit logs in {}", config.log_dir))?;

    let bind = args
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.host, config.port));

    let state = Arc::new(AppState::new(config, spaces_config, audit));
    let heartbeat_task = heartbeat::spawn(Arc::clone(&state));

    let app = build_app(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(bind = %bind, "mew-gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("serve")?;

    heartbeat_task.abort();
    state.audit.sync().await;
    Ok(())
}
