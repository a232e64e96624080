#![deny(unsafe_code)]
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mew_config::{GatewayConfig, load_config};
use mew_gateway::{AppState, build_app};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// CLI flags overlaying `mew-config::GatewayConfig` (`spec` §6).
#[derive(Parser, Debug)]
#[command(name = "mew-gateway", version, about = "Gateway for multi-entity workspace coordination")]
struct Args {
    /// TOML config file to load before applying overrides and CLI flags.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address, overriding `config.bind_addr`.
    #[arg(long)]
    bind: Option<String>,

    /// Protocol tag envelopes must carry, overriding `config.protocol_tag`.
    #[arg(long)]
    protocol_tag: Option<String>,

    /// Accept a bare participant id as a dev-mode bearer token.
    #[arg(long)]
    insecure_auth: bool,

    /// Enable verbose request/response debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("mew=debug,tower_http=debug")
    } else {
        EnvFilter::new("mew=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = load_config(args.config.as_deref()).context("load configuration")?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(tag) = args.protocol_tag {
        config.protocol_tag = tag;
    }
    if args.insecure_auth {
        config.insecure_auth = true;
    }

    for warning in mew_config::validate_config(&config).context("validate configuration")? {
        warn!(%warning, "configuration warning");
    }

    run(config).await
}

async fn run(config: GatewayConfig) -> Result<()> {
    let bind_addr = config.bind_addr.clone();
    let protocol_tag = config.protocol_tag.clone();

    let state = Arc::new(AppState::new(config));
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("bind {bind_addr}"))?;
    info!(bind = %bind_addr, protocol = %protocol_tag, "mew-gateway listening");

    axum::serve(listener, app).await.context("serve")
}
