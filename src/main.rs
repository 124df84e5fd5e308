// Copyright 2026 The Ferry Project
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use ferry::config;
use ferry::proxy;
use tracing_subscriber::EnvFilter;

use std::net::{IpAddr, SocketAddr};

#[derive(Parser)]
#[command(name = "ferry", about = "Authenticated SSE relay for streamed model replies")]
struct Cli {
    /// Path to the ferry.yaml config file
    #[arg(long, default_value = "ferry.yaml", env = "FERRY_CONFIG")]
    config: String,

    /// Port to listen on; overrides server.port from the config file
    #[arg(long, env = "FERRY_PORT")]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1", env = "FERRY_HOST")]
    host: IpAddr,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let source = config::FileSource {
        path: std::path::PathBuf::from(&cli.config),
    };
    let config = match config::load_config(&source) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        version = %config.version,
        environment = %config.environment,
        upstream = %config.upstream.endpoint_url(),
        issuer = %config.auth.issuer,
        config_hash = %config.config_hash,
        "config loaded"
    );

    let state = match proxy::build_state(&config) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("failed to initialise: {e}");
            std::process::exit(1);
        }
    };
    let app = proxy::build_router(state);

    let addr = SocketAddr::new(cli.host, cli.port.unwrap_or(config.server.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind to address");

    tracing::info!(%addr, "ferry listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("ferry stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
