//! csvgate Server - Main entry point

use anyhow::Result;
use csvgate_common::logging::{init_logging, LogConfig};
use std::{net::SocketAddr, time::Duration};
use tokio::signal;
use tracing::{info, warn};

use csvgate_server::{api, config::Config};

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::builder()
        .log_file_prefix("csvgate-server")
        .filter_directives("csvgate_server=debug,tower_http=debug,aws_config=warn")
        .build()
        .merge_env()?;

    init_logging(&log_config)?;

    info!("Starting csvgate server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let state = api::build_state(&config).await?;
    info!("Uploading to {}", config.storage.url);

    let uploader = state.uploader.clone();
    let app = api::create_router(state, &config.server);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let limit = config.server.shutdown_timeout_secs;
    info!(
        in_flight = uploader.in_flight(),
        "Waiting up to {} seconds for uploads to finish", limit
    );
    if uploader.drain(Duration::from_secs(limit)).await {
        info!("Server shut down gracefully");
    } else {
        warn!(in_flight = uploader.in_flight(), "Shutdown timeout elapsed with uploads still running");
    }

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
