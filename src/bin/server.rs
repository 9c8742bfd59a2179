// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use anyhow::Result;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use vector_browser::api::rest::{create_app, ApiConfig};
use vector_browser::{Browser, BrowserConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vector_browser=info,tower_http=debug".into()),
        )
        .init();

    // Load configuration from environment
    let (api_config, browser_config) = load_config();

    info!(
        "Starting vector browser on {}:{} (instances in {}, backend timeout {:?})",
        api_config.host,
        api_config.port,
        browser_config.instance_file.display(),
        browser_config.backend_timeout
    );

    let browser = Browser::open(&browser_config).await?;
    info!("Loaded {} instances", browser.list_instances().await.len());

    let app = create_app(&api_config, browser);

    let addr: SocketAddr = format!("{}:{}", api_config.host, api_config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    // Run the server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn load_config() -> (ApiConfig, BrowserConfig) {
    let defaults = BrowserConfig::default();

    let api = ApiConfig {
        host: std::env::var("VECTOR_BROWSER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
        port: std::env::var("VECTOR_BROWSER_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8000),
        max_request_size: std::env::var("VECTOR_BROWSER_MAX_REQUEST_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10 * 1024 * 1024), // 10MB default
        cors_origins: std::env::var("VECTOR_BROWSER_CORS_ORIGINS")
            .ok()
            .map(|origins| origins.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_else(|| vec!["http://localhost:3000".to_string()]),
    };

    let browser = BrowserConfig {
        backend_timeout: std::env::var("VECTOR_BROWSER_BACKEND_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.backend_timeout),
        instance_file: std::env::var("VECTOR_BROWSER_INSTANCE_FILE")
            .map(PathBuf::from)
            .unwrap_or(defaults.instance_file),
    };

    (api, browser)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
