//! Conversion Worker Service
//!
//! Serves the job API over HTTP and runs conversions on an in-process
//! worker pool.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `WORKER_BIND`: listen address (default: 0.0.0.0:8080)
//! - `WORKER_OUTPUT_DIR`: artifact directory
//! - `WORKER_CONCURRENCY`: number of concurrent workers (default: 4)
//! - `WORKER_QUEUE_CAPACITY`: maximum pending jobs (default: unbounded)
//! - `WORKER_JOB_TIMEOUT_SECS`: per-job time limit (default: none)
//! - `WORKER_RETENTION_HOURS`: artifact retention (default: 24)
//! - `WORKER_REAPER_INTERVAL_SECS`: reaper period (default: 300)
//! - `WORKER_ADMIN_KEY`: enables the `/admin` routes
//! - `WORKER_MAX_UPLOAD_BYTES`: submission body limit (default: 50 MiB)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP collector endpoint
//! - `RUST_LOG`: log filter (default: `WORKER_LOG` or info)

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use worker_convert::api::{self, AppState};
use worker_convert::config::Config;
use worker_convert::converter::ConverterRegistry;
use worker_convert::engine::JobEngine;
use worker_convert::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();
    telemetry::init_tracing(&config.log_level, config.log_json);

    if let Err(e) = telemetry::init_telemetry() {
        warn!("Failed to initialize telemetry: {}", e);
    }

    info!("Starting conversion worker service");
    if config.admin_key.is_none() {
        warn!("WORKER_ADMIN_KEY is not set; admin routes will reject every request");
    }

    let engine = Arc::new(
        JobEngine::start(config.engine.clone(), ConverterRegistry::with_builtin())
            .context("Failed to start job engine")?,
    );
    let state = Arc::new(AppState::new(engine.clone(), config.admin_key.as_deref()));
    let app = api::router(state, config.max_upload_bytes);

    let listener = TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    info!(address = %config.bind_address, "Worker service ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Received shutdown signal, waiting for workers to finish...");
    engine.shutdown().await;
    telemetry::shutdown_telemetry();

    info!("Worker service stopped");
    Ok(())
}

/// Resolves on Ctrl+C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
