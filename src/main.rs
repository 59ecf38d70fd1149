use axum::routing::get;
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use eco_scan::app_state::AppState;
use eco_scan::config::{AppConfig, ExecutorKind};
use eco_scan::routes;
use eco_scan::services::rate_limit::spawn_sweeper;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing eco-scan server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("scan_jobs_submitted_total", "Scans accepted for processing");
    metrics::describe_counter!("scan_jobs_completed_total", "Scans that reached Completed");
    metrics::describe_counter!("scan_jobs_failed_total", "Scans that reached Failed");
    metrics::describe_counter!("scan_rate_limited_total", "Submissions rejected by the rate limiter");
    metrics::describe_counter!("vision_fallback_total", "Scans scored by the fallback path");
    metrics::describe_counter!("vouchers_issued_total", "Vouchers committed to the ledger");
    metrics::describe_histogram!("scan_processing_seconds", "Time to process one scan");

    let state = AppState::from_config(&config)
        .await
        .expect("Failed to initialize application state");

    // In spawn mode nothing outside this process knows about Pending jobs, so
    // anything a previous process left unfinished is picked up here.
    if config.executor == ExecutorKind::Spawn {
        if let Err(e) = state.orchestrator.resume_pending(Utc::now()).await {
            tracing::error!(error = %e, "Could not resume interrupted scans");
        }
    }

    let _sweeper = spawn_sweeper(state.limiter.clone(), config.rate_limit_sweep_interval());

    let app = routes::router(state).route(
        "/metrics",
        get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
    );

    tracing::info!(executor = ?config.executor, "Starting eco-scan on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
