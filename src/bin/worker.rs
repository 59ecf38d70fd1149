use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use eco_scan::app_state::AppState;
use eco_scan::config::AppConfig;
use eco_scan::services::executor::run_supervised;
use eco_scan::services::pipeline::ScanPipeline;
use eco_scan::services::queue::{JobQueue, QueueError};

const POLL_INTERVAL_MS: u64 = 1000;
const METRICS_ADDR: &str = "0.0.0.0:9091";

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting scan worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    let metrics_addr: std::net::SocketAddr =
        METRICS_ADDR.parse().expect("Invalid metrics address");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus exporter");
    metrics::describe_gauge!("scan_queue_depth", "Scans waiting for a worker");

    let state = AppState::from_config(&config)
        .await
        .expect("Failed to initialize services");
    let queue = state
        .queue
        .clone()
        .expect("REDIS_URL is required for the worker");

    match queue.requeue_orphaned().await {
        Ok(0) => {}
        Ok(moved) => tracing::warn!(moved, "Re-queued scans left by a previous worker"),
        Err(e) => tracing::error!(error = %e, "Could not recover orphaned scans"),
    }

    let permits = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));

    tracing::info!(
        max_concurrent = config.max_concurrent_jobs,
        "Worker ready, starting job processing loop"
    );

    loop {
        match process_next_job(&queue, &state.pipeline, &permits).await {
            Ok(true) => {
                tracing::debug!("Scan dispatched, checking for next scan");
            }
            Ok(false) => {
                tracing::trace!("No scans available, sleeping");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error reading queue, will retry");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
}

/// Take the next scan off the queue and run it on its own task.
/// Returns Ok(true) if a scan was taken, Ok(false) if the queue was empty.
async fn process_next_job(
    queue: &Arc<JobQueue>,
    pipeline: &Arc<ScanPipeline>,
    permits: &Arc<Semaphore>,
) -> Result<bool, QueueError> {
    // Wait for capacity before taking work so queued scans stay visible to other workers.
    let Ok(permit) = permits.clone().acquire_owned().await else {
        return Ok(false);
    };

    if let Ok(depth) = queue.queue_depth().await {
        metrics::gauge!("scan_queue_depth").set(depth as f64);
    }

    let Some(delivery) = queue.dequeue().await? else {
        return Ok(false);
    };

    let job_id = delivery.scan.job_id;
    tracing::info!(
        job_id = %job_id,
        queued_ms = (chrono::Utc::now() - delivery.scan.enqueued_at).num_milliseconds(),
        "Processing scan"
    );

    let queue = queue.clone();
    let pipeline = pipeline.clone();
    tokio::spawn(async move {
        let _permit = permit;
        run_supervised(pipeline, job_id).await;
        if let Err(e) = queue.complete(&delivery).await {
            tracing::error!(job_id = %job_id, error = %e, "Could not acknowledge scan");
        }
    });

    Ok(true)
}
