use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::services::pipeline::ScanPipeline;
use crate::services::queue::{JobQueue, QueueError, QueuedScan};

/// Hands an accepted job to whatever runs the background pipeline.
///
/// `dispatch` returns once the job is handed off, never after processing.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn dispatch(&self, job_id: Uuid) -> Result<(), ExecutorError>;
}

/// Run the pipeline for one job on its own task and record a panic as a
/// Failed job instead of leaving it Pending.
pub async fn run_supervised(pipeline: Arc<ScanPipeline>, job_id: Uuid) {
    let runner = pipeline.clone();
    let handle = tokio::spawn(async move { runner.run(job_id).await });

    if let Err(e) = handle.await {
        let reason = if e.is_panic() {
            "processing task panicked"
        } else {
            "processing task was cancelled"
        };
        tracing::error!(job_id = %job_id, error = %e, "Scan task aborted");
        pipeline.fail(job_id, reason).await;
    }
}

/// In-process executor: one tokio task per job, bounded by a semaphore.
pub struct SpawnExecutor {
    pipeline: Arc<ScanPipeline>,
    permits: Arc<Semaphore>,
}

impl SpawnExecutor {
    pub fn new(pipeline: Arc<ScanPipeline>, max_concurrent: usize) -> Self {
        Self {
            pipeline,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }
}

#[async_trait]
impl TaskExecutor for SpawnExecutor {
    async fn dispatch(&self, job_id: Uuid) -> Result<(), ExecutorError> {
        let pipeline = self.pipeline.clone();
        let permits = self.permits.clone();

        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    pipeline.fail(job_id, "executor shut down").await;
                    return;
                }
            };
            run_supervised(pipeline, job_id).await;
        });

        Ok(())
    }
}

/// Out-of-process executor: pushes the job id onto Redis for the worker binary.
pub struct QueueExecutor {
    queue: Arc<JobQueue>,
}

impl QueueExecutor {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl TaskExecutor for QueueExecutor {
    async fn dispatch(&self, job_id: Uuid) -> Result<(), ExecutorError> {
        self.queue.enqueue(&QueuedScan::new(job_id)).await?;
        tracing::debug!(job_id = %job_id, "Scan enqueued for worker");
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}
