use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const QUEUE_KEY: &str = "eco_scan:jobs";
const PROCESSING_KEY: &str = "eco_scan:processing";

/// Scan reference pushed onto Redis. The job itself lives in the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedScan {
    pub job_id: Uuid,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedScan {
    pub fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            enqueued_at: Utc::now(),
        }
    }
}

/// A dequeued scan plus the exact payload needed to acknowledge it.
#[derive(Debug)]
pub struct Delivery {
    pub scan: QueuedScan,
    payload: String,
}

/// Redis-backed reliable queue: items move to a processing list while a
/// worker holds them and are removed only on acknowledgement.
pub struct JobQueue {
    client: redis::Client,
}

impl JobQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Enqueue a scan for a worker.
    pub async fn enqueue(&self, scan: &QueuedScan) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(scan)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload).await?;
        Ok(())
    }

    /// Take the oldest scan, moving it to the processing list.
    pub async fn dequeue(&self) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload: Option<String> = conn.rpoplpush(QUEUE_KEY, PROCESSING_KEY).await?;

        match payload {
            Some(payload) => {
                let scan: QueuedScan = serde_json::from_str(&payload)?;
                Ok(Some(Delivery { scan, payload }))
            }
            None => Ok(None),
        }
    }

    /// Acknowledge a delivery (remove it from the processing list).
    pub async fn complete(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &delivery.payload)
            .await?;
        Ok(())
    }

    /// Move scans left in the processing list by a crashed worker back onto
    /// the queue. Call once at worker startup.
    pub async fn requeue_orphaned(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let mut moved = 0u64;
        loop {
            let payload: Option<String> = conn.rpoplpush(PROCESSING_KEY, QUEUE_KEY).await?;
            if payload.is_none() {
                break;
            }
            moved += 1;
        }
        Ok(moved)
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    /// Current number of scans waiting for a worker.
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let depth: u64 = conn.llen(QUEUE_KEY).await?;
        Ok(depth)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
