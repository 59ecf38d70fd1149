use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, ExecutorKind};
use crate::db::{self, memory::MemoryStore, queries::PgStore, RewardStore};
use crate::services::encryption::{EncryptionError, PhotoCipher};
use crate::services::executor::{QueueExecutor, SpawnExecutor, TaskExecutor};
use crate::services::orchestrator::ScanOrchestrator;
use crate::services::pipeline::ScanPipeline;
use crate::services::preprocess::{ImagePreprocessor, PreprocessPolicy};
use crate::services::queue::{JobQueue, QueueError};
use crate::services::rate_limit::{InMemoryRateLimiter, RateLimitPolicy, RateLimitStore};
use crate::services::storage::{MemoryPhotoStore, PhotoStore, R2PhotoStore, StorageError};
use crate::services::vision::{VisionAnalyzer, VisionPolicy};
use crate::services::voucher::{VoucherIssuer, VoucherPolicy};
use crate::services::workers_ai::{AiError, TextModel, VisionModel, WorkersAiClient};

/// Tuning that shapes the services, independent of which backends are used.
#[derive(Debug, Clone)]
pub struct Policies {
    pub rate_limit: RateLimitPolicy,
    pub vision: VisionPolicy,
    pub voucher: VoucherPolicy,
    pub preprocess: PreprocessPolicy,
    pub max_concurrent_jobs: usize,
}

impl Default for Policies {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitPolicy::default(),
            vision: VisionPolicy::default(),
            voucher: VoucherPolicy::default(),
            preprocess: PreprocessPolicy::default(),
            max_concurrent_jobs: 32,
        }
    }
}

impl From<&AppConfig> for Policies {
    fn from(config: &AppConfig) -> Self {
        Self {
            rate_limit: config.rate_limit_policy(),
            vision: config.vision_policy(),
            voucher: config.voucher_policy(),
            preprocess: config.preprocess_policy(),
            max_concurrent_jobs: config.max_concurrent_jobs,
        }
    }
}

/// Concrete collaborators chosen at startup.
pub struct Backends {
    pub store: Arc<dyn RewardStore>,
    pub photos: Arc<dyn PhotoStore>,
    pub vision: Option<Arc<dyn VisionModel>>,
    pub text: Option<Arc<dyn TextModel>>,
    pub queue: Option<Arc<JobQueue>>,
    pub executor: ExecutorKind,
}

impl Backends {
    /// Everything in process memory, no AI credentials.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            photos: Arc::new(MemoryPhotoStore::new()),
            vision: None,
            text: None,
            queue: None,
            executor: ExecutorKind::Spawn,
        }
    }
}

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RewardStore>,
    pub photos: Arc<dyn PhotoStore>,
    pub limiter: Arc<dyn RateLimitStore>,
    pub pipeline: Arc<ScanPipeline>,
    pub orchestrator: Arc<ScanOrchestrator>,
    pub queue: Option<Arc<JobQueue>>,
}

impl AppState {
    pub fn new(backends: Backends, policies: Policies) -> Result<Self, BootstrapError> {
        let Backends {
            store,
            photos,
            vision,
            text,
            queue,
            executor,
        } = backends;

        let pipeline = Arc::new(ScanPipeline::new(
            store.clone(),
            photos.clone(),
            ImagePreprocessor::new(policies.preprocess),
            VisionAnalyzer::new(vision, policies.vision),
            VoucherIssuer::new(store.clone(), text, policies.voucher),
        ));

        let executor: Arc<dyn TaskExecutor> = match (executor, &queue) {
            (ExecutorKind::Spawn, _) => Arc::new(SpawnExecutor::new(
                pipeline.clone(),
                policies.max_concurrent_jobs,
            )),
            (ExecutorKind::Queue, Some(queue)) => Arc::new(QueueExecutor::new(queue.clone())),
            (ExecutorKind::Queue, None) => {
                return Err(BootstrapError::Config(
                    "EXECUTOR=queue requires REDIS_URL".to_string(),
                ))
            }
        };

        let limiter: Arc<dyn RateLimitStore> = Arc::new(InMemoryRateLimiter::new());
        let orchestrator = Arc::new(ScanOrchestrator::new(
            store.clone(),
            photos.clone(),
            limiter.clone(),
            executor,
            policies.rate_limit,
        ));

        Ok(Self {
            store,
            photos,
            limiter,
            pipeline,
            orchestrator,
            queue,
        })
    }

    /// Connect the backends named in `config`, falling back to in-memory
    /// implementations for anything left unconfigured.
    pub async fn from_config(config: &AppConfig) -> Result<Self, BootstrapError> {
        check_shared_backends(config)?;

        let store: Arc<dyn RewardStore> = match &config.database_url {
            Some(url) => {
                tracing::info!("Connecting to PostgreSQL database");
                let pool = db::init_pool(url).await?;
                tracing::info!("Running database migrations");
                db::run_migrations(&pool).await?;
                Arc::new(PgStore::new(pool))
            }
            None => {
                tracing::warn!("DATABASE_URL not set, jobs and accounts are kept in memory");
                Arc::new(MemoryStore::new())
            }
        };

        let photos: Arc<dyn PhotoStore> = match (
            &config.r2_bucket,
            &config.r2_endpoint,
            &config.r2_access_key,
            &config.r2_secret_key,
            &config.encryption_key,
        ) {
            (Some(bucket), Some(endpoint), Some(access), Some(secret), Some(key)) => {
                tracing::info!("Initializing encrypted R2 photo storage");
                let cipher = PhotoCipher::new(key)?;
                Arc::new(R2PhotoStore::new(bucket, endpoint, access, secret, cipher)?)
            }
            _ => {
                tracing::warn!("R2 storage not fully configured, photos are kept in memory");
                Arc::new(MemoryPhotoStore::new())
            }
        };

        let (vision, text) = match config.workers_ai_credentials() {
            Some((account_id, api_token)) => {
                tracing::info!("Initializing Cloudflare Workers AI client");
                let ceiling = Duration::from_millis(
                    config.vision_timeout_ms.max(config.voucher_timeout_ms),
                );
                let client = Arc::new(WorkersAiClient::new(account_id, api_token, ceiling)?);
                let vision: Arc<dyn VisionModel> = client.clone();
                let text: Arc<dyn TextModel> = client;
                (Some(vision), Some(text))
            }
            None => {
                tracing::warn!("Workers AI credentials missing, scans use fallback scoring");
                (None, None)
            }
        };

        let queue = match &config.redis_url {
            Some(url) => {
                tracing::info!("Connecting to Redis job queue");
                Some(Arc::new(JobQueue::new(url)?))
            }
            None => None,
        };

        Self::new(
            Backends {
                store,
                photos,
                vision,
                text,
                queue,
                executor: config.executor,
            },
            Policies::from(config),
        )
    }
}

/// The queue executor hands jobs to a separate worker process, which can only
/// see them through a shared database and shared photo storage.
fn check_shared_backends(config: &AppConfig) -> Result<(), BootstrapError> {
    if config.executor != ExecutorKind::Queue {
        return Ok(());
    }
    if config.database_url.is_none() {
        return Err(BootstrapError::Config(
            "EXECUTOR=queue requires DATABASE_URL".to_string(),
        ));
    }
    let r2_configured = config.r2_bucket.is_some()
        && config.r2_endpoint.is_some()
        && config.r2_access_key.is_some()
        && config.r2_secret_key.is_some()
        && config.encryption_key.is_some();
    if !r2_configured {
        return Err(BootstrapError::Config(
            "EXECUTOR=queue requires R2 storage and ENCRYPTION_KEY".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("Database setup failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Photo storage setup failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Encryption setup failed: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("Workers AI setup failed: {0}")]
    Ai(#[from] AiError),

    #[error("Queue setup failed: {0}")]
    Queue(#[from] QueueError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_executor_without_redis_is_rejected() {
        let backends = Backends {
            executor: ExecutorKind::Queue,
            ..Backends::in_memory()
        };
        assert!(matches!(
            AppState::new(backends, Policies::default()),
            Err(BootstrapError::Config(_))
        ));
    }

    fn config(pairs: &[(&str, &str)]) -> AppConfig {
        envy::from_iter(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string()))).unwrap()
    }

    #[tokio::test]
    async fn test_queue_executor_without_database_is_rejected() {
        let config = config(&[("EXECUTOR", "queue"), ("REDIS_URL", "redis://127.0.0.1:6379")]);
        let err = AppState::from_config(&config).await.err().unwrap();
        assert!(matches!(err, BootstrapError::Config(ref msg) if msg.contains("DATABASE_URL")));
    }

    #[test]
    fn test_queue_executor_needs_shared_photo_storage() {
        let partial = config(&[
            ("EXECUTOR", "queue"),
            ("DATABASE_URL", "postgres://localhost/eco"),
            ("R2_BUCKET", "scans"),
        ]);
        assert!(matches!(
            check_shared_backends(&partial),
            Err(BootstrapError::Config(ref msg)) if msg.contains("R2")
        ));

        let complete = config(&[
            ("EXECUTOR", "queue"),
            ("DATABASE_URL", "postgres://localhost/eco"),
            ("R2_BUCKET", "scans"),
            ("R2_ENDPOINT", "https://r2.example.com"),
            ("R2_ACCESS_KEY", "access"),
            ("R2_SECRET_KEY", "secret"),
            ("ENCRYPTION_KEY", "key"),
        ]);
        assert!(check_shared_backends(&complete).is_ok());
        assert!(check_shared_backends(&config(&[])).is_ok());
    }

    #[tokio::test]
    async fn test_in_memory_state_builds() {
        let state = AppState::new(Backends::in_memory(), Policies::default()).unwrap();
        assert!(state.queue.is_none());
        assert!(state.store.health_check().await.is_ok());
    }
}
