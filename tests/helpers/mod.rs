//! Shared harness for integration tests: in-memory backends, scripted models

#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

use eco_scan::app_state::{AppState, Backends, Policies};
use eco_scan::config::ExecutorKind;
use eco_scan::db::memory::MemoryStore;
use chrono::{DateTime, Utc};
use eco_scan::db::{DeletedJob, FinalizeJob, RewardStore, StoreError};
use eco_scan::models::account::UserAccount;
use eco_scan::models::job::VerificationJob;
use eco_scan::models::voucher::Voucher;
use eco_scan::routes;
use eco_scan::services::storage::MemoryPhotoStore;
use eco_scan::services::workers_ai::{AiError, TextModel, VisionModel};

/// Vision model that always gives the same reply, optionally after a delay.
pub struct ScriptedVision {
    reply: String,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl ScriptedVision {
    pub fn replying(reply: String) -> Arc<Self> {
        Arc::new(Self {
            reply,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn stalling(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: String::new(),
            delay,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl VisionModel for ScriptedVision {
    async fn describe(&self, _image: &str, _prompt: &str) -> Result<String, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        Ok(self.reply.clone())
    }
}

/// Text model that always gives the same reply.
pub struct ScriptedText(pub String);

#[async_trait]
impl TextModel for ScriptedText {
    async fn generate(&self, _prompt: &str) -> Result<String, AiError> {
        Ok(self.0.clone())
    }
}

/// Which store operations should fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreFaults {
    pub insert: bool,
    pub finalize: bool,
    pub voucher_count: bool,
}

/// Memory store that returns errors from selected operations.
pub struct FaultyStore {
    inner: Arc<MemoryStore>,
    faults: StoreFaults,
}

fn injected(operation: &str) -> StoreError {
    StoreError::Corrupt(format!("{operation} unavailable"))
}

#[async_trait]
impl RewardStore for FaultyStore {
    async fn insert_job(&self, job: &VerificationJob) -> Result<(), StoreError> {
        if self.faults.insert {
            return Err(injected("insert"));
        }
        self.inner.insert_job(job).await
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<VerificationJob>, StoreError> {
        self.inner.get_job(job_id).await
    }

    async fn finalize_job(&self, update: FinalizeJob<'_>) -> Result<bool, StoreError> {
        if self.faults.finalize {
            return Err(injected("finalize"));
        }
        self.inner.finalize_job(update).await
    }

    async fn fail_job(&self, job_id: Uuid, reason: &str) -> Result<bool, StoreError> {
        self.inner.fail_job(job_id, reason).await
    }

    async fn pending_jobs(&self, created_before: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        self.inner.pending_jobs(created_before).await
    }

    async fn delete_job(
        &self,
        job_id: Uuid,
        actor_id: &str,
    ) -> Result<Option<DeletedJob>, StoreError> {
        self.inner.delete_job(job_id, actor_id).await
    }

    async fn set_visibility(&self, job_id: Uuid, is_public: bool) -> Result<bool, StoreError> {
        self.inner.set_visibility(job_id, is_public).await
    }

    async fn get_account(&self, actor_id: &str) -> Result<Option<UserAccount>, StoreError> {
        self.inner.get_account(actor_id).await
    }

    async fn top_accounts(&self, limit: u32) -> Result<Vec<UserAccount>, StoreError> {
        self.inner.top_accounts(limit).await
    }

    async fn count_vouchers_since(
        &self,
        actor_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        if self.faults.voucher_count {
            return Err(injected("voucher count"));
        }
        self.inner.count_vouchers_since(actor_id, since).await
    }

    async fn list_vouchers(&self, actor_id: &str) -> Result<Vec<Voucher>, StoreError> {
        self.inner.list_vouchers(actor_id).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.inner.health_check().await
    }
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub photos: Arc<MemoryPhotoStore>,
}

impl TestApp {
    pub fn router(&self) -> Router {
        routes::router(self.state.clone())
    }

    /// Poll the store until the job leaves Pending.
    pub async fn wait_for_terminal(&self, job_id: Uuid) -> VerificationJob {
        for _ in 0..300 {
            if let Some(job) = self.store.get_job(job_id).await.unwrap() {
                if job.state.is_terminal() {
                    return job;
                }
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} still pending after 3s");
    }
}

pub struct TestAppBuilder {
    vision: Option<Arc<dyn VisionModel>>,
    text: Option<Arc<dyn TextModel>>,
    policies: Policies,
    store: Option<Arc<MemoryStore>>,
    photos: Option<Arc<MemoryPhotoStore>>,
    faults: Option<StoreFaults>,
}

impl TestAppBuilder {
    pub fn new() -> Self {
        Self {
            vision: None,
            text: None,
            policies: Policies::default(),
            store: None,
            photos: None,
            faults: None,
        }
    }

    /// Build on existing backends, as a restarted process would.
    pub fn shared(mut self, store: Arc<MemoryStore>, photos: Arc<MemoryPhotoStore>) -> Self {
        self.store = Some(store);
        self.photos = Some(photos);
        self
    }

    pub fn faults(mut self, faults: StoreFaults) -> Self {
        self.faults = Some(faults);
        self
    }

    pub fn vision(mut self, model: Arc<dyn VisionModel>) -> Self {
        self.vision = Some(model);
        self
    }

    pub fn text(mut self, model: Arc<dyn TextModel>) -> Self {
        self.text = Some(model);
        self
    }

    pub fn policies(mut self, update: impl FnOnce(&mut Policies)) -> Self {
        update(&mut self.policies);
        self
    }

    pub fn build(self) -> TestApp {
        let store = self.store.unwrap_or_default();
        let photos = self.photos.unwrap_or_default();
        let reward_store: Arc<dyn RewardStore> = match self.faults {
            Some(faults) => Arc::new(FaultyStore {
                inner: store.clone(),
                faults,
            }),
            None => store.clone(),
        };
        let state = AppState::new(
            Backends {
                store: reward_store,
                photos: photos.clone(),
                vision: self.vision,
                text: self.text,
                queue: None,
                executor: ExecutorKind::Spawn,
            },
            self.policies,
        )
        .expect("in-memory state");

        TestApp {
            state,
            store,
            photos,
        }
    }
}
