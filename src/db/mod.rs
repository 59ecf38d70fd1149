use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::models::account::UserAccount;
use crate::models::job::{ActorProfile, ScanOutcome, VerificationJob};
use crate::models::voucher::Voucher;

pub mod memory;
pub mod queries;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Everything the ledger commits when a job completes.
#[derive(Debug, Clone)]
pub struct FinalizeJob<'a> {
    pub job_id: Uuid,
    pub actor_id: &'a str,
    pub profile: ActorProfile,
    pub outcome: &'a ScanOutcome,
    /// Points to add to the actor's total. Zero means the account is untouched.
    pub score_delta: i64,
    pub voucher: Option<&'a Voucher>,
    pub completed_at: DateTime<Utc>,
}

/// A job removed by its owner, with the actor's total after the reversal.
#[derive(Debug, Clone)]
pub struct DeletedJob {
    pub job: VerificationJob,
    pub total_score: i64,
}

/// Persistence for scan jobs, actor accounts and vouchers.
///
/// Implementations must make `finalize_job` and `delete_job` atomic: the
/// state transition and the score change either both happen or neither does,
/// and score changes are increments, never read-modify-write.
#[async_trait]
pub trait RewardStore: Send + Sync {
    async fn insert_job(&self, job: &VerificationJob) -> Result<(), StoreError>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<VerificationJob>, StoreError>;

    /// Complete a Pending job and apply its ledger effects.
    /// Returns `false` without side effects if the job is missing or terminal.
    async fn finalize_job(&self, update: FinalizeJob<'_>) -> Result<bool, StoreError>;

    /// Move a Pending job to Failed. Returns `false` if it was not Pending.
    async fn fail_job(&self, job_id: Uuid, reason: &str) -> Result<bool, StoreError>;

    /// Ids of jobs still Pending that were created before `created_before`,
    /// oldest first.
    async fn pending_jobs(&self, created_before: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError>;

    /// Remove a job owned by `actor_id` and reverse its credited score.
    async fn delete_job(
        &self,
        job_id: Uuid,
        actor_id: &str,
    ) -> Result<Option<DeletedJob>, StoreError>;

    async fn set_visibility(&self, job_id: Uuid, is_public: bool) -> Result<bool, StoreError>;

    async fn get_account(&self, actor_id: &str) -> Result<Option<UserAccount>, StoreError>;

    async fn top_accounts(&self, limit: u32) -> Result<Vec<UserAccount>, StoreError>;

    async fn count_vouchers_since(
        &self,
        actor_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn list_vouchers(&self, actor_id: &str) -> Result<Vec<Voucher>, StoreError>;

    /// Connectivity probe for health checks.
    async fn health_check(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}
