use chrono::{DateTime, Utc};
use garde::Validate;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::RewardStore;
use crate::error::{ApiError, FieldError};
use crate::models::account::UserAccount;
use crate::models::job::{JobState, VerificationJob};
use crate::models::verification::{non_blank, LeaderboardEntry, SubmitScanRequest};
use crate::models::voucher::Voucher;
use crate::services::executor::TaskExecutor;
use crate::services::rate_limit::{RateLimitDecision, RateLimitPolicy, RateLimitStore};
use crate::services::storage::{photo_key, PhotoStore};

pub const DEFAULT_LEADERBOARD_LIMIT: u32 = 10;
pub const MAX_LEADERBOARD_LIMIT: u32 = 100;

/// Result of an accepted submission.
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    pub job_id: Uuid,
    pub state: JobState,
    pub rate: RateLimitDecision,
}

/// Front door for scan jobs: admission, dispatch and owner operations.
pub struct ScanOrchestrator {
    store: Arc<dyn RewardStore>,
    photos: Arc<dyn PhotoStore>,
    limiter: Arc<dyn RateLimitStore>,
    executor: Arc<dyn TaskExecutor>,
    rate_policy: RateLimitPolicy,
}

impl ScanOrchestrator {
    pub fn new(
        store: Arc<dyn RewardStore>,
        photos: Arc<dyn PhotoStore>,
        limiter: Arc<dyn RateLimitStore>,
        executor: Arc<dyn TaskExecutor>,
        rate_policy: RateLimitPolicy,
    ) -> Self {
        Self {
            store,
            photos,
            limiter,
            executor,
            rate_policy,
        }
    }

    /// Accept a scan and hand it to the executor. Returns as soon as the
    /// Pending job is persisted and dispatched.
    pub async fn submit(&self, request: SubmitScanRequest) -> Result<SubmitReceipt, ApiError> {
        let request = request.normalized();
        request.validate()?;

        // Bots are turned away before they consume the actor's budget.
        if request.is_bot_traffic() {
            tracing::warn!(actor_id = ?request.actor_id, "Honeypot field filled, rejecting");
            return Err(ApiError::BotDetected);
        }

        let actor_id = request.actor_id.clone().ok_or_else(|| {
            ApiError::Validation(vec![FieldError {
                field: "actor_id".to_string(),
                message: "not set".to_string(),
            }])
        })?;

        let rate = self
            .limiter
            .check(&actor_id, self.rate_policy.limit, self.rate_policy.window);
        if !rate.allowed {
            metrics::counter!("scan_rate_limited_total").increment(1);
            tracing::info!(actor_id = %actor_id, reset_at = %rate.reset_at, "Submission rate limited");
            return Err(ApiError::RateLimited(rate));
        }

        let job_id = Uuid::new_v4();
        let image_key = match &request.image {
            Some(image) => {
                let key = photo_key(job_id);
                self.photos.put(&key, image.as_bytes()).await?;
                Some(key)
            }
            None => None,
        };

        let job = VerificationJob {
            id: job_id,
            actor_id: actor_id.clone(),
            display_name: request.display_name,
            avatar_ref: request.avatar_ref,
            image_key,
            is_public: request.is_public.unwrap_or(true),
            source: request.source.unwrap_or_default(),
            simulated: request.simulated,
            state: JobState::Pending,
            outcome: None,
            failure_reason: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        if let Err(e) = self.store.insert_job(&job).await {
            if let Some(key) = &job.image_key {
                if let Err(e) = self.photos.delete(key).await {
                    tracing::warn!(job_id = %job_id, error = %e, "Could not remove photo of unsaved job");
                }
            }
            return Err(e.into());
        }
        metrics::counter!("scan_jobs_submitted_total").increment(1);

        if let Err(e) = self.executor.dispatch(job_id).await {
            tracing::error!(job_id = %job_id, error = %e, "Could not dispatch scan");
            self.record_dispatch_failure(job_id).await;
            return Err(ApiError::Unavailable("processing backend unreachable".to_string()));
        }

        tracing::info!(
            job_id = %job_id,
            actor_id = %actor_id,
            source = %job.source,
            simulated = job.simulated,
            has_photo = job.image_key.is_some(),
            "Scan accepted"
        );

        Ok(SubmitReceipt {
            job_id,
            state: JobState::Pending,
            rate,
        })
    }

    /// Hand every job still Pending from before `created_before` back to the
    /// executor. Used at startup to pick up work a previous process left
    /// behind. Returns how many jobs were dispatched.
    pub async fn resume_pending(&self, created_before: DateTime<Utc>) -> Result<usize, ApiError> {
        let pending = self.store.pending_jobs(created_before).await?;
        let mut resumed = 0;

        for job_id in pending {
            match self.executor.dispatch(job_id).await {
                Ok(()) => resumed += 1,
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Could not re-dispatch interrupted scan");
                    self.record_dispatch_failure(job_id).await;
                }
            }
        }

        if resumed > 0 {
            tracing::info!(resumed, "Re-dispatched scans interrupted by a restart");
        }
        Ok(resumed)
    }

    async fn record_dispatch_failure(&self, job_id: Uuid) {
        match self.store.fail_job(job_id, "could not dispatch for processing").await {
            Ok(true) => metrics::counter!("scan_jobs_failed_total").increment(1),
            Ok(false) => {}
            Err(e) => tracing::error!(job_id = %job_id, error = %e, "Could not record dispatch failure"),
        }
    }

    pub async fn get_status(&self, job_id: Uuid) -> Result<VerificationJob, ApiError> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or(ApiError::NotFound("Job"))
    }

    /// Remove a job owned by `actor_id`, reverse its credited score and drop
    /// its photo. Returns the actor's new total.
    pub async fn delete(&self, job_id: Uuid, actor_id: Option<String>) -> Result<i64, ApiError> {
        let actor_id = self.authorize(job_id, actor_id).await?;

        let deleted = self
            .store
            .delete_job(job_id, &actor_id)
            .await?
            .ok_or(ApiError::NotFound("Job"))?;

        if let Some(key) = &deleted.job.image_key {
            if let Err(e) = self.photos.delete(key).await {
                tracing::warn!(job_id = %job_id, error = %e, "Could not delete stored photo");
            }
        }

        tracing::info!(
            job_id = %job_id,
            actor_id = %actor_id,
            reversed = deleted.job.credited_score(),
            total_score = deleted.total_score,
            "Scan deleted"
        );

        Ok(deleted.total_score)
    }

    pub async fn set_visibility(
        &self,
        job_id: Uuid,
        actor_id: Option<String>,
        is_public: bool,
    ) -> Result<bool, ApiError> {
        self.authorize(job_id, actor_id).await?;

        if !self.store.set_visibility(job_id, is_public).await? {
            return Err(ApiError::NotFound("Job"));
        }
        tracing::info!(job_id = %job_id, is_public, "Scan visibility changed");
        Ok(is_public)
    }

    pub async fn leaderboard(&self, limit: Option<u32>) -> Result<Vec<LeaderboardEntry>, ApiError> {
        let limit = limit
            .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
            .clamp(1, MAX_LEADERBOARD_LIMIT);
        let accounts = self.store.top_accounts(limit).await?;
        Ok(LeaderboardEntry::ranked(accounts))
    }

    pub async fn account(&self, actor_id: &str) -> Result<UserAccount, ApiError> {
        self.store
            .get_account(actor_id)
            .await?
            .ok_or(ApiError::NotFound("Account"))
    }

    pub async fn vouchers(&self, actor_id: &str) -> Result<Vec<Voucher>, ApiError> {
        Ok(self.store.list_vouchers(actor_id).await?)
    }

    /// Owner check shared by delete and visibility: 401 without an actor,
    /// 404 for an unknown job, 403 for someone else's job.
    async fn authorize(&self, job_id: Uuid, actor_id: Option<String>) -> Result<String, ApiError> {
        let actor_id = non_blank(actor_id).ok_or(ApiError::Unauthorized)?;
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(ApiError::NotFound("Job"))?;
        if job.actor_id != actor_id {
            tracing::warn!(job_id = %job_id, actor_id = %actor_id, "Actor does not own job");
            return Err(ApiError::Forbidden);
        }
        Ok(actor_id)
    }
}
