use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{DeletedJob, FinalizeJob, RewardStore, StoreError};
use crate::models::account::UserAccount;
use crate::models::job::{ActorProfile, JobState, VerificationJob};
use crate::models::voucher::Voucher;

/// In-process reward store for single-instance deployments and tests.
///
/// Lock order is always jobs before accounts; no code path holds an account
/// entry while acquiring a job entry.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    jobs: Arc<DashMap<Uuid, VerificationJob>>,
    accounts: Arc<DashMap<String, UserAccount>>,
    vouchers: Arc<DashMap<Uuid, Voucher>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a voucher directly, bypassing the pipeline.
    pub fn insert_voucher(&self, voucher: Voucher) {
        self.vouchers.insert(voucher.id, voucher);
    }

    fn credit(&self, actor_id: &str, delta: i64, profile: &ActorProfile, at: DateTime<Utc>) {
        self.accounts
            .entry(actor_id.to_string())
            .and_modify(|account| {
                account.total_score += delta;
                account.last_active_at = at;
                if account.display_name.is_none() {
                    account.display_name = profile.display_name.clone();
                }
                if account.avatar_ref.is_none() {
                    account.avatar_ref = profile.avatar_ref.clone();
                }
            })
            .or_insert_with(|| UserAccount {
                actor_id: actor_id.to_string(),
                display_name: profile.display_name.clone(),
                avatar_ref: profile.avatar_ref.clone(),
                total_score: delta,
                last_active_at: at,
            });
    }
}

#[async_trait]
impl RewardStore for MemoryStore {
    async fn insert_job(&self, job: &VerificationJob) -> Result<(), StoreError> {
        self.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<VerificationJob>, StoreError> {
        Ok(self.jobs.get(&job_id).map(|job| job.clone()))
    }

    async fn finalize_job(&self, update: FinalizeJob<'_>) -> Result<bool, StoreError> {
        // Holding the job's shard lock serializes finalize against delete and
        // any concurrent finalize of the same job.
        let Some(mut job) = self.jobs.get_mut(&update.job_id) else {
            return Ok(false);
        };
        if job.state != JobState::Pending {
            return Ok(false);
        }

        job.state = JobState::Completed;
        job.outcome = Some(update.outcome.clone());
        job.failure_reason = None;
        job.completed_at = Some(update.completed_at);

        if update.score_delta > 0 {
            self.credit(
                update.actor_id,
                update.score_delta,
                &update.profile,
                update.completed_at,
            );
        }
        if let Some(voucher) = update.voucher {
            self.vouchers.insert(voucher.id, voucher.clone());
        }
        Ok(true)
    }

    async fn fail_job(&self, job_id: Uuid, reason: &str) -> Result<bool, StoreError> {
        let Some(mut job) = self.jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        if job.state != JobState::Pending {
            return Ok(false);
        }
        job.state = JobState::Failed;
        job.failure_reason = Some(reason.to_string());
        job.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn pending_jobs(&self, created_before: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let mut pending: Vec<(DateTime<Utc>, Uuid)> = self
            .jobs
            .iter()
            .filter(|job| job.state == JobState::Pending && job.created_at < created_before)
            .map(|job| (job.created_at, job.id))
            .collect();
        pending.sort();
        Ok(pending.into_iter().map(|(_, id)| id).collect())
    }

    async fn delete_job(
        &self,
        job_id: Uuid,
        actor_id: &str,
    ) -> Result<Option<DeletedJob>, StoreError> {
        let Some((_, job)) = self
            .jobs
            .remove_if(&job_id, |_, job| job.actor_id == actor_id)
        else {
            return Ok(None);
        };

        let credited = i64::from(job.credited_score());
        let total_score = if credited > 0 {
            self.accounts
                .get_mut(actor_id)
                .map(|mut account| {
                    account.total_score -= credited;
                    account.total_score
                })
                .unwrap_or(0)
        } else {
            self.accounts
                .get(actor_id)
                .map(|account| account.total_score)
                .unwrap_or(0)
        };

        Ok(Some(DeletedJob { job, total_score }))
    }

    async fn set_visibility(&self, job_id: Uuid, is_public: bool) -> Result<bool, StoreError> {
        Ok(self
            .jobs
            .get_mut(&job_id)
            .map(|mut job| job.is_public = is_public)
            .is_some())
    }

    async fn get_account(&self, actor_id: &str) -> Result<Option<UserAccount>, StoreError> {
        Ok(self.accounts.get(actor_id).map(|account| account.clone()))
    }

    async fn top_accounts(&self, limit: u32) -> Result<Vec<UserAccount>, StoreError> {
        let mut accounts: Vec<UserAccount> =
            self.accounts.iter().map(|entry| entry.value().clone()).collect();
        accounts.sort_by(|a, b| {
            b.total_score
                .cmp(&a.total_score)
                .then_with(|| a.actor_id.cmp(&b.actor_id))
        });
        accounts.truncate(limit as usize);
        Ok(accounts)
    }

    async fn count_vouchers_since(
        &self,
        actor_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        Ok(self
            .vouchers
            .iter()
            .filter(|v| v.actor_id == actor_id && v.created_at >= since)
            .count() as u64)
    }

    async fn list_vouchers(&self, actor_id: &str) -> Result<Vec<Voucher>, StoreError> {
        let mut vouchers: Vec<Voucher> = self
            .vouchers
            .iter()
            .filter(|v| v.actor_id == actor_id)
            .map(|v| v.value().clone())
            .collect();
        vouchers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(vouchers)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
