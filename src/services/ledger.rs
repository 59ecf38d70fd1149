use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{FinalizeJob, RewardStore, StoreError};
use crate::models::job::{ActorProfile, ScanOutcome, VerificationJob};

/// Sole writer of score credits and voucher records.
pub struct LedgerUpdater {
    store: Arc<dyn RewardStore>,
}

impl LedgerUpdater {
    pub fn new(store: Arc<dyn RewardStore>) -> Self {
        Self { store }
    }

    /// Complete `job` with `outcome`, crediting its score and inserting its voucher
    /// in one atomic store operation.
    ///
    /// Returns `false` when the job was no longer Pending (already terminal or
    /// deleted by its owner); nothing is applied in that case.
    pub async fn apply_outcome(
        &self,
        job: &VerificationJob,
        outcome: &ScanOutcome,
    ) -> Result<bool, StoreError> {
        let score_delta = if outcome.verified && !job.actor_id.is_empty() {
            i64::from(outcome.score)
        } else {
            0
        };

        let applied = self
            .store
            .finalize_job(FinalizeJob {
                job_id: job.id,
                actor_id: &job.actor_id,
                profile: ActorProfile::from(job),
                outcome,
                score_delta,
                voucher: outcome.voucher.as_ref(),
                completed_at: Utc::now(),
            })
            .await?;

        if applied {
            tracing::info!(
                job_id = %job.id,
                actor_id = %job.actor_id,
                score = outcome.score,
                voucher = outcome.voucher.is_some(),
                "Ledger updated"
            );
            if outcome.voucher.is_some() {
                metrics::counter!("vouchers_issued_total").increment(1);
            }
        } else {
            tracing::warn!(job_id = %job.id, "Job no longer pending, outcome discarded");
        }

        Ok(applied)
    }

    /// Record a degraded terminal state so the job never stays Pending.
    pub async fn record_failure(&self, job_id: Uuid, reason: &str) -> Result<bool, StoreError> {
        let failed = self.store.fail_job(job_id, reason).await?;
        if failed {
            tracing::warn!(job_id = %job_id, reason, "Job marked failed");
        }
        Ok(failed)
    }
}
