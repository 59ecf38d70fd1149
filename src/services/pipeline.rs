use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::db::{RewardStore, StoreError};
use crate::models::job::{ScanOutcome, VerificationJob};
use crate::services::ledger::LedgerUpdater;
use crate::services::preprocess::ImagePreprocessor;
use crate::services::storage::{PhotoStore, StorageError};
use crate::services::vision::{ScanAssessment, VisionAnalyzer};
use crate::services::voucher::VoucherIssuer;

/// Background processing for one scan: preprocess, analyze, voucher, ledger.
///
/// `run` always leaves the job in a terminal state.
pub struct ScanPipeline {
    store: Arc<dyn RewardStore>,
    photos: Arc<dyn PhotoStore>,
    preprocessor: ImagePreprocessor,
    analyzer: VisionAnalyzer,
    vouchers: VoucherIssuer,
    ledger: LedgerUpdater,
}

impl ScanPipeline {
    pub fn new(
        store: Arc<dyn RewardStore>,
        photos: Arc<dyn PhotoStore>,
        preprocessor: ImagePreprocessor,
        analyzer: VisionAnalyzer,
        vouchers: VoucherIssuer,
    ) -> Self {
        Self {
            ledger: LedgerUpdater::new(store.clone()),
            store,
            photos,
            preprocessor,
            analyzer,
            vouchers,
        }
    }

    #[tracing::instrument(skip_all, fields(job_id = %job_id))]
    pub async fn run(&self, job_id: Uuid) {
        let start = Instant::now();

        match self.process(job_id).await {
            Ok(Some(outcome)) => {
                metrics::counter!("scan_jobs_completed_total").increment(1);
                tracing::info!(
                    verified = outcome.verified,
                    score = outcome.score,
                    fallback = outcome.fallback,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Scan completed"
                );
            }
            Ok(None) => {
                tracing::debug!("Scan already terminal or removed, nothing to do");
            }
            Err(e) => {
                tracing::error!(error = %e, "Scan processing failed");
                self.fail(job_id, &e.to_string()).await;
            }
        }

        metrics::histogram!("scan_processing_seconds").record(start.elapsed().as_secs_f64());
    }

    /// Mark a job failed after processing aborted outside `run` (e.g. a panic).
    pub async fn fail(&self, job_id: Uuid, reason: &str) {
        match self.ledger.record_failure(job_id, reason).await {
            Ok(true) => metrics::counter!("scan_jobs_failed_total").increment(1),
            Ok(false) => {}
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Could not record job failure");
            }
        }
    }

    async fn process(&self, job_id: Uuid) -> Result<Option<ScanOutcome>, PipelineError> {
        let Some(job) = self.store.get_job(job_id).await? else {
            return Ok(None);
        };
        if job.state.is_terminal() {
            return Ok(None);
        }

        let photo = self.prepare_photo(&job).await?;

        let assessment = match &photo {
            Some(photo) => self.analyzer.analyze(photo).await,
            None => ScanAssessment::missing_photo(),
        }
        .apply_source_policy(job.source);

        let voucher = if self.vouchers.qualifies(&assessment) {
            self.vouchers
                .maybe_issue(&assessment.action_label, assessment.score, &job.actor_id)
                .await?
        } else {
            None
        };

        let outcome = ScanOutcome {
            verified: assessment.verified,
            score: assessment.score,
            action_label: assessment.action_label,
            narrative: assessment.narrative,
            voucher,
            audio_ref: None,
            fallback: assessment.fallback,
        };

        let applied = self.ledger.apply_outcome(&job, &outcome).await?;
        Ok(applied.then_some(outcome))
    }

    /// Load the stored photo and, unless the scan is simulated, normalize it and
    /// write the normalized version back in place.
    async fn prepare_photo(&self, job: &VerificationJob) -> Result<Option<String>, PipelineError> {
        let Some(key) = &job.image_key else {
            return Ok(None);
        };

        let stored = self.photos.get(key).await?;
        let raw = String::from_utf8(stored)
            .map_err(|_| PipelineError::Photo("stored photo is not text".to_string()))?;

        if job.simulated {
            return Ok(Some(raw));
        }

        let preprocessor = self.preprocessor;
        let normalized = match tokio::task::spawn_blocking(move || {
            let normalized = preprocessor.compress(&raw);
            (raw, normalized)
        })
        .await
        {
            Ok((raw, normalized)) if normalized != raw => {
                self.photos.put(key, normalized.as_bytes()).await?;
                normalized
            }
            Ok((raw, _)) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "Preprocessing task aborted, using stored photo");
                let stored = self.photos.get(key).await?;
                String::from_utf8_lossy(&stored).into_owned()
            }
        };

        Ok(Some(normalized))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Photo storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Photo error: {0}")]
    Photo(String),
}
