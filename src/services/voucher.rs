use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::db::{RewardStore, StoreError};
use crate::models::voucher::Voucher;
use crate::services::vision::ScanAssessment;
use crate::services::workers_ai::{extract_json_object, AiError, TextModel};

/// Unambiguous characters for redeemable codes (no 0/O, 1/I/L).
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_PREFIX: &str = "ECO-";
const CODE_LENGTH: usize = 8;

/// Issuance rules for reward vouchers.
#[derive(Debug, Clone)]
pub struct VoucherPolicy {
    /// Minimum final score that qualifies a scan for a voucher.
    pub score_threshold: u32,
    /// Scores above this get the premium template tier.
    pub tier_midpoint: u32,
    /// Maximum vouchers per actor in any trailing 24 hours.
    pub daily_cap: u64,
    pub validity: chrono::Duration,
    pub timeout: Duration,
}

impl Default for VoucherPolicy {
    fn default() -> Self {
        Self {
            score_threshold: 50,
            tier_midpoint: 75,
            daily_cap: 5,
            validity: chrono::Duration::days(30),
            timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DraftVoucher {
    title: String,
    description: String,
    // Anything the model proposes for a code is discarded.
}

/// Drafts and gates reward vouchers. The model writes the prose only.
pub struct VoucherIssuer {
    store: Arc<dyn RewardStore>,
    model: Option<Arc<dyn TextModel>>,
    policy: VoucherPolicy,
}

impl VoucherIssuer {
    pub fn new(
        store: Arc<dyn RewardStore>,
        model: Option<Arc<dyn TextModel>>,
        policy: VoucherPolicy,
    ) -> Self {
        Self {
            store,
            model,
            policy,
        }
    }

    pub fn qualifies(&self, assessment: &ScanAssessment) -> bool {
        assessment.verified && assessment.score >= self.policy.score_threshold
    }

    /// Draft a voucher unless the actor already hit the daily cap.
    ///
    /// The voucher is not persisted here; the ledger inserts it together with
    /// the job's completion.
    pub async fn maybe_issue(
        &self,
        action_label: &str,
        score: u32,
        actor_id: &str,
    ) -> Result<Option<Voucher>, StoreError> {
        let now = Utc::now();
        let issued = self
            .store
            .count_vouchers_since(actor_id, now - chrono::Duration::hours(24))
            .await?;

        if issued >= self.policy.daily_cap {
            tracing::info!(
                actor_id,
                issued,
                cap = self.policy.daily_cap,
                "Daily voucher cap reached, skipping issuance"
            );
            return Ok(None);
        }

        let (title, description) = match self.draft(action_label, score).await {
            Ok(draft) => (draft.title, draft.description),
            Err(e) => {
                tracing::warn!(error = %e, "Voucher drafting failed, using template");
                self.template(action_label, score)
            }
        };

        Ok(Some(Voucher {
            id: Uuid::new_v4(),
            actor_id: actor_id.to_string(),
            title,
            description,
            code: generate_code(),
            used: false,
            created_at: now,
            expires_at: expiry(now, self.policy.validity),
        }))
    }

    async fn draft(&self, action_label: &str, score: u32) -> Result<DraftVoucher, AiError> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| AiError::Input("text model not configured".to_string()))?;

        let prompt = format!(
            "Write a reward voucher for a user who earned {} points for: {}. \
             Respond ONLY with JSON {{\"title\": \"<max 8 words>\", \
             \"description\": \"<one sentence offer from a sustainable partner brand>\"}}.",
            score, action_label
        );

        let reply = tokio::time::timeout(self.policy.timeout, model.generate(&prompt))
            .await
            .map_err(|_| AiError::Input("voucher drafting timed out".to_string()))??;

        let object = extract_json_object(&reply).ok_or(AiError::EmptyResult)?;
        let draft: DraftVoucher = serde_json::from_str(object)?;
        if draft.title.trim().is_empty() || draft.description.trim().is_empty() {
            return Err(AiError::EmptyResult);
        }
        Ok(draft)
    }

    fn template(&self, action_label: &str, score: u32) -> (String, String) {
        if score > self.policy.tier_midpoint {
            (
                "20% off sustainable essentials".to_string(),
                format!(
                    "An outstanding {} earned you 20% off your next purchase at a partner eco store.",
                    action_label.to_lowercase()
                ),
            )
        } else {
            (
                "10% off sustainable essentials".to_string(),
                format!(
                    "Thanks for your {}. Enjoy 10% off your next purchase at a partner eco store.",
                    action_label.to_lowercase()
                ),
            )
        }
    }
}

/// Locally generated redeemable code, e.g. `ECO-7KQ2MZ4P`.
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect();
    format!("{}{}", CODE_PREFIX, suffix)
}

fn expiry(now: DateTime<Utc>, validity: chrono::Duration) -> DateTime<Utc> {
    now.checked_add_signed(validity).unwrap_or(now)
}
