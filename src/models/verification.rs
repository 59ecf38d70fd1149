use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::account::UserAccount;
use crate::models::job::{JobState, ScanSource, VerificationJob};
use crate::models::voucher::Voucher;

/// Request to submit a photo for verification.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitScanRequest {
    #[garde(length(min = 1, max = 14680064))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[garde(required, length(min = 1, max = 128))]
    #[serde(default)]
    pub actor_id: Option<String>,

    #[garde(length(max = 100))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[garde(length(max = 2048))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,

    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,

    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ScanSource>,

    /// Hidden form field. Humans leave it empty.
    #[garde(skip)]
    #[serde(default, alias = "website", skip_serializing_if = "Option::is_none")]
    pub honeypot: Option<String>,

    #[garde(skip)]
    #[serde(default)]
    pub simulated: bool,
}

impl SubmitScanRequest {
    /// Trim free-text fields and collapse blank values to `None`, so an empty
    /// actor id is rejected exactly like a missing one.
    pub fn normalized(mut self) -> Self {
        self.actor_id = non_blank(self.actor_id);
        self.display_name = non_blank(self.display_name);
        self.avatar_ref = non_blank(self.avatar_ref);
        self.honeypot = non_blank(self.honeypot);
        self.image = self.image.filter(|image| !image.trim().is_empty());
        self
    }

    pub fn is_bot_traffic(&self) -> bool {
        self.honeypot.is_some()
    }
}

pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Response after submitting a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitScanResponse {
    pub job_id: Uuid,
    pub state: JobState,
}

/// Response for querying job status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub actor_id: String,
    pub state: JobState,
    pub is_public: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voucher: Option<Voucher>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<VerificationJob> for JobStatusResponse {
    fn from(job: VerificationJob) -> Self {
        let outcome = job.outcome;
        Self {
            job_id: job.id,
            actor_id: job.actor_id,
            state: job.state,
            is_public: job.is_public,
            verified: outcome.as_ref().map(|o| o.verified),
            score: outcome.as_ref().map(|o| o.score),
            action_label: outcome.as_ref().map(|o| o.action_label.clone()),
            narrative: outcome.as_ref().map(|o| o.narrative.clone()),
            audio_ref: outcome.as_ref().and_then(|o| o.audio_ref.clone()),
            voucher: outcome.and_then(|o| o.voucher),
            error: job.failure_reason,
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerQuery {
    #[serde(default)]
    pub actor_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityRequest {
    #[serde(default)]
    pub actor_id: Option<String>,
    pub is_public: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteScanResponse {
    pub success: bool,
    pub total_score: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityResponse {
    pub success: bool,
    pub is_public: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub actor_id: String,
    pub display_name: Option<String>,
    pub avatar_ref: Option<String>,
    pub total_score: i64,
}

impl LeaderboardEntry {
    pub fn ranked(accounts: Vec<UserAccount>) -> Vec<Self> {
        accounts
            .into_iter()
            .zip(1u32..)
            .map(|(account, rank)| Self {
                rank,
                actor_id: account.actor_id,
                display_name: account.display_name,
                avatar_ref: account.avatar_ref,
                total_score: account.total_score,
            })
            .collect()
    }
}
