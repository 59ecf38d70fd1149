use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::voucher::Voucher;

/// Lifecycle state of a scan verification job.
///
/// `Pending` moves to exactly one of the terminal states and never leaves it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Pending,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobState::Pending)
    }
}

/// Where the photo came from. Gallery uploads never earn points.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, EnumString, Display, PartialEq, Eq,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ScanSource {
    #[default]
    Camera,
    Gallery,
}

/// Result recorded on a job once it completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanOutcome {
    pub verified: bool,
    pub score: u32,
    pub action_label: String,
    pub narrative: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voucher: Option<Voucher>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_ref: Option<String>,
    /// Set when the vision capability was unavailable and the optimistic
    /// fallback produced this outcome.
    #[serde(default)]
    pub fallback: bool,
}

/// A submitted scan and its lifecycle record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationJob {
    pub id: Uuid,
    pub actor_id: String,
    pub display_name: Option<String>,
    pub avatar_ref: Option<String>,
    pub image_key: Option<String>,
    pub is_public: bool,
    pub source: ScanSource,
    pub simulated: bool,
    pub state: JobState,
    pub outcome: Option<ScanOutcome>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl VerificationJob {
    /// Score this job contributed to its actor's total, if any.
    pub fn credited_score(&self) -> u32 {
        match (&self.state, &self.outcome) {
            (JobState::Completed, Some(outcome)) => outcome.score,
            _ => 0,
        }
    }
}

/// Profile hints carried with a submission and used when the ledger creates
/// the actor's account on first credit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActorProfile {
    pub display_name: Option<String>,
    pub avatar_ref: Option<String>,
}

impl From<&VerificationJob> for ActorProfile {
    fn from(job: &VerificationJob) -> Self {
        Self {
            display_name: job.display_name.clone(),
            avatar_ref: job.avatar_ref.clone(),
        }
    }
}
