use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate reward record for one actor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserAccount {
    pub actor_id: String,
    pub display_name: Option<String>,
    pub avatar_ref: Option<String>,
    pub total_score: i64,
    pub last_active_at: DateTime<Utc>,
}
