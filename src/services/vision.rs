use rand::Rng;
use serde::Deserialize;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use crate::models::job::ScanSource;
use crate::services::workers_ai::{extract_json_object, AiError, VisionModel};

const ANALYSIS_PROMPT: &str = concat!(
    "You are judging a photo submitted to an eco-friendly habits app. ",
    "Decide whether it genuinely shows an environmentally positive action ",
    "(recycling, reusable bottle or bag, public transport, cycling, composting, planting, ",
    "saving energy). Respond ONLY with JSON of the form ",
    "{\"verified\": true|false, \"score\": <integer 0-100>, ",
    "\"action\": \"<short label>\", \"narrative\": \"<one or two encouraging sentences>\"}."
);

const DEFAULT_ACTION_LABEL: &str = "Eco-friendly action";
const DEFAULT_NARRATIVE: &str = "Thanks for doing your part for the planet!";
const FALLBACK_NARRATIVE: &str =
    "We couldn't fully analyze your photo right now, but thanks for taking action for the planet!";
const MAX_SCORE: u32 = 100;

/// Scoring knobs for the vision stage.
#[derive(Debug, Clone)]
pub struct VisionPolicy {
    pub timeout: Duration,
    /// Range for substitute scores when the model is unavailable or omits one.
    pub fallback_scores: RangeInclusive<u32>,
}

impl Default for VisionPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(25),
            fallback_scores: 20..=80,
        }
    }
}

/// Result of scoring one photo.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanAssessment {
    pub verified: bool,
    pub score: u32,
    pub action_label: String,
    pub narrative: String,
    pub fallback: bool,
}

impl ScanAssessment {
    /// Outcome for a submission that carried no photo.
    pub fn missing_photo() -> Self {
        Self {
            verified: false,
            score: 0,
            action_label: DEFAULT_ACTION_LABEL.to_string(),
            narrative: "No photo was attached, so there was nothing to verify.".to_string(),
            fallback: false,
        }
    }

    /// Gallery uploads are devalued to zero whatever the model reported.
    pub fn apply_source_policy(mut self, source: ScanSource) -> Self {
        if source == ScanSource::Gallery {
            self.score = 0;
        }
        self
    }
}

/// Shape of the model's JSON answer. Every field is optional because models drift.
#[derive(Debug, Deserialize)]
struct RawAssessment {
    #[serde(default)]
    verified: Option<bool>,
    #[serde(default, alias = "points")]
    score: Option<serde_json::Value>,
    #[serde(default, alias = "actionLabel", alias = "action_label", alias = "label")]
    action: Option<String>,
    #[serde(default, alias = "description", alias = "message", alias = "feedback")]
    narrative: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Scores photos with a vision model and never fails: every problem with the
/// model degrades to an optimistic fallback assessment.
pub struct VisionAnalyzer {
    model: Option<Arc<dyn VisionModel>>,
    policy: VisionPolicy,
}

impl VisionAnalyzer {
    /// `model` is `None` when no credentials are configured.
    pub fn new(model: Option<Arc<dyn VisionModel>>, policy: VisionPolicy) -> Self {
        Self { model, policy }
    }

    pub async fn analyze(&self, image: &str) -> ScanAssessment {
        let Some(model) = &self.model else {
            tracing::warn!("Vision credentials not configured, using fallback assessment");
            return self.fallback("credentials missing");
        };

        let reply = match tokio::time::timeout(
            self.policy.timeout,
            model.describe(image, ANALYSIS_PROMPT),
        )
        .await
        {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Vision model call failed");
                return self.fallback("model error");
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.policy.timeout.as_millis() as u64,
                    "Vision model call timed out"
                );
                return self.fallback("timeout");
            }
        };

        match self.parse(&reply) {
            Ok(assessment) => assessment,
            Err(e) => {
                tracing::warn!(error = %e, "Vision model reply was not usable");
                self.fallback("unparsable reply")
            }
        }
    }

    fn parse(&self, reply: &str) -> Result<ScanAssessment, AiError> {
        let object = extract_json_object(reply).ok_or(AiError::EmptyResult)?;
        let raw: RawAssessment = serde_json::from_str(object)?;

        if let Some(error) = raw.error.filter(|e| !e.is_null()) {
            return Err(AiError::Upstream {
                code: 0,
                message: error.to_string(),
            });
        }

        let verified = raw.verified.unwrap_or(true);
        let score = if verified {
            raw.score
                .as_ref()
                .and_then(parse_score)
                .unwrap_or_else(|| self.random_score())
        } else {
            0
        };

        Ok(ScanAssessment {
            verified,
            score,
            action_label: non_empty(raw.action).unwrap_or_else(|| DEFAULT_ACTION_LABEL.to_string()),
            narrative: non_empty(raw.narrative).unwrap_or_else(|| DEFAULT_NARRATIVE.to_string()),
            fallback: false,
        })
    }

    fn fallback(&self, reason: &'static str) -> ScanAssessment {
        metrics::counter!("vision_fallback_total", "reason" => reason).increment(1);
        ScanAssessment {
            verified: true,
            score: self.random_score(),
            action_label: DEFAULT_ACTION_LABEL.to_string(),
            narrative: FALLBACK_NARRATIVE.to_string(),
            fallback: true,
        }
    }

    fn random_score(&self) -> u32 {
        let range = &self.policy.fallback_scores;
        if range.is_empty() {
            return *range.start();
        }
        rand::thread_rng().gen_range(range.clone())
    }
}

/// Accept integer, float or numeric-string scores, clamped to 0..=100.
fn parse_score(value: &serde_json::Value) -> Option<u32> {
    let number = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !number.is_finite() {
        return None;
    }
    Some(number.round().clamp(0.0, MAX_SCORE as f64) as u32)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
