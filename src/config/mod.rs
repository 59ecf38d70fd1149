use serde::Deserialize;
use std::time::Duration;

use crate::services::preprocess::PreprocessPolicy;
use crate::services::rate_limit::RateLimitPolicy;
use crate::services::vision::VisionPolicy;
use crate::services::voucher::VoucherPolicy;

/// Which executor runs the background pipeline.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    /// Tokio tasks inside the API process.
    #[default]
    Spawn,
    /// Redis list drained by the `worker` binary.
    Queue,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Unused by the worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string. Without it jobs live in process memory.
    pub database_url: Option<String>,

    /// Redis connection string for the job queue
    pub redis_url: Option<String>,

    #[serde(default)]
    pub executor: ExecutorKind,

    /// Cloudflare account ID
    pub cf_account_id: Option<String>,

    /// Cloudflare Workers AI API token
    pub cf_api_token: Option<String>,

    pub r2_bucket: Option<String>,
    pub r2_access_key: Option<String>,
    pub r2_secret_key: Option<String>,
    pub r2_endpoint: Option<String>,

    /// AES-256-GCM key for photos at rest (base64-encoded, 32 bytes)
    pub encryption_key: Option<String>,

    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max: u32,
    #[serde(default = "default_rate_limit_window_ms")]
    pub rate_limit_window_ms: u64,
    #[serde(default = "default_rate_limit_sweep_secs")]
    pub rate_limit_sweep_secs: u64,

    #[serde(default = "default_vision_timeout_ms")]
    pub vision_timeout_ms: u64,
    #[serde(default = "default_voucher_timeout_ms")]
    pub voucher_timeout_ms: u64,
    #[serde(default = "default_fallback_score_min")]
    pub fallback_score_min: u32,
    #[serde(default = "default_fallback_score_max")]
    pub fallback_score_max: u32,

    #[serde(default = "default_voucher_score_threshold")]
    pub voucher_score_threshold: u32,
    #[serde(default = "default_voucher_tier_midpoint")]
    pub voucher_tier_midpoint: u32,
    #[serde(default = "default_voucher_daily_cap")]
    pub voucher_daily_cap: u64,
    #[serde(default = "default_voucher_validity_days")]
    pub voucher_validity_days: i64,

    #[serde(default = "default_max_image_edge")]
    pub max_image_edge: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}
fn default_rate_limit_max() -> u32 {
    10
}
fn default_rate_limit_window_ms() -> u64 {
    60_000
}
fn default_rate_limit_sweep_secs() -> u64 {
    60
}
fn default_vision_timeout_ms() -> u64 {
    25_000
}
fn default_voucher_timeout_ms() -> u64 {
    15_000
}
fn default_fallback_score_min() -> u32 {
    20
}
fn default_fallback_score_max() -> u32 {
    80
}
fn default_voucher_score_threshold() -> u32 {
    50
}
fn default_voucher_tier_midpoint() -> u32 {
    75
}
fn default_voucher_daily_cap() -> u64 {
    5
}
fn default_voucher_validity_days() -> i64 {
    30
}
fn default_max_image_edge() -> u32 {
    1024
}
fn default_jpeg_quality() -> u8 {
    70
}
fn default_max_concurrent_jobs() -> usize {
    32
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Cloudflare credentials, when both halves are present.
    pub fn workers_ai_credentials(&self) -> Option<(&str, &str)> {
        match (&self.cf_account_id, &self.cf_api_token) {
            (Some(account), Some(token)) if !account.is_empty() && !token.is_empty() => {
                Some((account.as_str(), token.as_str()))
            }
            _ => None,
        }
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            limit: self.rate_limit_max.max(1),
            window: Duration::from_millis(self.rate_limit_window_ms),
        }
    }

    pub fn rate_limit_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.rate_limit_sweep_secs.max(1))
    }

    pub fn vision_policy(&self) -> VisionPolicy {
        // Fallback scores stay within 1..=100; a zero would read as a rejection.
        let low = self.fallback_score_min.min(self.fallback_score_max).clamp(1, 100);
        let high = self.fallback_score_min.max(self.fallback_score_max).clamp(low, 100);
        VisionPolicy {
            timeout: Duration::from_millis(self.vision_timeout_ms),
            fallback_scores: low..=high,
        }
    }

    pub fn voucher_policy(&self) -> VoucherPolicy {
        VoucherPolicy {
            score_threshold: self.voucher_score_threshold,
            tier_midpoint: self.voucher_tier_midpoint,
            daily_cap: self.voucher_daily_cap,
            validity: chrono::Duration::days(self.voucher_validity_days.max(1)),
            timeout: Duration::from_millis(self.voucher_timeout_ms),
        }
    }

    pub fn preprocess_policy(&self) -> PreprocessPolicy {
        PreprocessPolicy {
            max_edge: self.max_image_edge.max(1),
            quality: self.jpeg_quality.clamp(1, 100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> AppConfig {
        envy::from_iter(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_environment_uses_defaults() {
        let config = from_pairs(&[]);
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.executor, ExecutorKind::Spawn);
        assert!(config.database_url.is_none());
        assert!(config.workers_ai_credentials().is_none());

        let rate = config.rate_limit_policy();
        assert_eq!(rate.limit, 10);
        assert_eq!(rate.window, Duration::from_secs(60));
        assert_eq!(config.vision_policy().fallback_scores, 20..=80);
        assert_eq!(config.voucher_policy().daily_cap, 5);
        assert_eq!(config.preprocess_policy().quality, 70);
    }

    #[test]
    fn test_overrides_and_queue_executor() {
        let config = from_pairs(&[
            ("EXECUTOR", "queue"),
            ("RATE_LIMIT_MAX", "3"),
            ("FALLBACK_SCORE_MIN", "90"),
            ("FALLBACK_SCORE_MAX", "40"),
            ("CF_ACCOUNT_ID", "acct"),
            ("CF_API_TOKEN", "token"),
        ]);
        assert_eq!(config.executor, ExecutorKind::Queue);
        assert_eq!(config.rate_limit_policy().limit, 3);
        assert_eq!(config.vision_policy().fallback_scores, 40..=90);
        assert_eq!(config.workers_ai_credentials(), Some(("acct", "token")));
    }

    #[test]
    fn test_degenerate_limits_are_clamped() {
        let config = from_pairs(&[
            ("RATE_LIMIT_MAX", "0"),
            ("FALLBACK_SCORE_MIN", "0"),
            ("FALLBACK_SCORE_MAX", "0"),
        ]);
        assert_eq!(config.rate_limit_policy().limit, 1);
        assert_eq!(config.vision_policy().fallback_scores, 1..=1);

        let wide = from_pairs(&[("FALLBACK_SCORE_MIN", "0"), ("FALLBACK_SCORE_MAX", "500")]);
        assert_eq!(wide.vision_policy().fallback_scores, 1..=100);
    }
}
