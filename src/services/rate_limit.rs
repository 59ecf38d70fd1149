use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Outcome of a single rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Milliseconds until the current window closes, never negative.
    pub fn retry_after_ms(&self, now: DateTime<Utc>) -> u64 {
        (self.reset_at - now).num_milliseconds().max(0) as u64
    }
}

/// Configured budget for submissions per actor.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub limit: u32,
    pub window: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            limit: 10,
            window: Duration::from_secs(60),
        }
    }
}

/// Counter store behind the submission gate.
///
/// The in-process implementation is enough for a single instance; a shared
/// store can implement the same contract for multi-instance deployments.
pub trait RateLimitStore: Send + Sync {
    fn check(&self, key: &str, limit: u32, window: Duration) -> RateLimitDecision;

    /// Drop records whose window has closed. Returns how many were evicted.
    fn sweep_expired(&self) -> usize;
}

#[derive(Debug, Clone, Copy)]
struct RateLimitRecord {
    count: u32,
    window_expires_at: DateTime<Utc>,
}

/// Fixed-window counter keyed by actor, held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryRateLimiter {
    records: DashMap<String, RateLimitRecord>,
}

impl InMemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_at(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        if limit == 0 {
            return RateLimitDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset_at: now + window_delta(window),
            };
        }

        let fresh = || RateLimitRecord {
            count: 1,
            window_expires_at: now + window_delta(window),
        };

        // The entry guard holds the shard lock, so check-and-increment is atomic per key.
        let record = match self.records.entry(key.to_string()) {
            Entry::Vacant(vacant) => *vacant.insert(fresh()),
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                if now >= record.window_expires_at {
                    *record = fresh();
                } else if record.count < limit {
                    record.count += 1;
                } else {
                    return RateLimitDecision {
                        allowed: false,
                        limit,
                        remaining: 0,
                        reset_at: record.window_expires_at,
                    };
                }
                *record
            }
        };

        RateLimitDecision {
            allowed: record.count <= limit,
            limit,
            remaining: limit.saturating_sub(record.count),
            reset_at: record.window_expires_at,
        }
    }

    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| record.window_expires_at > now);
        before.saturating_sub(self.records.len())
    }

    pub fn tracked_keys(&self) -> usize {
        self.records.len()
    }
}

impl RateLimitStore for InMemoryRateLimiter {
    fn check(&self, key: &str, limit: u32, window: Duration) -> RateLimitDecision {
        self.check_at(key, limit, window, Utc::now())
    }

    fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now())
    }
}

fn window_delta(window: Duration) -> chrono::Duration {
    chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::days(3650))
}

/// Periodically evict expired records so idle actors do not accumulate.
pub fn spawn_sweeper(store: Arc<dyn RateLimitStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = store.sweep_expired();
            if evicted > 0 {
                tracing::debug!(evicted, "Swept expired rate-limit records");
            }
        }
    })
}
