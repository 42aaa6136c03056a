//! Tunables for the engine's caches, retries and polling.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// How long a validation result stays fresh.
pub const VALIDATION_TTL: Duration = Duration::from_millis(300_000);
/// Delay before a scheduled existence lookup runs.
pub const LOOKUP_DELAY: Duration = Duration::from_millis(1_000);
/// Interval between registration progress polls.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub validation_ttl: Duration,
    pub lookup_delay: Duration,
    pub move_retry: RetryPolicy,
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            validation_ttl: VALIDATION_TTL,
            lookup_delay: LOOKUP_DELAY,
            move_retry: RetryPolicy::default(),
            poll_interval: POLL_INTERVAL,
        }
    }
}
