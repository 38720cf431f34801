use rand::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Backoff for re-sending a node command after a transient failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_retries() -> u32 {
    5
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_retries: default_max_retries(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after this many milliseconds.
    Retry(u64),
    GiveUp,
}

/// Delay before retry number `attempt` (zero based): `base * 2^attempt`,
/// capped at `max_delay_ms`, with up to 20% jitter either way.
pub fn calculate_retry_delay(attempt: u32, config: &RetryConfig) -> RetryDecision {
    if attempt >= config.max_retries {
        debug!(max_retries = config.max_retries, "Retries exhausted");
        return RetryDecision::GiveUp;
    }

    let delay_ms = config
        .base_delay_ms
        .saturating_mul(2_u64.saturating_pow(attempt))
        .min(config.max_delay_ms);

    let delay_ms = if config.jitter && delay_ms > 0 {
        let jitter = delay_ms / 5;
        let mut rng = rand::rng();
        let offset = rng.random_range(0..=jitter);
        if rng.random_bool(0.5) {
            delay_ms.saturating_add(offset)
        } else {
            delay_ms.saturating_sub(offset)
        }
    } else {
        delay_ms
    };

    RetryDecision::Retry(delay_ms)
}
