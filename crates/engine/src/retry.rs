//! Whole-operation retry for callers that want it. The engine never retries
//! on its own; this wraps a complete logical write (its own transaction
//! included) and re-runs it while the failure is retryable.

use std::time::Duration;

use tracing::warn;

use crate::error::EngineError;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_retries: usize,
    /// Base delay between retries in milliseconds (exponential backoff)
    pub base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 10,
            max_delay_ms: 100,
        }
    }
}

impl RetryConfig {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub(crate) fn delay(&self, attempt: usize) -> Duration {
        let shift = attempt.min(63) as u32;
        let ms = self
            .base_delay_ms
            .saturating_mul(1u64.checked_shl(shift).unwrap_or(u64::MAX))
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent.
pub fn with_retry<T, F>(config: &RetryConfig, mut op: F) -> Result<T, EngineError>
where
    F: FnMut() -> Result<T, EngineError>,
{
    let mut attempt = 0;
    loop {
        match op() {
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                warn!(target: "optilock::retry", attempt, error = %e, "retrying after serialization failure");
                std::thread::sleep(config.delay(attempt));
                attempt += 1;
            }
            other => return other,
        }
    }
}
