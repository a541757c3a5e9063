//! Bounded retry with exponential backoff for synchronous store calls.

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 5000,
        }
    }
}

impl RetryConfig {
    /// No retries, no waiting.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay before retry number `attempt + 1`: base * 2^attempt, capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let delay = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    pub fn merge(&mut self, other: Self) {
        let default = RetryConfig::default();
        if other.max_retries != default.max_retries {
            self.max_retries = other.max_retries;
        }
        if other.base_delay_ms != default.base_delay_ms {
            self.base_delay_ms = other.base_delay_ms;
        }
        if other.max_delay_ms != default.max_delay_ms {
            self.max_delay_ms = other.max_delay_ms;
        }
    }
}

/// Run `operation` until it succeeds or `config.max_retries` retries have failed.
///
/// The last error is returned with the attempt count attached.
pub fn retry_blocking<T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < config.max_retries => {
                let delay = config.delay_for_attempt(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = config.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "store call failed, retrying"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => {
                return Err(e.wrap_err(format!(
                    "{} failed after {} attempt(s)",
                    operation_name,
                    attempt + 1
                )));
            }
        }
    }
}
