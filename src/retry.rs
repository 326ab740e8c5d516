//! Retry utilities with exponential backoff and jitter.
//!
//! Two flavours live here:
//!
//! - [`retry_with_backoff`] retries a single async call inline. Startup work
//!   (CRD and webhook configuration installation) uses it while the API
//!   server may still be warming up.
//! - [`Backoff`] tracks consecutive failures per object for the controllers'
//!   error policies, so repeated failures of one key back off exponentially
//!   without slowing down other keys.

use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tracing::{error, warn};

/// Backoff parameters shared by inline retries and per-object requeues.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Multiplier applied per consecutive failure
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Un-jittered delay before attempt `failures + 1`
    ///
    /// `failures` counts consecutive failures so far; the first failure
    /// waits `initial_delay`.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
            .unwrap_or(self.max_delay)
    }
}

/// Scale a delay by a random factor in `0.5..1.5`.
fn jitter(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.5..1.5);
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(delay)
}

/// Execute an async operation with exponential backoff and jitter.
///
/// Retries until success, or until `max_attempts` is reached when set, in
/// which case the last error is returned.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                let delay = jitter(config.delay_for(attempt));
                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Per-object consecutive failure counter used by controller error policies.
#[derive(Debug, Default)]
pub struct Backoff {
    config: RetryConfig,
    failures: DashMap<String, u32>,
}

impl Backoff {
    /// Create a tracker using the given backoff parameters
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            failures: DashMap::new(),
        }
    }

    /// Record a failure for `key` and return the jittered requeue delay
    pub fn next_delay(&self, key: &str) -> Duration {
        let failures = {
            let mut entry = self.failures.entry(key.to_string()).or_insert(0);
            let next = entry.saturating_add(1);
            *entry = next;
            next
        };
        jitter(self.config.delay_for(failures))
    }

    /// Forget the failure history of `key` after a successful pass
    pub fn reset(&self, key: &str) {
        self.failures.remove(key);
    }

    /// Consecutive failures currently recorded for `key`
    pub fn failures(&self, key: &str) -> u32 {
        self.failures.get(key).map(|v| *v).unwrap_or(0)
    }
}
