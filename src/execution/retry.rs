//! Bounded retry with exponential backoff for broker calls

use super::BrokerError;
use crate::config::BrokerConfig;
use std::future::Future;
use std::time::Duration;

/// Timeout and backoff settings for one broker operation
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Per-attempt timeout
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&BrokerConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            timeout: Duration::from_millis(config.request_timeout_ms),
        }
    }

    /// Single attempt, same timeout
    pub fn no_retry(&self) -> Self {
        Self {
            max_retries: 0,
            ..self.clone()
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Run `operation` until it succeeds, fails permanently, or retries run out.
///
/// Each attempt is bounded by `policy.timeout`; an elapsed attempt counts as
/// [`BrokerError::Timeout`]. Callers must make `operation` idempotent, normally
/// by reusing the same client order id on every attempt.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    op_name: &str,
    mut operation: F,
) -> Result<T, BrokerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BrokerError>>,
{
    let timeout_ms = u64::try_from(policy.timeout.as_millis()).unwrap_or(u64::MAX);
    let mut attempt = 0;

    loop {
        let started = std::time::Instant::now();
        let result = match tokio::time::timeout(policy.timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout(timeout_ms)),
        };
        crate::telemetry::record_broker_latency(op_name, started.elapsed());

        match result {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(op = op_name, attempts = attempt + 1, "Broker call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    op = op_name,
                    error = %e,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Broker call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                tracing::warn!(op = op_name, error = %e, attempts = attempt + 1, "Broker call failed");
                return Err(e);
            }
        }
    }
}
