use crate::error::{CoreError, CoreResult};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff with jitter for transient upstream failures.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub init: Duration,
    pub factor: f64,
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Fractional jitter applied to each delay (0.25 = ±25%).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            init: Duration::from_millis(500),
            factor: 2.0,
            max_attempts: 3,
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `retry` (0-based), jitter applied.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.init.as_secs_f64() * self.factor.powi(retry as i32);
        let spread = rand::rng().random_range(1.0 - self.jitter..=1.0 + self.jitter);
        Duration::from_secs_f64(base * spread)
    }

    /// Undithered delay, used by tests to pin expectations.
    pub fn base_delay_for(&self, retry: u32) -> Duration {
        Duration::from_secs_f64(self.init.as_secs_f64() * self.factor.powi(retry as i32))
    }
}

/// Run `op`, retrying on `CoreError::retryable()` failures until the policy
/// is exhausted. The last error propagates unchanged.
pub async fn retry_transient<T, F, Fut>(
    policy: &BackoffPolicy,
    task_name: &str,
    mut op: F,
) -> CoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CoreResult<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.retryable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    task = task_name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Convenience wrapper marking reqwest failures as transient/permanent based
/// on status class, used by the embedding and synthesizer clients.
pub fn classify_http_status(status: reqwest::StatusCode, body: &str) -> CoreError {
    if status.as_u16() == 429 || status.is_server_error() {
        CoreError::TransientUpstream(format!("upstream {}: {}", status, body))
    } else {
        CoreError::PermanentUpstream(format!("upstream {}: {}", status, body))
    }
}
