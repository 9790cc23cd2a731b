//! Bounded retry with exponential backoff
//!
//! Every transient operation in a run (archival, dumps, uploads) goes
//! through [`RetryPolicy::execute`]. Backoff is strict doubling with no
//! jitter; the sleep is cooperative so concurrent fan-out tasks keep
//! making progress while one of them backs off.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("'{label}' failed after {attempts} attempts: {last_error}")]
    Exhausted {
        label: String,
        attempts: u32,
        last_error: String,
    },
}

/// Retry configuration: total attempts (not extra retries) and the delay
/// before the second attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Invoke `op` until it succeeds or attempts run out.
    ///
    /// Waits `initial_delay * 2^attempt_index` between attempts. Each failed
    /// attempt is logged before the sleep; the final failure is not logged
    /// here (the caller decides how loud to be) and is returned as
    /// [`RetryError::Exhausted`] wrapping the last error's message.
    pub async fn execute<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut last_error = String::new();

        for attempt in 0..self.max_attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    last_error = format!("{:#}", e);
                    if attempt + 1 < self.max_attempts {
                        let delay = self.initial_delay * 2u32.pow(attempt);
                        warn!(
                            "'{}' failed (attempt {}/{}): {} - retrying in {:?}",
                            label,
                            attempt + 1,
                            self.max_attempts,
                            last_error,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(RetryError::Exhausted {
            label: label.to_string(),
            attempts: self.max_attempts,
            last_error,
        })
    }
}
