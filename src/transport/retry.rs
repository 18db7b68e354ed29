//! Fixed-delay retry policy for outbound calls

use anyhow::{anyhow, Result};
use onebot_shared::limits;
use std::future::Future;
use tokio::time::{sleep, Duration};
use tracing::warn;

/// Retry an operation a fixed number of times with a fixed delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, at least one
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// `attempts` tries spaced by the standard retry delay
    pub fn fixed(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            delay: Duration::from_millis(limits::RETRY_DELAY_MS),
        }
    }

    /// Run `op` until it succeeds or the attempts are used up
    ///
    /// Returns the last error, with the attempt count as context.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("Failed to {} (attempt {}/{}): {:#}", what, attempt, attempts, e);
                    last_error = Some(e);
                    if attempt < attempts {
                        sleep(self.delay).await;
                    }
                }
            }
        }

        let error = last_error.unwrap_or_else(|| anyhow!("no attempt made"));
        Err(error.context(format!("Failed to {} after {} attempts", what, attempts)))
    }
}
