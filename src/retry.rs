//! Bounded retry policy shared by planning and step execution.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{AgentError, Result};
use crate::hands::BrowserDriver;

/// What to do to the page before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    None,
    /// Scroll the viewport down by this many pixels to surface new content.
    ScrollBy(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first one.
    pub max_attempts: u32,
    /// Pause after the first failure.
    pub delay: Duration,
    /// Multiplier applied to `delay` for every further failure. `1.0` keeps it fixed.
    pub backoff: f64,
    pub recovery: Recovery,
}

impl RetryPolicy {
    /// A single attempt, no recovery.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
            backoff: 1.0,
            recovery: Recovery::None,
        }
    }

    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            backoff: 1.0,
            recovery: Recovery::None,
        }
    }

    pub fn with_backoff(mut self, backoff: f64) -> Self {
        self.backoff = if backoff.is_finite() && backoff >= 1.0 {
            backoff
        } else {
            1.0
        };
        self
    }

    pub fn with_recovery(mut self, recovery: Recovery) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// `true` while `failures` has not yet used up the budget.
    pub fn allows_retry(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }

    /// Pause to apply after the `failures`-th failure (1-based).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(16) as i32;
        let secs = self.delay.as_secs_f64() * self.backoff.powi(exp);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Apply the recovery nudge to the page, then wait out the delay.
    pub async fn recover(&self, driver: &dyn BrowserDriver, failures: u32) -> Result<()> {
        if let Recovery::ScrollBy(pixels) = self.recovery {
            driver.scroll_by(pixels).await?;
        }
        tokio::time::sleep(self.delay_for(failures)).await;
        Ok(())
    }

    /// Run `op` until it succeeds or the attempt budget runs out. The last
    /// error is returned on exhaustion. An exhausted session ends the loop
    /// early since every further call would be refused.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut failures = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    failures += 1;
                    if !self.allows_retry(failures) || matches!(e, AgentError::Exhausted { .. }) {
                        return Err(e);
                    }
                    warn!(%label, failures, error = %e, "attempt failed, retrying");
                    tokio::time::sleep(self.delay_for(failures)).await;
                }
            }
        }
    }
}
