//! Per-step retry policies.

use crate::error::IngestError;
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Default per-attempt timeout for a step.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(60);

/// Exponential backoff with an optional attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// `None` retries until the step succeeds or fails non-retryably.
    pub max_attempts: Option<u32>,
    /// Budget for a single attempt.
    pub step_timeout: Duration,
}

impl RetryPolicy {
    /// Robots steps: 1 s doubling to 60 s, no attempt limit.
    pub fn robots() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            max_attempts: None,
            step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }

    /// Sitemap steps: 1 s doubling to 120 s, at most 20 attempts.
    pub fn sitemap() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(120),
            max_attempts: Some(20),
            step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }

    pub fn with_intervals(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_interval = initial;
        self.max_interval = max;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    ///
    /// Derived from the attempt number alone so a resumed flow continues the
    /// same schedule.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.initial_interval
            .saturating_mul(1u32 << shift)
            .min(self.max_interval)
    }

    /// Whether attempt number `attempt` used up the budget.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }
}

/// Sleep for `delay` unless `token` fires first.
pub async fn sleep_with_cancellation(
    delay: Duration,
    token: &CancellationToken,
) -> Result<(), IngestError> {
    if delay.is_zero() {
        yield_now().await;
        return Ok(());
    }

    tokio::select! {
        _ = token.cancelled() => Err(IngestError::Cancelled),
        _ = sleep(delay) => Ok(()),
    }
}
