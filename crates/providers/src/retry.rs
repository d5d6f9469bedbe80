//! Retry policy and the waiting seam used between attempts.

use async_trait::async_trait;
use std::time::Duration;

/// Default exponential base, in seconds.
pub const DEFAULT_BACKOFF_BASE_SECS: u64 = 2;

/// Default upper bound for a single backoff, in seconds.
pub const DEFAULT_BACKOFF_CAP_SECS: u64 = 10;

/// Exponential backoff between attempts against one service.
///
/// The attempt count itself comes from each service's `retries` setting;
/// the policy only decides how long to wait.
///
/// ```
/// use sidekick_providers::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
/// assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_secs: u64,
    pub cap_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_secs: DEFAULT_BACKOFF_BASE_SECS,
            cap_secs: DEFAULT_BACKOFF_CAP_SECS,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_secs(mut self, base_secs: u64) -> Self {
        self.base_secs = base_secs;
        self
    }

    pub fn with_cap_secs(mut self, cap_secs: u64) -> Self {
        self.cap_secs = cap_secs;
        self
    }

    /// Total attempts for a service configured with `retries`.
    pub fn attempts(&self, retries: u32) -> u32 {
        retries.saturating_add(1)
    }

    /// Wait before attempt `attempt` (0-based): `min(base^attempt, cap)`.
    /// The first attempt never waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let secs = self
            .base_secs
            .checked_pow(attempt)
            .unwrap_or(u64::MAX)
            .min(self.cap_secs);
        Duration::from_secs(secs)
    }
}

/// How the client waits between attempts.
///
/// Hosts that must not stall can substitute their own implementation
/// without changing the policy.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Waits on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Returns immediately. Used in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSleeper;

#[async_trait]
impl Sleeper for NoopSleeper {
    async fn sleep(&self, _duration: Duration) {}
}
