//! Retry policy for waiting on a server socket

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Delay before retry number `attempt` (1-based)
pub type DelayFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// How often and how long a client waits for a missing socket
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: DelayFn,
}

impl RetryPolicy {
    /// Custom policy; `max_attempts` is clamped to at least one check
    pub fn new(max_attempts: u32, delay: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay: Arc::new(delay),
        }
    }

    /// Check once, never wait
    pub fn none() -> Self {
        Self::new(1, |_| Duration::ZERO)
    }

    /// Same delay between every attempt
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::new(max_attempts, move |_| delay)
    }

    /// Doubling delay starting at `base`, capped at `max`
    pub fn exponential(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self::new(max_attempts, move |attempt| {
            let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
            base.saturating_mul(factor).min(max)
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after failed attempt `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        (self.delay)(attempt)
    }
}

impl Default for RetryPolicy {
    /// Five attempts, five seconds apart
    fn default() -> Self {
        Self::fixed(5, Duration::from_secs(5))
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

/// Wait for `total`, reporting the remaining whole seconds while waiting
pub async fn countdown(total: Duration) {
    let tick = Duration::from_secs(1);
    let mut remaining = total;
    while !remaining.is_zero() {
        tracing::debug!("{} seconds left", remaining.as_secs_f32().ceil() as u64);
        let step = remaining.min(tick);
        tokio::time::sleep(step).await;
        remaining -= step;
    }
}
