//! Injectable retry policy for tool execution.

use std::time::Duration;

/// Delay schedule between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Retry immediately.
    None,
    /// Constant delay between attempts.
    Fixed(Duration),
    /// `base * 2^attempt`, capped at `cap`.
    Exponential {
        /// Delay before the first retry.
        base: Duration,
        /// Upper bound on any single delay.
        cap: Duration,
    },
}

impl BackoffStrategy {
    /// Delay to wait before retry number `attempt` (0-based: the delay
    /// before the first retry is `delay_for(0)`).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Fixed(delay) => *delay,
            Self::Exponential { base, cap } => {
                let multiplier = 2u32.saturating_pow(attempt);
                (*base).saturating_mul(multiplier).min(*cap)
            }
        }
    }
}

/// When and how often a failed dispatch is re-attempted.
///
/// The policy only ever applies to transient failures (`Timeout`,
/// `ConnectionClosed`). Tool-reported failures are retried only when
/// `retry_failed_executions` opts in, since a tool failure is usually
/// deterministic and a retry just repeats it. Caller errors (unknown tool,
/// invalid arguments, server not running) are never retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total dispatch attempts, including the first. Must be at least 1.
    pub max_attempts: u32,
    /// Delay schedule between attempts.
    pub backoff: BackoffStrategy,
    /// Whether tool-reported execution failures are retried too.
    pub retry_failed_executions: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: BackoffStrategy::Fixed(Duration::from_millis(250)),
            retry_failed_executions: false,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: BackoffStrategy::None,
            retry_failed_executions: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_doubles_and_caps() {
        let backoff = BackoffStrategy::Exponential {
            base: Duration::from_millis(100),
            cap: Duration::from_millis(500),
        };
        assert_eq!(backoff.delay_for(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(400));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(500));
        assert_eq!(backoff.delay_for(30), Duration::from_millis(500));
    }

    #[test]
    fn test_fixed_backoff_is_constant() {
        let backoff = BackoffStrategy::Fixed(Duration::from_millis(250));
        assert_eq!(backoff.delay_for(0), backoff.delay_for(9));
    }

    #[test]
    fn test_none_policy_single_attempt() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.retry_failed_executions);
    }
}
