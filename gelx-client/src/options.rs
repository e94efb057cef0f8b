//! Retry policy configuration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

/// Why an operation failed in a retryable way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryCondition {
    TransactionConflict,
    NetworkError,
}

type BackoffFn = dyn Fn(u32) -> Duration + Send + Sync;

#[derive(Clone)]
pub struct RetryRule {
    pub(crate) attempts: u32,
    pub(crate) backoff: Arc<BackoffFn>,
}

#[derive(Clone)]
pub struct RetryOptions {
    default: RetryRule,
    overrides: HashMap<RetryCondition, RetryRule>,
}

/// Exponential backoff starting at 100 ms with up to 100 ms of jitter.
pub fn default_backoff(attempt: u32) -> Duration {
    let jitter = rand::rng().random_range(0..100);
    Duration::from_millis(2u64.saturating_pow(attempt) * 100 + jitter)
}

impl Default for RetryRule {
    fn default() -> RetryRule {
        RetryRule {
            attempts: 3,
            backoff: Arc::new(default_backoff),
        }
    }
}

impl RetryRule {
    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }
    pub(crate) fn backoff(&self, attempt: u32) -> Duration {
        (self.backoff)(attempt)
    }
}

impl Default for RetryOptions {
    fn default() -> RetryOptions {
        RetryOptions {
            default: RetryRule::default(),
            overrides: HashMap::new(),
        }
    }
}

impl RetryOptions {
    pub fn new(attempts: u32, backoff: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        RetryOptions {
            default: RetryRule {
                attempts,
                backoff: Arc::new(backoff),
            },
            overrides: HashMap::new(),
        }
    }

    /// Customize the rule for one error condition.
    pub fn with_rule(
        mut self,
        condition: RetryCondition,
        attempts: u32,
        backoff: impl Fn(u32) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.overrides.insert(
            condition,
            RetryRule {
                attempts,
                backoff: Arc::new(backoff),
            },
        );
        self
    }

    pub(crate) fn rule_for(&self, condition: RetryCondition) -> &RetryRule {
        self.overrides.get(&condition).unwrap_or(&self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backoff_grows_with_jitter() {
        for attempt in 0..3 {
            let base = Duration::from_millis(100 * 2u64.pow(attempt));
            let delay = default_backoff(attempt);
            assert!(delay >= base, "attempt {attempt}: {delay:?}");
            assert!(delay < base + Duration::from_millis(100));
        }
    }

    #[test]
    fn per_condition_override() {
        let options = RetryOptions::default().with_rule(
            RetryCondition::NetworkError,
            5,
            |_| Duration::from_millis(1),
        );
        assert_eq!(options.rule_for(RetryCondition::NetworkError).attempts(), 5);
        assert_eq!(
            options.rule_for(RetryCondition::TransactionConflict).attempts(),
            3
        );
        assert_eq!(
            options.rule_for(RetryCondition::NetworkError).backoff(2),
            Duration::from_millis(1)
        );
    }
}
