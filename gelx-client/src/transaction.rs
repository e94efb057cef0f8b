//! The retryable-transaction policy.
//!
//! The loop itself lives in the two drivers; this module decides, for a
//! failed attempt, whether to try again and how long to wait first.

use std::time::Duration;

use gelx_errors::{ClientError, Error, TransactionConflictError, SHOULD_RETRY};

use crate::options::{RetryCondition, RetryOptions};

pub(crate) fn retry_condition(error: &Error) -> Option<RetryCondition> {
    if error.is::<TransactionConflictError>() {
        return Some(RetryCondition::TransactionConflict);
    }
    if error.is::<ClientError>() && error.has_tag(SHOULD_RETRY) {
        return Some(RetryCondition::NetworkError);
    }
    None
}

/// Decide the backoff before the next attempt, or `None` to give up.
///
/// `attempt` is zero-based: with the default three attempts, attempts 0
/// and 1 may be retried and attempt 2 is final.
pub(crate) fn retry_plan(
    options: &RetryOptions,
    error: &Error,
    attempt: u32,
) -> Option<Duration> {
    let condition = retry_condition(error)?;
    let rule = options.rule_for(condition);
    if attempt + 1 >= rule.attempts() {
        return None;
    }
    Some(rule.backoff(attempt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gelx_errors::{
        ClientConnectionFailedTemporarilyError, ErrorKind, InterfaceError,
        TransactionSerializationError,
    };

    fn options() -> RetryOptions {
        RetryOptions::new(3, |attempt| Duration::from_millis(100 * (1 << attempt)))
    }

    #[test]
    fn retries_are_bounded_by_attempts() {
        let err = TransactionSerializationError::with_message("serialization failure");
        assert_eq!(retry_plan(&options(), &err, 0), Some(Duration::from_millis(100)));
        assert_eq!(retry_plan(&options(), &err, 1), Some(Duration::from_millis(200)));
        assert_eq!(retry_plan(&options(), &err, 2), None);
    }

    #[test]
    fn total_backoff_covers_all_but_last_attempt() {
        let err = TransactionSerializationError::with_message("serialization failure");
        let mut total = Duration::ZERO;
        let mut attempt = 0;
        while let Some(delay) = retry_plan(&options(), &err, attempt) {
            total += delay;
            attempt += 1;
        }
        assert_eq!(attempt, 2);
        assert_eq!(total, Duration::from_millis(300));
    }

    #[test]
    fn network_errors_use_their_own_rule() {
        let options = options().with_rule(RetryCondition::NetworkError, 5, |_| {
            Duration::from_millis(1)
        });
        let err = ClientConnectionFailedTemporarilyError::with_message("connection reset");
        assert_eq!(retry_plan(&options, &err, 3), Some(Duration::from_millis(1)));
        assert_eq!(retry_plan(&options, &err, 4), None);
    }

    #[test]
    fn non_retryable_errors_stop_immediately() {
        let err = InterfaceError::with_message("bad call");
        assert_eq!(retry_plan(&options(), &err, 0), None);
    }
}
