//! DP-004: Retry policy.
//!
//! Pure decision function over attempt count, elapsed time and the last
//! error. Attempts are numbered from 1; `retry_attempts = N` allows N+1.

use super::error::ErrorInfo;
use super::types::Backoff;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Why a step stopped retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GiveUpReason {
    AttemptsExhausted,
    TimeoutElapsed,
    NotRetryable,
    Cancelled,
}

impl fmt::Display for GiveUpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AttemptsExhausted => write!(f, "attempts exhausted"),
            Self::TimeoutElapsed => write!(f, "timeout elapsed"),
            Self::NotRetryable => write!(f, "not retryable"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    GiveUp(GiveUpReason),
}

/// Seconds as a usable step timeout.
///
/// `None` for non-finite, non-positive, unrepresentable or sub-nanosecond values.
pub fn timeout_duration(secs: f64) -> Option<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| !d.is_zero())
}

/// Total attempts allowed for a step's `retry_attempts` value.
pub fn max_attempts(retry_attempts: i64) -> u32 {
    let retries = u32::try_from(retry_attempts.max(0)).unwrap_or(u32::MAX - 1);
    retries.saturating_add(1)
}

/// Delay before the attempt following `attempt`: `base * factor^(attempt-1)`, capped.
pub fn backoff_delay(attempt: u32, backoff: &Backoff) -> Duration {
    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let raw = backoff.base_secs * backoff.factor.powi(exponent);
    let secs = if raw.is_finite() {
        raw.min(backoff.cap_secs)
    } else {
        backoff.cap_secs
    };
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::ZERO)
}

/// Decide what follows failed attempt number `attempt`.
///
/// The last error itself is never altered; callers keep reporting it.
pub fn next_action(
    attempt: u32,
    max_attempts: u32,
    elapsed: Duration,
    timeout: Duration,
    backoff: &Backoff,
    last_error: &ErrorInfo,
) -> RetryDecision {
    if !last_error.kind.is_retryable() {
        return RetryDecision::GiveUp(GiveUpReason::NotRetryable);
    }
    if attempt >= max_attempts {
        return RetryDecision::GiveUp(GiveUpReason::AttemptsExhausted);
    }
    if elapsed >= timeout {
        return RetryDecision::GiveUp(GiveUpReason::TimeoutElapsed);
    }
    let remaining = timeout - elapsed;
    RetryDecision::Retry(backoff_delay(attempt, backoff).min(remaining))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use proptest::prelude::*;

    fn err(kind: ErrorKind) -> ErrorInfo {
        ErrorInfo::new(kind, "boom")
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_dp004_timeout_duration() {
        assert_eq!(timeout_duration(2.5), Some(Duration::from_millis(2500)));
        assert_eq!(timeout_duration(0.0), None);
        assert_eq!(timeout_duration(-1.0), None);
        assert_eq!(timeout_duration(f64::NAN), None);
        assert_eq!(timeout_duration(1e20), None);
        assert_eq!(timeout_duration(1e-12), None);
    }

    #[test]
    fn test_dp004_max_attempts() {
        assert_eq!(max_attempts(0), 1);
        assert_eq!(max_attempts(2), 3);
        assert_eq!(max_attempts(-5), 1);
    }

    #[test]
    fn test_dp004_backoff_growth_and_cap() {
        let b = Backoff {
            base_secs: 1.0,
            factor: 2.0,
            cap_secs: 5.0,
        };
        assert_eq!(backoff_delay(1, &b), secs(1));
        assert_eq!(backoff_delay(2, &b), secs(2));
        assert_eq!(backoff_delay(3, &b), secs(4));
        assert_eq!(backoff_delay(4, &b), secs(5));
        assert_eq!(backoff_delay(200, &b), secs(5));
    }

    #[test]
    fn test_dp004_zero_retries_single_attempt() {
        let decision = next_action(
            1,
            max_attempts(0),
            Duration::ZERO,
            secs(30),
            &Backoff::default(),
            &err(ErrorKind::ElementNotFound),
        );
        assert_eq!(decision, RetryDecision::GiveUp(GiveUpReason::AttemptsExhausted));
    }

    #[test]
    fn test_dp004_retry_when_budget_left() {
        let decision = next_action(
            1,
            3,
            secs(1),
            secs(30),
            &Backoff::default(),
            &err(ErrorKind::ProcessFailed),
        );
        assert_eq!(decision, RetryDecision::Retry(secs(1)));
    }

    #[test]
    fn test_dp004_timeout_forces_give_up() {
        let decision = next_action(
            1,
            10,
            secs(30),
            secs(30),
            &Backoff::default(),
            &err(ErrorKind::ElementNotFound),
        );
        assert_eq!(decision, RetryDecision::GiveUp(GiveUpReason::TimeoutElapsed));
    }

    #[test]
    fn test_dp004_delay_clamped_to_remaining() {
        let b = Backoff {
            base_secs: 10.0,
            factor: 1.0,
            cap_secs: 10.0,
        };
        let decision = next_action(1, 5, secs(27), secs(30), &b, &err(ErrorKind::Io));
        assert_eq!(decision, RetryDecision::Retry(secs(3)));
    }

    #[test]
    fn test_dp004_not_retryable() {
        for kind in [
            ErrorKind::PermissionDenied,
            ErrorKind::Unsupported,
            ErrorKind::TimeoutExceeded,
        ] {
            let decision =
                next_action(1, 5, Duration::ZERO, secs(30), &Backoff::default(), &err(kind));
            assert_eq!(decision, RetryDecision::GiveUp(GiveUpReason::NotRetryable));
        }
    }

    #[test]
    fn test_dp004_unresolved_variable_is_retried() {
        let decision = next_action(
            1,
            2,
            Duration::ZERO,
            secs(30),
            &Backoff::default(),
            &err(ErrorKind::UnresolvedVariable),
        );
        assert!(matches!(decision, RetryDecision::Retry(_)));
    }

    #[test]
    fn test_dp004_reason_serde() {
        let json = serde_json::to_string(&GiveUpReason::AttemptsExhausted).unwrap();
        assert_eq!(json, "\"attempts_exhausted\"");
    }

    proptest! {
        /// Simulated retry loops never exceed N+1 attempts.
        #[test]
        fn prop_dp004_attempts_bounded(retries in 0i64..20, timeout_s in 1u64..120) {
            let max = max_attempts(retries);
            let timeout = secs(timeout_s);
            let b = Backoff::default();
            let e = err(ErrorKind::ElementNotFound);
            let mut elapsed = Duration::ZERO;
            let mut attempt = 1;
            loop {
                match next_action(attempt, max, elapsed, timeout, &b, &e) {
                    RetryDecision::Retry(delay) => {
                        prop_assert!(elapsed + delay <= timeout);
                        elapsed += delay;
                        attempt += 1;
                    }
                    RetryDecision::GiveUp(_) => break,
                }
            }
            prop_assert!(attempt <= max);
        }

        #[test]
        fn prop_dp004_delay_never_exceeds_cap(attempt in 1u32..1000, base in 0.0f64..10.0, cap_extra in 0.0f64..60.0) {
            let b = Backoff { base_secs: base, factor: 2.0, cap_secs: base + cap_extra };
            prop_assert!(backoff_delay(attempt, &b).as_secs_f64() <= b.cap_secs + 1e-9);
        }
    }
}
