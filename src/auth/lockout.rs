//! Per-account lockout state machine.
//!
//! An account is either open or locked. The gate is evaluated before any
//! credential check so that a locked account never reaches password hashing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::LockoutConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutState {
    pub failed_attempts: i32,
    pub lockout_end: Option<DateTime<Utc>>,
}

impl LockoutState {
    /// Decide whether a login attempt at `now` may proceed to credential checks.
    ///
    /// Returns the state the attempt starts from, or the lockout expiry when the
    /// account is still locked. An expired lockout starts over from a clean state.
    pub fn admit(self, now: DateTime<Utc>) -> Result<LockoutState, DateTime<Utc>> {
        match self.lockout_end {
            Some(until) if now < until => Err(until),
            Some(_) => Ok(LockoutState::default()),
            None => Ok(self),
        }
    }

    /// Fold one failed credential check into the stored state.
    ///
    /// Stores apply this to the row as it is at write time, so concurrent
    /// failures each count. An expired lockout restarts the count; an active one
    /// keeps its expiry.
    pub fn record_failure(self, policy: &LockoutConfig, now: DateTime<Utc>) -> LockoutState {
        let start = match self.admit(now) {
            Ok(start) => start,
            Err(until) => {
                return LockoutState {
                    failed_attempts: self.failed_attempts.saturating_add(1),
                    lockout_end: Some(until),
                }
            }
        };

        let failed_attempts = start.failed_attempts.saturating_add(1);
        let lockout_end = if failed_attempts >= policy.threshold {
            Some(now + policy.duration)
        } else {
            None
        };
        LockoutState {
            failed_attempts,
            lockout_end,
        }
    }

    /// True when this failure is the one that crossed the threshold.
    pub fn just_locked(&self, policy: &LockoutConfig) -> bool {
        self.lockout_end.is_some() && self.failed_attempts == policy.threshold
    }

    pub fn record_success(self) -> LockoutState {
        LockoutState::default()
    }

    pub fn is_clean(&self) -> bool {
        self.failed_attempts == 0 && self.lockout_end.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn policy() -> LockoutConfig {
        LockoutConfig {
            threshold: 5,
            duration: Duration::minutes(15),
        }
    }

    fn fail_times(n: usize, now: DateTime<Utc>) -> LockoutState {
        let mut state = LockoutState::default();
        for _ in 0..n {
            state = state.admit(now).unwrap().record_failure(&policy(), now);
        }
        state
    }

    #[test]
    fn test_failures_below_threshold_only_count() {
        let now = Utc::now();
        let state = fail_times(4, now);
        assert_eq!(state.failed_attempts, 4);
        assert!(state.lockout_end.is_none());
        assert!(state.admit(now).is_ok());
    }

    #[test]
    fn test_threshold_failure_sets_lockout() {
        let now = Utc::now();
        let state = fail_times(5, now);
        assert_eq!(state.failed_attempts, 5);
        assert_eq!(state.lockout_end, Some(now + Duration::minutes(15)));
    }

    #[test]
    fn test_locked_account_is_rejected_until_expiry() {
        let now = Utc::now();
        let state = fail_times(5, now);

        let just_before = now + Duration::minutes(15) - Duration::seconds(1);
        assert_eq!(state.admit(just_before), Err(now + Duration::minutes(15)));
    }

    #[test]
    fn test_expired_lockout_admits_from_clean_state() {
        let now = Utc::now();
        let state = fail_times(5, now);

        let at_expiry = now + Duration::minutes(15);
        let admitted = state.admit(at_expiry).unwrap();
        assert!(admitted.is_clean());

        // One more failure after expiry does not relock immediately.
        let after = admitted.record_failure(&policy(), at_expiry);
        assert_eq!(after.failed_attempts, 1);
        assert!(after.lockout_end.is_none());
    }

    #[test]
    fn test_success_resets_counter() {
        for failures in 1..5 {
            let now = Utc::now();
            let state = fail_times(failures, now);
            let reset = state.admit(now).unwrap().record_success();
            assert!(reset.is_clean(), "failures={failures}");
        }
    }

    #[test]
    fn test_failure_on_locked_state_keeps_expiry() {
        let now = Utc::now();
        let locked = fail_times(5, now);
        let later = now + Duration::minutes(1);

        let state = locked.record_failure(&policy(), later);

        assert_eq!(state.failed_attempts, 6);
        assert_eq!(state.lockout_end, locked.lockout_end);
        assert!(!state.just_locked(&policy()));
        assert!(locked.just_locked(&policy()));
    }

    #[test]
    fn test_failure_on_stale_read_still_counts() {
        // Applied to the stored row, not to the state the attempt was admitted from.
        let now = Utc::now();
        let stored = fail_times(4, now);
        let state = stored.record_failure(&policy(), now);
        assert!(state.just_locked(&policy()));
    }

    #[test]
    fn test_failure_after_expiry_restarts_count() {
        let now = Utc::now();
        let expired = fail_times(5, now);
        let state = expired.record_failure(&policy(), now + Duration::minutes(20));
        assert_eq!(state.failed_attempts, 1);
        assert!(state.lockout_end.is_none());
    }

    #[test]
    fn test_threshold_of_one_locks_on_first_failure() {
        let now = Utc::now();
        let strict = LockoutConfig {
            threshold: 1,
            duration: Duration::minutes(1),
        };
        let state = LockoutState::default().record_failure(&strict, now);
        assert!(state.admit(now).is_err());
    }
}
