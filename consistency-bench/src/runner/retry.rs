//! Retry state machine for a single query
//!
//! A query moves `Pending -> Retrying { attempt, delay } -> ... -> Succeeded | Failed`.
//! The executor drives it by reporting each attempt's outcome; the policy is
//! plain data so the ceiling and delays come straight from configuration.

use std::time::Duration;

use crate::providers::FailureClass;

/// Retry ceiling and backoff bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(60_000),
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempt + 1`, given `attempt` attempts have failed
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

/// Where a query stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryState {
    Pending,
    /// `attempt` attempts have failed; wait `delay` before the next
    Retrying { attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    Failed { attempts: u32, class: FailureClass },
}

/// Outcome of one attempt as seen by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failure {
        class: FailureClass,
        retry_after: Option<Duration>,
    },
}

impl QueryState {
    /// Attempts made so far
    pub fn attempts(&self) -> u32 {
        match self {
            QueryState::Pending => 0,
            QueryState::Retrying { attempt, .. } => *attempt,
            QueryState::Succeeded { attempts } | QueryState::Failed { attempts, .. } => *attempts,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueryState::Succeeded { .. } | QueryState::Failed { .. })
    }

    /// Advance after an attempt; terminal states stay put
    pub fn next(self, outcome: AttemptOutcome, policy: &RetryPolicy) -> QueryState {
        if self.is_terminal() {
            return self;
        }
        let attempt = self.attempts() + 1;

        match outcome {
            AttemptOutcome::Success => QueryState::Succeeded { attempts: attempt },
            AttemptOutcome::Failure {
                class: FailureClass::Transient,
                retry_after,
            } if attempt < policy.max_attempts => {
                let mut delay = policy.backoff(attempt);
                if let Some(wait) = retry_after {
                    delay = delay.max(wait);
                }
                QueryState::Retrying { attempt, delay }
            }
            AttemptOutcome::Failure { class, .. } => QueryState::Failed {
                attempts: attempt,
                class,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        }
    }

    fn transient() -> AttemptOutcome {
        AttemptOutcome::Failure {
            class: FailureClass::Transient,
            retry_after: None,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy(5);
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(350));
        assert_eq!(p.backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn test_transient_then_success() {
        let p = policy(5);
        let state = QueryState::Pending.next(transient(), &p);
        assert_eq!(
            state,
            QueryState::Retrying {
                attempt: 1,
                delay: Duration::from_millis(100)
            }
        );
        let state = state.next(AttemptOutcome::Success, &p);
        assert_eq!(state, QueryState::Succeeded { attempts: 2 });
    }

    #[test]
    fn test_ceiling_reached() {
        let p = policy(3);
        let mut state = QueryState::Pending;
        for _ in 0..3 {
            state = state.next(transient(), &p);
        }
        assert_eq!(
            state,
            QueryState::Failed {
                attempts: 3,
                class: FailureClass::Transient
            }
        );
    }

    #[test]
    fn test_rejected_fails_immediately() {
        let state = QueryState::Pending.next(
            AttemptOutcome::Failure {
                class: FailureClass::Rejected,
                retry_after: None,
            },
            &policy(5),
        );
        assert_eq!(
            state,
            QueryState::Failed {
                attempts: 1,
                class: FailureClass::Rejected
            }
        );
    }

    #[test]
    fn test_retry_after_raises_delay() {
        let state = QueryState::Pending.next(
            AttemptOutcome::Failure {
                class: FailureClass::Transient,
                retry_after: Some(Duration::from_secs(2)),
            },
            &policy(5),
        );
        assert_eq!(
            state,
            QueryState::Retrying {
                attempt: 1,
                delay: Duration::from_secs(2)
            }
        );
    }
}
