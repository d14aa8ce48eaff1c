use std::time::Duration;

use tracing::{error, warn};

use crate::error::SyncError;
use crate::sync::client::{ChapterEvent, PushOutcome, RemoteSync};

/// Linear backoff for pushes: the wait before attempt `n` is
/// `base_delay × (n − 1)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves as one.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Wait before the 1-based `attempt`.
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.saturating_sub(1))
    }
}

#[derive(Debug)]
pub enum PushReport {
    Delivered {
        outcome: PushOutcome,
        attempts: u32,
    },
    /// Every attempt failed. The event stays unsynced; nothing retries it.
    Exhausted {
        attempts: u32,
        last_error: SyncError,
    },
}

impl PushReport {
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, PushReport::Delivered { .. })
    }
}

/// Push `event`, retrying failures per `policy`.
///
/// `Disabled` is not retried.
pub async fn push_with_retry(
    remote: &dyn RemoteSync,
    event: &ChapterEvent,
    policy: RetryPolicy,
) -> PushReport {
    let max = policy.attempts();
    let mut attempt = 1;
    loop {
        match remote.push(event).await {
            Ok(outcome) => {
                return PushReport::Delivered {
                    outcome,
                    attempts: attempt,
                };
            }
            Err(err) if attempt >= max || matches!(err, SyncError::Disabled) => {
                error!(
                    user_id = %event.user_id,
                    lesson_id = %event.lesson_id,
                    chapter_id = %event.chapter_id,
                    attempts = attempt,
                    error = %err,
                    "push failed, completion left unsynced"
                );
                return PushReport::Exhausted {
                    attempts: attempt,
                    last_error: err,
                };
            }
            Err(err) => {
                attempt += 1;
                let delay = policy.delay_before(attempt);
                warn!(
                    user_id = %event.user_id,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "push failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_linearly() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_before(3), Duration::from_millis(2000));
    }

    #[test]
    fn zero_attempts_means_one() {
        let policy = RetryPolicy {
            max_attempts: 0,
            base_delay: Duration::ZERO,
        };
        assert_eq!(policy.attempts(), 1);
    }
}
