//! Bounded cool-down retry for transient transport errors.

use std::future::Future;
use std::time::Duration;

use courier_common::types::Channel;

use crate::error::DeliveryError;

/// How many times an adapter tries one message, and how long it waits
/// between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub cool_down: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, cool_down: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            cool_down,
        }
    }

    /// A single attempt, no retry.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Run `attempt` until it succeeds, fails permanently, or the attempt
    /// budget is spent. Cool-downs happen inline on the caller's task.
    pub async fn run<T, F, Fut>(&self, channel: Channel, mut attempt: F) -> Result<T, DeliveryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DeliveryError>>,
    {
        let mut tries = 1;
        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && tries < self.max_attempts => {
                    tracing::warn!(
                        channel = %channel,
                        attempt = tries,
                        max_attempts = self.max_attempts,
                        cool_down_secs = self.cool_down.as_secs(),
                        error = %err,
                        "Transient send failure, cooling down before retry"
                    );
                    tokio::time::sleep(self.cool_down).await;
                    tries += 1;
                }
                Err(err) => {
                    if err.is_transient() {
                        tracing::warn!(
                            channel = %channel,
                            attempts = tries,
                            error = %err,
                            "Retry budget exhausted"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::once()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_secs(20));
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let started = tokio::time::Instant::now();
        let result: Result<(), _> = policy
            .run(Channel::Email, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(DeliveryError::Transient("connect timeout".to_string()))
            })
            .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two cool-downs between three attempts
        assert_eq!(started.elapsed(), Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_not_retried() {
        let policy = RetryPolicy::new(3, Duration::from_secs(20));
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), _> = policy
            .run(Channel::Email, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(DeliveryError::Permanent("invalid recipient".to_string()))
            })
            .await;

        assert!(!result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_on_second_attempt() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result = policy
            .run(Channel::Sms, move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(DeliveryError::Transient("reset".to_string()))
                } else {
                    Ok("SM123".to_string())
                }
            })
            .await;

        assert_eq!(result.unwrap(), "SM123");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}
