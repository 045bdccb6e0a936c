//! Retry policy and executor

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::backoff::{BackoffCalculator, BackoffStrategy};

/// How many times to try and how long to wait in between
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,

    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    pub backoff_strategy: BackoffStrategy,

    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_strategy: BackoffStrategy::Exponential { base: 2.0 },
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy for writes that record a terminal outcome
    pub fn persistent() -> Self {
        Self {
            max_attempts: 8,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            ..Self::default()
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_strategy: BackoffStrategy::Fixed,
            jitter: false,
        }
    }

    fn calculator(&self) -> BackoffCalculator {
        BackoffCalculator::new(
            self.backoff_strategy.clone(),
            self.initial_delay,
            self.max_delay,
            self.jitter,
        )
    }

    /// Pause before the attempt after `attempt` (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.calculator().calculate_delay(attempt)
    }
}

/// Errors that know whether another attempt can succeed
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Runs a fallible async operation under a [`RetryPolicy`]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn with_default_policy() -> Self {
        Self::new(RetryPolicy::default())
    }

    pub async fn execute<F, Fut, T, E>(&self, mut f: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        self.execute_with_context(|_| f()).await
    }

    /// Like [`execute`](Self::execute), passing the 1-indexed attempt number
    pub async fn execute_with_context<F, Fut, T, E>(&self, mut f: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let calculator = self.policy.calculator();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match f(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!("Succeeded on attempt {}", attempt);
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                debug!("Giving up on non-retryable error: {}", error);
                return Err(RetryError::NonRetryable(error));
            }
            if attempt == max_attempts {
                warn!("Giving up after {} attempts: {}", attempt, error);
                return Err(RetryError::MaxAttemptsExceeded {
                    attempts: attempt,
                    last_error: error,
                });
            }

            let pause = calculator.calculate_delay(attempt);
            warn!("Attempt {}/{} failed ({}), next in {:?}", attempt, max_attempts, error, pause);
            sleep(pause).await;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last_error}")]
    MaxAttemptsExceeded { attempts: u32, last_error: E },

    #[error("{0}")]
    NonRetryable(E),
}

impl<E> RetryError<E> {
    /// The error from the last attempt
    pub fn into_inner(self) -> E {
        match self {
            RetryError::MaxAttemptsExceeded { last_error, .. } | RetryError::NonRetryable(last_error) => {
                last_error
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum StoreHiccup {
        Down,
        Rejected,
    }

    impl std::fmt::Display for StoreHiccup {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                StoreHiccup::Down => f.write_str("store down"),
                StoreHiccup::Rejected => f.write_str("write rejected"),
            }
        }
    }

    impl Retryable for StoreHiccup {
        fn is_retryable(&self) -> bool {
            matches!(self, StoreHiccup::Down)
        }
    }

    fn quick(max_attempts: u32) -> RetryExecutor {
        RetryExecutor::new(RetryPolicy::fixed(max_attempts, Duration::from_millis(2)))
    }

    #[tokio::test]
    async fn test_recovers_once_the_store_is_back() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let saved = quick(4)
            .execute(move || async move {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => Err(StoreHiccup::Down),
                    _ => Ok("saved"),
                }
            })
            .await
            .unwrap();

        assert_eq!(saved, "saved");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stops_at_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = quick(3)
            .execute(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(StoreHiccup::Down)
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RetryError::MaxAttemptsExceeded { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err.into_inner(), StoreHiccup::Down));
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = RetryExecutor::with_default_policy()
            .execute(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(StoreHiccup::Rejected)
            })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "write rejected");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_numbers_start_at_one() {
        let seen = quick(3)
            .execute_with_context(|attempt| async move {
                if attempt == 3 {
                    Ok(attempt)
                } else {
                    Err(StoreHiccup::Down)
                }
            })
            .await
            .unwrap();
        assert_eq!(seen, 3);
    }

    #[test]
    fn test_persistent_policy_backs_off() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::persistent()
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(30), Duration::from_secs(10));
    }
}
