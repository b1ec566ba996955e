use std::{future::Future, time::Duration};

use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};

use crate::error::AppError;

/// Bounded-attempt backoff policy for calls against flaky collaborators.
/// Injected wherever retries happen so tests can shrink the delays and count
/// attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay sequence between attempts: base, 2*base, 4*base, ... capped at
    /// `max_delay`, `max_attempts - 1` entries long.
    fn delays(&self) -> Vec<Duration> {
        let factor = (self.base_delay.as_millis() as u64 / 2).max(1);
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max_delay)
            .take(self.max_attempts.saturating_sub(1));

        if self.jitter {
            strategy.map(jitter).collect()
        } else {
            strategy.collect()
        }
    }

    /// Run `operation` up to `max_attempts` times, retrying only transient
    /// failures. The last error is returned on exhaustion; non-transient
    /// errors abort immediately.
    pub async fn run<F, Fut, T>(&self, operation: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        RetryIf::spawn(self.delays().into_iter(), operation, AppError::is_transient).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    fn fast_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
        }
    }

    #[test]
    fn delay_sequence_grows_and_is_bounded() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
            jitter: false,
        };
        let delays = policy.delays();
        assert_eq!(delays.len(), 3);
        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(delays[1], Duration::from_millis(200));
        assert_eq!(delays[2], Duration::from_millis(250), "capped at max_delay");
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let result = fast_policy(5)
            .run(move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(AppError::TransientAI("rate limited".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.expect("should recover"), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<(), AppError> = fast_policy(3)
            .run(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(AppError::TransientAI("still down".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(AppError::TransientAI(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_abort_immediately() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<(), AppError> = fast_policy(5)
            .run(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(AppError::PermanentAI("policy rejection".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(AppError::PermanentAI(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
