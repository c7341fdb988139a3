use crate::budget::RetryBudget;
use crate::error::RetryError;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Re-invokes an async operation under a [`RetryBudget`].
///
/// The deadline is fixed when [`Retry::execute`] starts and is not reset per
/// attempt. When both an attempt bound and a deadline are set, whichever is
/// hit first ends the loop. If the next fuzzed sleep would overshoot the
/// deadline, the sleep is cut short and one final attempt runs at the
/// deadline before `TimeoutExceeded` is returned.
pub struct Retry<E> {
    budget: RetryBudget,
    retryable: RetryPredicate<E>,
    description: String,
}

impl<E> Clone for Retry<E> {
    fn clone(&self) -> Self {
        Self {
            budget: self.budget.clone(),
            retryable: Arc::clone(&self.retryable),
            description: self.description.clone(),
        }
    }
}

impl<E> Retry<E> {
    /// Retries every error.
    pub fn new(budget: RetryBudget) -> Self {
        Self {
            budget,
            retryable: Arc::new(|_: &E| true),
            description: "operation".to_string(),
        }
    }

    /// Retries only errors for which `predicate` returns true.
    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }

    /// Name used in log lines.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn budget(&self) -> &RetryBudget {
        &self.budget
    }
}

impl<E: Retryable> Retry<E> {
    /// Retries only errors that report themselves as retryable.
    pub fn classified(budget: RetryBudget) -> Self {
        Self::new(budget).retry_if(|e: &E| e.is_retryable())
    }
}

impl<E: Display> Retry<E> {
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.budget
            .validate()
            .map_err(|reason| RetryError::InvalidBudget { reason })?;

        let started = Instant::now();
        let deadline = self
            .budget
            .timeout
            .and_then(|timeout| started.checked_add(timeout));
        let mut attempts: u32 = 0;

        loop {
            attempts = attempts.saturating_add(1);
            debug!(operation = %self.description, attempt = attempts, "Attempting");

            let error = match operation().await {
                Ok(value) => {
                    if attempts > 1 {
                        info!(
                            operation = %self.description,
                            attempts = attempts,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !(self.retryable)(&error) {
                debug!(
                    operation = %self.description,
                    attempt = attempts,
                    error = %error,
                    "Error is not retryable"
                );
                return Err(RetryError::Aborted(error));
            }

            let now = Instant::now();
            if let (Some(deadline), Some(timeout)) = (deadline, self.budget.timeout) {
                if now >= deadline {
                    warn!(
                        operation = %self.description,
                        attempts = attempts,
                        timeout_ms = timeout.as_millis() as u64,
                        error = %error,
                        "Retry deadline exceeded"
                    );
                    return Err(RetryError::TimeoutExceeded {
                        timeout,
                        attempts,
                        source: error,
                    });
                }
            }

            if let Some(max_retries) = self.budget.max_retries {
                if attempts > max_retries {
                    warn!(
                        operation = %self.description,
                        attempts = attempts,
                        error = %error,
                        "Retries exceeded"
                    );
                    return Err(RetryError::RetriesExceeded {
                        attempts,
                        source: error,
                    });
                }
            }

            let mut delay = self.budget.fuzzed_interval(&mut rand::thread_rng());
            if let Some(deadline) = deadline {
                delay = delay.min(deadline.saturating_duration_since(now));
            }

            if self.budget.log_errors {
                warn!(
                    operation = %self.description,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying after error"
                );
            }

            sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Debug)]
    struct TestError {
        message: String,
        retryable: bool,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.message)
        }
    }

    impl std::error::Error for TestError {}

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            self.retryable
        }
    }

    fn flaky(message: &str) -> TestError {
        TestError {
            message: message.to_string(),
            retryable: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_operation_no_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let retry = Retry::<TestError>::new(RetryBudget::default());

        let result = retry
            .execute(|| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, TestError>(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eventual_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let retry = Retry::new(
            RetryBudget::new()
                .with_poll_interval(Duration::from_secs(1))
                .with_fuzz(0.0),
        );

        let result = retry
            .execute(|| {
                let calls = Arc::clone(&calls);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(flaky("temporary failure"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_classified_aborts_on_permanent_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let retry = Retry::classified(RetryBudget::new().with_max_retries(5));

        let result: Result<(), _> = retry
            .execute(|| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(TestError {
                        message: "permanent failure".into(),
                        retryable: false,
                    })
                }
            })
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, RetryError::Aborted(_)));
        assert_eq!(err.to_string(), "permanent failure");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_budget_never_runs_operation() {
        let calls = Arc::new(AtomicU32::new(0));
        let retry = Retry::<TestError>::new(RetryBudget::new().with_fuzz(2.0));

        let result: Result<(), _> = retry
            .execute(|| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(RetryError::InvalidBudget { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_map_err_preserves_variant() {
        let err: RetryError<&str> = RetryError::RetriesExceeded {
            attempts: 4,
            source: "boom",
        };
        let mapped = err.map_err(|s| s.len());
        assert_eq!(mapped.attempts(), Some(4));
        assert_eq!(mapped.into_inner(), Some(4));
    }
}
