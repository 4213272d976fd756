//! Durable step execution
//!
//! The state machine only needs three things from its host: run a step with
//! retries, sleep until a wall-clock deadline, and tell retryable failures
//! from fatal ones. [`TokioStepRuntime`] provides them in-process.

use std::future::Future;

use async_trait::async_trait;
use chrono::Utc;
use freshet_core::{FailureClass, FreshetError, RetryConfig, Timestamp};
use thiserror::Error;
use tracing::{debug, warn};

/// Step failure as seen by the runtime.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StepError {
    /// Transient; the runtime may run the step again.
    #[error("Retryable step failure: {0}")]
    Retryable(FreshetError),

    /// Abort the enclosing run. Never retried.
    #[error("Fatal step failure: {0}")]
    Fatal(FreshetError),
}

impl StepError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StepError::Fatal(_))
    }

    pub fn into_inner(self) -> FreshetError {
        match self {
            StepError::Retryable(e) | StepError::Fatal(e) => e,
        }
    }
}

impl From<FreshetError> for StepError {
    fn from(err: FreshetError) -> Self {
        match err.failure_class() {
            FailureClass::Fatal => StepError::Fatal(err),
            FailureClass::Retryable | FailureClass::Soft => StepError::Retryable(err),
        }
    }
}

/// Host capabilities the verification loop runs on.
#[async_trait]
pub trait StepRuntime: Send + Sync {
    fn now(&self) -> Timestamp;

    /// Suspend until `wake_at`. Returns immediately if it has passed.
    async fn sleep_until(&self, wake_at: Timestamp);

    /// Run `step`, retrying [`StepError::Retryable`] failures per the
    /// runtime's policy. `name` identifies the step for logging and for
    /// runtimes that memoize completed steps.
    async fn run_step<T, F, Fut>(&self, name: &str, step: F) -> Result<T, StepError>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, StepError>> + Send;
}

/// In-process runtime on tokio timers and the system clock.
#[derive(Debug, Clone, Default)]
pub struct TokioStepRuntime {
    retry: RetryConfig,
}

impl TokioStepRuntime {
    pub fn new(retry: RetryConfig) -> Self {
        Self { retry }
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }
}

#[async_trait]
impl StepRuntime for TokioStepRuntime {
    fn now(&self) -> Timestamp {
        Utc::now()
    }

    async fn sleep_until(&self, wake_at: Timestamp) {
        if let Ok(remaining) = (wake_at - Utc::now()).to_std() {
            tokio::time::sleep(remaining).await;
        }
    }

    async fn run_step<T, F, Fut>(&self, name: &str, step: F) -> Result<T, StepError>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, StepError>> + Send,
    {
        let mut attempt = 0;
        loop {
            match step().await {
                Ok(value) => return Ok(value),
                Err(StepError::Retryable(e)) if attempt < self.retry.max_retries => {
                    let backoff = self.retry.backoff_for(attempt);
                    warn!(step = %name, attempt, backoff_ms = backoff.as_millis() as u64, error = %e, "Step failed, retrying");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!(step = %name, attempt, fatal = e.is_fatal(), "Step gave up");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use freshet_core::{StorageError, VerificationError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    fn runtime() -> TokioStepRuntime {
        TokioStepRuntime::new(RetryConfig {
            max_retries: 2,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
            backoff_multiplier: 2.0,
        })
    }

    #[test]
    fn test_step_error_classification() {
        let soft = StepError::from(FreshetError::from(StorageError::LockPoisoned));
        assert!(!soft.is_fatal());

        let fatal = StepError::from(FreshetError::from(VerificationError::MarkVerifiedFailed {
            subject_id: Uuid::nil(),
            reason: "down".to_string(),
        }));
        assert!(fatal.is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_step_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = runtime()
            .run_step("flaky", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StepError::Retryable(FreshetError::producer("transient")))
                } else {
                    Ok(7u32)
                }
            })
            .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_step_gives_up() {
        let calls = AtomicU32::new(0);
        let result: Result<(), StepError> = runtime()
            .run_step("down", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StepError::Retryable(FreshetError::producer("down")))
            })
            .await;
        assert!(matches!(result, Err(StepError::Retryable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_step_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), StepError> = runtime()
            .run_step("fatal", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StepError::Fatal(FreshetError::producer("broken")))
            })
            .await;
        assert!(matches!(result, Err(StepError::Fatal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sleep_until_past_returns() {
        let past = Utc::now() - chrono::Duration::seconds(5);
        tokio::time::timeout(Duration::from_secs(1), runtime().sleep_until(past))
            .await
            .expect("no sleep for a past deadline");
    }
}
