//! Verification state machine
//!
//! One run per subject. The loop persists its position before every sleep,
//! so a run started again after a restart picks up at the stored attempt
//! and only sleeps until the stored `wake_at`.
//!
//! Each attempt re-reads the subject: a deleted or already-verified subject
//! is cancelled, and the token used is whatever is stored right now.

use std::sync::Arc;

use freshet_core::{FreshetError, VerificationError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::methods::{VerificationMethod, Verifier};
use crate::runtime::{StepError, StepRuntime};
use crate::schedule::{CancelReason, VerificationAttempt, VerificationState, MAX_ATTEMPTS};
use crate::store::{SubjectSnapshot, VerificationStore};

pub struct VerificationMachine<R: StepRuntime> {
    store: Arc<dyn VerificationStore>,
    verifier: Arc<Verifier>,
    runtime: Arc<R>,
}

impl<R: StepRuntime> VerificationMachine<R> {
    pub fn new(store: Arc<dyn VerificationStore>, verifier: Arc<Verifier>, runtime: Arc<R>) -> Self {
        Self {
            store,
            verifier,
            runtime,
        }
    }

    pub fn store(&self) -> &Arc<dyn VerificationStore> {
        &self.store
    }

    /// Drive `subject_id` to a terminal state.
    ///
    /// Failed attempts never raise. The only errors are steps that exhaust
    /// the runtime's retries and a failed `mark_verified`, which is fatal and
    /// leaves the attempt in [`VerificationState::Failed`].
    pub async fn run(&self, subject_id: Uuid) -> Result<VerificationState, StepError> {
        let mut attempt = match self.load_attempt(subject_id).await? {
            Some(stored) if stored.state.is_terminal() => {
                debug!(subject_id = %subject_id, state = ?stored.state, "Already finished");
                return Ok(stored.state);
            }
            Some(stored) => {
                info!(subject_id = %subject_id, attempt = stored.attempt_index, wake_at = %stored.wake_at, "Resuming verification");
                stored
            }
            None => {
                let Some(first) = VerificationAttempt::scheduled(subject_id, 0, self.runtime.now()) else {
                    return Ok(VerificationState::Exhausted);
                };
                self.save_attempt(&first).await?;
                info!(subject_id = %subject_id, wake_at = %first.wake_at, "Verification scheduled");
                first
            }
        };

        loop {
            self.runtime.sleep_until(attempt.wake_at).await;

            let subject = self.load_subject(subject_id).await?;
            let subject = match eligibility(subject) {
                Ok(subject) => subject,
                Err(reason) => {
                    info!(subject_id = %subject_id, reason = %reason, "Verification cancelled");
                    return self
                        .finish(attempt, VerificationState::Cancelled { reason })
                        .await;
                }
            };

            let index = attempt.attempt_index;
            if let Some(method) = self.attempt(index, &subject).await? {
                if let Err(e) = self.mark_verified(subject_id, method).await {
                    return Err(self.abandon(attempt, method, e).await);
                }
                info!(subject_id = %subject_id, method = %method, attempt = index, "Subject verified");
                return self
                    .finish(attempt, VerificationState::Verified { method })
                    .await;
            }

            match VerificationAttempt::scheduled(subject_id, index + 1, self.runtime.now()) {
                Some(next) => {
                    debug!(subject_id = %subject_id, next = next.attempt_index, wake_at = %next.wake_at, "Not verified yet");
                    self.save_attempt(&next).await?;
                    attempt = next;
                }
                None => {
                    warn!(subject_id = %subject_id, attempts = MAX_ATTEMPTS, "Verification schedule exhausted");
                    return self.finish(attempt, VerificationState::Exhausted).await;
                }
            }
        }
    }

    async fn attempt(&self, index: usize, subject: &SubjectSnapshot) -> Result<Option<VerificationMethod>, StepError> {
        let name = format!("attempt-{}", index);
        self.runtime
            .run_step(&name, || async {
                Ok(self.verifier.check(&subject.domain, &subject.token).await)
            })
            .await
    }

    async fn mark_verified(&self, subject_id: Uuid, method: VerificationMethod) -> Result<(), StepError> {
        let verified_at = self.runtime.now();
        self.runtime
            .run_step("mark-verified", || async move {
                self.store
                    .mark_verified(subject_id, method, verified_at)
                    .await
                    .map_err(|e| {
                        StepError::Fatal(FreshetError::from(VerificationError::MarkVerifiedFailed {
                            subject_id,
                            reason: e.to_string(),
                        }))
                    })
            })
            .await
    }

    async fn finish(
        &self,
        attempt: VerificationAttempt,
        state: VerificationState,
    ) -> Result<VerificationState, StepError> {
        self.save_attempt(&attempt.finish(state)).await?;
        Ok(state)
    }

    /// Park the attempt in [`VerificationState::Failed`] so no later scan
    /// resumes it, then hand back the original error.
    async fn abandon(&self, attempt: VerificationAttempt, method: VerificationMethod, error: StepError) -> StepError {
        error!(subject_id = %attempt.subject_id, method = %method, error = %error, "Recording verification failed");
        let failed = attempt.finish(VerificationState::Failed { method });
        if let Err(e) = self.store.save_attempt(&failed).await {
            warn!(subject_id = %failed.subject_id, error = %e, "Failed to park abandoned verification");
        }
        error
    }

    async fn load_attempt(&self, subject_id: Uuid) -> Result<Option<VerificationAttempt>, StepError> {
        self.runtime
            .run_step("load-attempt", || async move {
                self.store.load_attempt(subject_id).await.map_err(StepError::from)
            })
            .await
    }

    async fn load_subject(&self, subject_id: Uuid) -> Result<Option<SubjectSnapshot>, StepError> {
        self.runtime
            .run_step("load-subject", || async move {
                self.store.load_subject(subject_id).await.map_err(StepError::from)
            })
            .await
    }

    async fn save_attempt(&self, attempt: &VerificationAttempt) -> Result<(), StepError> {
        let name = format!("save-attempt-{}", attempt.attempt_index);
        self.runtime
            .run_step(&name, || async move {
                self.store.save_attempt(attempt).await.map_err(StepError::from)
            })
            .await
    }
}

impl<R: StepRuntime> std::fmt::Debug for VerificationMachine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationMachine")
            .field("verifier", &self.verifier)
            .finish()
    }
}

/// A subject that may still be verified, or why not.
fn eligibility(subject: Option<SubjectSnapshot>) -> Result<SubjectSnapshot, CancelReason> {
    match subject {
        None => Err(CancelReason::DomainDeleted),
        Some(s) if s.deleted => Err(CancelReason::DomainDeleted),
        Some(s) if s.verified => Err(CancelReason::AlreadyVerified),
        Some(s) => Ok(s),
    }
}
