//! Durable verification state.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use freshet_core::{FreshetResult, StorageError, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::methods::VerificationMethod;
use crate::schedule::VerificationAttempt;

/// Current row for a subject awaiting verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectSnapshot {
    pub subject_id: Uuid,
    pub domain: String,
    /// May change between attempts; always re-read.
    pub token: String,
    pub verified: bool,
    pub deleted: bool,
}

/// Row store behind the state machine.
#[async_trait]
pub trait VerificationStore: Send + Sync {
    async fn load_subject(&self, subject_id: Uuid) -> FreshetResult<Option<SubjectSnapshot>>;

    async fn load_attempt(&self, subject_id: Uuid) -> FreshetResult<Option<VerificationAttempt>>;

    /// Upsert the subject's position in the schedule.
    async fn save_attempt(&self, attempt: &VerificationAttempt) -> FreshetResult<()>;

    /// Record ownership. Correctness-critical.
    async fn mark_verified(
        &self,
        subject_id: Uuid,
        method: VerificationMethod,
        verified_at: Timestamp,
    ) -> FreshetResult<()>;

    /// Unverified, undeleted subjects without a terminal attempt.
    async fn pending_subjects(&self, limit: usize) -> FreshetResult<Vec<Uuid>>;
}

#[derive(Debug, Default)]
struct Tables {
    subjects: HashMap<Uuid, SubjectSnapshot>,
    attempts: HashMap<Uuid, VerificationAttempt>,
    verifications: HashMap<Uuid, (VerificationMethod, Timestamp)>,
}

/// Process-local store for development and tests.
#[derive(Debug, Default)]
pub struct InMemoryVerificationStore {
    tables: RwLock<Tables>,
}

impl InMemoryVerificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_subject(&self, subject: SubjectSnapshot) -> FreshetResult<()> {
        let mut tables = self.tables.write().map_err(|_| StorageError::LockPoisoned)?;
        tables.subjects.insert(subject.subject_id, subject);
        Ok(())
    }

    /// Apply `f` to a stored subject. Returns `false` if it does not exist.
    pub fn update_subject(
        &self,
        subject_id: Uuid,
        f: impl FnOnce(&mut SubjectSnapshot),
    ) -> FreshetResult<bool> {
        let mut tables = self.tables.write().map_err(|_| StorageError::LockPoisoned)?;
        Ok(match tables.subjects.get_mut(&subject_id) {
            Some(subject) => {
                f(subject);
                true
            }
            None => false,
        })
    }

    /// How and when the subject was verified, if it was.
    pub fn verification(&self, subject_id: Uuid) -> Option<(VerificationMethod, Timestamp)> {
        self.tables
            .read()
            .ok()
            .and_then(|tables| tables.verifications.get(&subject_id).copied())
    }
}

#[async_trait]
impl VerificationStore for InMemoryVerificationStore {
    async fn load_subject(&self, subject_id: Uuid) -> FreshetResult<Option<SubjectSnapshot>> {
        let tables = self.tables.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(tables.subjects.get(&subject_id).cloned())
    }

    async fn load_attempt(&self, subject_id: Uuid) -> FreshetResult<Option<VerificationAttempt>> {
        let tables = self.tables.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(tables.attempts.get(&subject_id).cloned())
    }

    async fn save_attempt(&self, attempt: &VerificationAttempt) -> FreshetResult<()> {
        let mut tables = self.tables.write().map_err(|_| StorageError::LockPoisoned)?;
        tables.attempts.insert(attempt.subject_id, attempt.clone());
        Ok(())
    }

    async fn mark_verified(
        &self,
        subject_id: Uuid,
        method: VerificationMethod,
        verified_at: Timestamp,
    ) -> FreshetResult<()> {
        let mut tables = self.tables.write().map_err(|_| StorageError::LockPoisoned)?;
        if let Some(subject) = tables.subjects.get_mut(&subject_id) {
            subject.verified = true;
        }
        tables.verifications.insert(subject_id, (method, verified_at));
        Ok(())
    }

    async fn pending_subjects(&self, limit: usize) -> FreshetResult<Vec<Uuid>> {
        let tables = self.tables.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut pending: Vec<Uuid> = tables
            .subjects
            .values()
            .filter(|s| !s.verified && !s.deleted)
            .filter(|s| {
                tables
                    .attempts
                    .get(&s.subject_id)
                    .map_or(true, |a| !a.state.is_terminal())
            })
            .map(|s| s.subject_id)
            .collect();
        pending.sort_unstable();
        pending.truncate(limit);
        Ok(pending)
    }
}
