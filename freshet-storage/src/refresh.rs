//! Background revalidation tasks and the queue they are handed to.
//!
//! Delivery is deduplicated on an idempotency key; nothing stronger than
//! that is promised.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use freshet_core::{CacheCategory, FreshetResult, StorageError, Timestamp};
use serde::{Deserialize, Serialize};

/// A scheduled refresh of one subject and category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevalidationTask {
    pub subject_key: String,
    pub category: CacheCategory,
    /// Earliest expiry across everything written for the subject.
    pub due_at: Timestamp,
    pub last_accessed_at: Option<Timestamp>,
}

impl RevalidationTask {
    /// `<category>:<subject>:<due_at epoch seconds>`
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.category,
            self.subject_key,
            self.due_at.timestamp()
        )
    }
}

/// Collaborator that delivers revalidation tasks to a worker.
#[async_trait]
pub trait RefreshQueue: Send + Sync {
    /// Enqueue `task`. Returns `false` if a task with the same idempotency
    /// key was already accepted.
    async fn enqueue(&self, task: RevalidationTask) -> FreshetResult<bool>;
}

/// In-process queue ordered by due time.
#[derive(Debug, Default)]
pub struct InMemoryRefreshQueue {
    tasks: RwLock<BTreeMap<(Timestamp, String), RevalidationTask>>,
}

impl InMemoryRefreshQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().map(|tasks| tasks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All queued tasks, earliest first.
    pub fn pending(&self) -> Vec<RevalidationTask> {
        self.tasks
            .read()
            .map(|tasks| tasks.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove and return every task due at or before `now`.
    pub fn take_due(&self, now: Timestamp) -> FreshetResult<Vec<RevalidationTask>> {
        let mut tasks = self.tasks.write().map_err(|_| StorageError::LockPoisoned)?;
        let due_keys: Vec<(Timestamp, String)> = tasks
            .keys()
            .take_while(|(due_at, _)| *due_at <= now)
            .cloned()
            .collect();
        Ok(due_keys
            .into_iter()
            .filter_map(|key| tasks.remove(&key))
            .collect())
    }
}

#[async_trait]
impl RefreshQueue for InMemoryRefreshQueue {
    async fn enqueue(&self, task: RevalidationTask) -> FreshetResult<bool> {
        let mut tasks = self.tasks.write().map_err(|_| StorageError::LockPoisoned)?;
        let key = (task.due_at, task.idempotency_key());
        if tasks.contains_key(&key) {
            return Ok(false);
        }
        tasks.insert(key, task);
        Ok(true)
    }
}
