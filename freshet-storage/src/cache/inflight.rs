//! In-flight registry for request coalescing.
//!
//! Maps a key to the shared handle of the single production running for it.
//! The first caller installs the handle; later callers clone it and await
//! the same result. Each slot carries a generation so a late removal (from
//! settlement or from the safety timer) never evicts a newer slot.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use freshet_core::FreshetResult;
use futures_util::future::{BoxFuture, FutureExt, Shared};

use super::entry::CacheLookup;
use super::traits::CacheValue;

/// Shared handle to one production.
pub type SharedLookup<T> = Shared<BoxFuture<'static, FreshetResult<CacheLookup<T>>>>;

struct Slot {
    generation: u64,
    handle: Box<dyn Any + Send + Sync>,
}

/// How a caller takes part in a production.
pub enum Join<T: CacheValue> {
    /// This caller installed the handle.
    Leader(SharedLookup<T>),
    /// Another caller's production is already running.
    Follower(SharedLookup<T>),
    /// The key is in flight with a different value type; run alone.
    Uncoalesced(BoxFuture<'static, FreshetResult<CacheLookup<T>>>),
}

/// Process-local map of key to pending production.
#[derive(Clone)]
pub struct InFlightRegistry {
    slots: Arc<DashMap<String, Slot>>,
    next_generation: Arc<AtomicU64>,
    safety_timeout: Duration,
}

impl InFlightRegistry {
    pub fn new(safety_timeout: Duration) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            next_generation: Arc::new(AtomicU64::new(1)),
            safety_timeout,
        }
    }

    /// Reserve a generation for a production that may be installed.
    pub fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Join the production for `key`, installing `work` if none is running.
    ///
    /// `work` must call [`InFlightRegistry::settle`] with `generation` when it
    /// finishes. A leader also arms a safety timer that drops the slot after
    /// the configured timeout regardless of settlement.
    pub fn join<T: CacheValue>(
        &self,
        key: &str,
        generation: u64,
        work: BoxFuture<'static, FreshetResult<CacheLookup<T>>>,
    ) -> Join<T> {
        let handle = match self.slots.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                return match occupied.get().handle.downcast_ref::<SharedLookup<T>>() {
                    Some(shared) => Join::Follower(shared.clone()),
                    None => {
                        tracing::warn!(
                            key = %key,
                            "In-flight slot holds a different value type, running uncoalesced"
                        );
                        Join::Uncoalesced(work)
                    }
                };
            }
            Entry::Vacant(vacant) => {
                let shared = work.shared();
                vacant.insert(Slot {
                    generation,
                    handle: Box::new(shared.clone()),
                });
                shared
            }
        };

        self.arm_safety_timer(key.to_string(), generation);
        Join::Leader(handle)
    }

    /// Remove the slot for `key` if it still belongs to `generation`.
    pub fn settle(&self, key: &str, generation: u64) -> bool {
        self.slots
            .remove_if(key, |_, slot| slot.generation == generation)
            .is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn arm_safety_timer(&self, key: String, generation: u64) {
        let registry = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(registry.safety_timeout).await;
            if registry.settle(&key, generation) {
                tracing::warn!(
                    key = %key,
                    timeout_ms = registry.safety_timeout.as_millis() as u64,
                    "In-flight slot outlived its safety timeout, removed"
                );
            }
        });
    }
}
