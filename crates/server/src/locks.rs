//! Keyed in-process locks.
//!
//! A map entry lives only while someone holds or waits for its key.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// Mutual exclusion per string key.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Arc<LockMap>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn guard(&self, key: &str, guard: OwnedMutexGuard<()>) -> KeyedGuard {
        KeyedGuard {
            locks: self.locks.clone(),
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    /// Take the key if nobody holds it.
    pub fn try_lock(&self, key: &str) -> Option<KeyedGuard> {
        let guard = self.slot(key).try_lock_owned().ok()?;
        Some(self.guard(key, guard))
    }

    /// Wait for the key.
    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let guard = self.slot(key).lock_owned().await;
        self.guard(key, guard)
    }

    /// Take every key in a stable order, so holders of overlapping sets
    /// cannot deadlock.
    pub async fn lock_all<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Vec<KeyedGuard> {
        let mut keys: Vec<&str> = keys.into_iter().collect();
        keys.sort_unstable();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock(key).await);
        }
        guards
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.locks
            .get(key)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Number of keys currently held or waited for.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Hold on one key. The map entry is dropped with the last holder.
pub struct KeyedGuard {
    locks: Arc<LockMap>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for KeyedGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedGuard").field("key", &self.key).finish()
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
