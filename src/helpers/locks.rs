use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, TryLockError};

/// Keyed async lock table: operations on the same `(project, environment)`
/// key are serialized, operations on different keys proceed in parallel.
///
/// Entries are created on first use and never removed; the key space is
/// bounded by the number of managed (project, environment) pairs.
#[derive(Default)]
pub struct KeyedLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().expect("lock table poisoned");
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Queue behind any in-flight operation on `key`.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        self.entry(key).lock_owned().await
    }

    /// Fail fast when another operation holds `key`.
    pub fn try_lock(&self, key: &str) -> Result<OwnedMutexGuard<()>, TryLockError> {
        self.entry(key).try_lock_owned()
    }
}

pub fn pair_key(project: &str, environment: impl std::fmt::Display) -> String {
    format!("{}/{}", project, environment)
}
