use crate::types::TaskKey;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Keys whose completion is currently executing or persisting.
#[derive(Debug, Clone, Default)]
pub struct InFlightKeys {
    inner: Arc<Mutex<HashSet<TaskKey>>>,
}

impl InFlightKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `key`, or returns `None` when another attempt already holds it.
    pub fn try_claim(&self, key: &TaskKey) -> Option<InFlightGuard> {
        if !self.keys().insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            keys: self.clone(),
            key: key.clone(),
        })
    }

    pub fn contains(&self, key: &TaskKey) -> bool {
        self.keys().contains(key)
    }

    fn keys(&self) -> MutexGuard<'_, HashSet<TaskKey>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the claimed key on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    keys: InFlightKeys,
    key: TaskKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.keys.keys().remove(&self.key);
    }
}
