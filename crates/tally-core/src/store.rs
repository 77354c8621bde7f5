use crate::error::StoreError;
use crate::retention::RetentionPolicy;
use crate::types::{CompletedSnapshot, Priority, TaskKey, TaskSource, merge_snapshot};
use crate::validation::validate_identity;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

/// Durable record of local completions keyed by `(source, originalId)`.
///
/// `upsert_at` must be atomic per key and durable before it returns.
pub trait CompletionStore: Send + Sync {
    fn get_all(&self) -> Result<Vec<CompletedSnapshot>, StoreError>;

    fn upsert_at(
        &self,
        snapshot: CompletedSnapshot,
        now: DateTime<Utc>,
    ) -> Result<CompletedSnapshot, StoreError>;

    fn upsert(&self, snapshot: CompletedSnapshot) -> Result<CompletedSnapshot, StoreError> {
        self.upsert_at(snapshot, Utc::now())
    }

    /// Removes the snapshots `policy` selects and returns how many were dropped.
    fn prune(&self, policy: &dyn RetentionPolicy, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// Per-task priority map, keyed like the completion store.
pub trait PriorityStore: Send + Sync {
    fn all(&self) -> Result<HashMap<TaskKey, Priority>, StoreError>;

    /// `None` clears the entry.
    fn set(
        &self,
        source: &TaskSource,
        original_id: &str,
        priority: Option<Priority>,
    ) -> Result<(), StoreError>;
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex.lock().map_err(|_| StoreError::Backend {
        message: "store lock poisoned".to_string(),
    })
}

#[derive(Debug, Default)]
pub struct MemoryCompletionStore {
    entries: Mutex<BTreeMap<TaskKey, CompletedSnapshot>>,
}

impl MemoryCompletionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshots(snapshots: impl IntoIterator<Item = CompletedSnapshot>) -> Self {
        let entries = snapshots
            .into_iter()
            .map(|snapshot| (snapshot.key(), snapshot))
            .collect();
        Self {
            entries: Mutex::new(entries),
        }
    }
}

impl CompletionStore for MemoryCompletionStore {
    fn get_all(&self) -> Result<Vec<CompletedSnapshot>, StoreError> {
        Ok(lock(&self.entries)?.values().cloned().collect())
    }

    fn upsert_at(
        &self,
        snapshot: CompletedSnapshot,
        now: DateTime<Utc>,
    ) -> Result<CompletedSnapshot, StoreError> {
        let mut entries = lock(&self.entries)?;
        let key = TaskKey::new(&snapshot.source, snapshot.original_id.trim());
        let stored = merge_snapshot(entries.get(&key), snapshot, now)?;
        entries.insert(stored.key(), stored.clone());
        tracing::debug!(key = %key, "completion snapshot upserted");
        Ok(stored)
    }

    fn prune(&self, policy: &dyn RetentionPolicy, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut entries = lock(&self.entries)?;
        let snapshots: Vec<CompletedSnapshot> = entries.values().cloned().collect();
        let removed = policy
            .expired(&snapshots, now)
            .iter()
            .filter(|key| entries.remove(*key).is_some())
            .count();
        if removed > 0 {
            tracing::info!(removed, "pruned completed snapshots");
        }
        Ok(removed)
    }
}

#[derive(Debug, Default)]
pub struct MemoryPriorityStore {
    entries: Mutex<HashMap<TaskKey, Priority>>,
}

impl MemoryPriorityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PriorityStore for MemoryPriorityStore {
    fn all(&self) -> Result<HashMap<TaskKey, Priority>, StoreError> {
        Ok(lock(&self.entries)?.clone())
    }

    fn set(
        &self,
        source: &TaskSource,
        original_id: &str,
        priority: Option<Priority>,
    ) -> Result<(), StoreError> {
        let original_id = original_id.trim();
        validate_identity(source, original_id)?;
        let key = TaskKey::new(source, original_id);
        let mut entries = lock(&self.entries)?;
        match priority {
            Some(priority) => {
                entries.insert(key, priority);
            }
            None => {
                entries.remove(&key);
            }
        }
        Ok(())
    }
}
