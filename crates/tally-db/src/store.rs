use crate::completion_repo::CompletionRepo;
use crate::priority_repo::PriorityRepo;
use crate::schema;
use crate::util::DbError;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tally_core::error::StoreError;
use tally_core::retention::RetentionPolicy;
use tally_core::store::{CompletionStore, PriorityStore};
use tally_core::types::{CompletedSnapshot, Priority, TaskKey, TaskSource, merge_snapshot};
use tally_core::validation::validate_identity;

/// SQLite-backed completion and priority store.
pub struct DbStore {
    conn: Mutex<Connection>,
}

impl DbStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = schema::open_and_migrate(path).map_err(DbError::from)?;
        Ok(Self::new(conn))
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Backend {
            message: "database connection lock poisoned".to_string(),
        })
    }

    /// Runs `f` inside `BEGIN IMMEDIATE` / `COMMIT`, rolling back on error.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.connection()?;
        conn.execute_batch("BEGIN IMMEDIATE").map_err(DbError::from)?;
        match f(&conn) {
            Ok(value) => {
                conn.execute_batch("COMMIT").map_err(DbError::from)?;
                Ok(value)
            }
            Err(err) => {
                conn.execute_batch("ROLLBACK").map_err(DbError::from)?;
                Err(err)
            }
        }
    }
}

impl CompletionStore for DbStore {
    fn get_all(&self) -> Result<Vec<CompletedSnapshot>, StoreError> {
        let conn = self.connection()?;
        Ok(CompletionRepo::new(&conn).list()?)
    }

    fn upsert_at(
        &self,
        mut snapshot: CompletedSnapshot,
        now: DateTime<Utc>,
    ) -> Result<CompletedSnapshot, StoreError> {
        snapshot.original_id = snapshot.original_id.trim().to_string();
        validate_identity(&snapshot.source, &snapshot.original_id)?;
        let stored = self.with_tx(|conn| {
            let repo = CompletionRepo::new(conn);
            let existing = repo.get(&snapshot.source, &snapshot.original_id)?;
            let merged = merge_snapshot(existing.as_ref(), snapshot, now)?;
            repo.write(&merged)?;
            Ok(merged)
        })?;
        tracing::debug!(key = %stored.key(), "completion snapshot upserted");
        Ok(stored)
    }

    fn prune(&self, policy: &dyn RetentionPolicy, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let removed = self.with_tx(|conn| {
            let repo = CompletionRepo::new(conn);
            let snapshots = repo.list()?;
            let mut removed = 0;
            for key in policy.expired(&snapshots, now) {
                let Some((source, original_id)) = TaskKey::parse(key.as_str()) else {
                    continue;
                };
                if repo.delete(&source, &original_id)? {
                    removed += 1;
                }
            }
            Ok(removed)
        })?;
        if removed > 0 {
            tracing::info!(removed, "pruned completed snapshots");
        }
        Ok(removed)
    }
}

impl PriorityStore for DbStore {
    fn all(&self) -> Result<HashMap<TaskKey, Priority>, StoreError> {
        let conn = self.connection()?;
        let entries = PriorityRepo::new(&conn).list()?;
        Ok(entries
            .into_iter()
            .map(|(source, original_id, priority)| (TaskKey::new(&source, &original_id), priority))
            .collect())
    }

    fn set(
        &self,
        source: &TaskSource,
        original_id: &str,
        priority: Option<Priority>,
    ) -> Result<(), StoreError> {
        let original_id = original_id.trim();
        validate_identity(source, original_id)?;
        let conn = self.connection()?;
        let repo = PriorityRepo::new(&conn);
        match priority {
            Some(priority) => repo.upsert(source, original_id, priority, Utc::now())?,
            None => {
                repo.clear(source, original_id)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::with_test_db;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::Arc;
    use tally_core::error::ValidationError;
    use tally_core::retention::{MaxAge, MaxEntries};

    fn store() -> DbStore {
        DbStore::new(with_test_db().unwrap())
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_second_upsert_wins_title_and_keeps_created_at() {
        let store = store();
        let mut first = CompletedSnapshot::new(TaskSource::IssueTracker, "42");
        first.title = Some("First".to_string());
        first.extra.insert("labels".to_string(), json!(["bug"]));
        let created = store.upsert_at(first, at(8)).unwrap();

        let mut second = CompletedSnapshot::new(TaskSource::IssueTracker, "42");
        second.title = Some("Second".to_string());
        let updated = store.upsert_at(second, at(9)).unwrap();

        assert_eq!(updated.title.as_deref(), Some("Second"));
        assert_eq!(updated.created_at, Some(at(8)));
        assert_eq!(updated.updated_at, Some(at(9)));
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.extra.get("labels"), Some(&json!(["bug"])));

        let all = store.get_all().unwrap();
        assert_eq!(all, vec![updated]);
    }

    #[test]
    fn test_invalid_snapshot_is_rejected_before_writing() {
        let store = store();
        let err = store
            .upsert_at(CompletedSnapshot::new(TaskSource::Board, " "), at(8))
            .unwrap_err();
        assert_eq!(err, StoreError::Validation(ValidationError::MissingIdentity));
        assert!(store.get_all().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_upserts_on_distinct_keys_are_all_kept() {
        let store = Arc::new(store());
        let handles: Vec<_> = (0..8)
            .map(|index| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let snapshot = CompletedSnapshot::new(TaskSource::Board, format!("card-{index}"));
                    store.upsert_at(snapshot, at(8)).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.get_all().unwrap().len(), 8);
    }

    #[test]
    fn test_prune_by_age_and_count() {
        let store = store();
        for (id, hour) in [("a", 1), ("b", 5), ("c", 9)] {
            let mut snapshot = CompletedSnapshot::new(TaskSource::Board, id);
            snapshot.completed_at = Some(Utc.with_ymd_and_hms(2024, 1, hour, 0, 0, 0).unwrap());
            store.upsert_at(snapshot, at(10)).unwrap();
        }
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();

        assert_eq!(store.prune(&MaxAge { days: 7 }, now).unwrap(), 1);
        assert_eq!(store.prune(&MaxEntries { count: 1 }, now).unwrap(), 1);

        let remaining = store.get_all().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].original_id, "c");
    }

    #[test]
    fn test_priorities_are_keyed_like_snapshots() {
        let store = store();
        store
            .set(&TaskSource::TodoList, "abc", Some(Priority::High))
            .unwrap();
        store
            .set(&TaskSource::Board, "abc", Some(Priority::Low))
            .unwrap();

        let all = store.all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(
            all.get(&TaskKey::new(&TaskSource::TodoList, "abc")),
            Some(&Priority::High)
        );

        store.set(&TaskSource::TodoList, "abc", None).unwrap();
        assert_eq!(store.all().unwrap().len(), 1);
        assert!(store.set(&TaskSource::Other(String::new()), "abc", None).is_err());
    }
}
