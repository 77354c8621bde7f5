//! Reconciliation of live provider records with persisted completion snapshots.

use crate::identity::{build_task_key, derive_original_id, local_fallback_id};
use crate::types::{
    COMPLETED_LOCALLY, CompletedSnapshot, ProviderFields, TaskKey, TaskRecord,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Merges live records with completed snapshots using the current time for
/// entries that have no completion timestamp on either side.
pub fn merge(live: Vec<TaskRecord>, snapshots: &[CompletedSnapshot]) -> Vec<TaskRecord> {
    merge_at(live, snapshots, Utc::now())
}

/// Deterministic form of [`merge`]: output order is first-seen key order, live
/// records first, then snapshot-only entries in snapshot order.
pub fn merge_at(
    live: Vec<TaskRecord>,
    snapshots: &[CompletedSnapshot],
    now: DateTime<Utc>,
) -> Vec<TaskRecord> {
    let rotations = rotation_aliases(snapshots);
    let mut merged = KeyedTasks::default();

    for (slot, mut record) in live.into_iter().enumerate() {
        let original_id = derive_original_id(&record);
        if original_id.is_empty() {
            if record.id.as_deref().is_none_or(str::is_empty) {
                record.id = Some(local_fallback_id(&record.source, slot));
            }
            merged.insert(TaskKey::unresolved(slot), record);
            continue;
        }

        let mut key = build_task_key(&record.source, &original_id);
        record.original_id = Some(original_id);
        if let Some((rotated_key, rotated_original_id)) = rotations.get(&key) {
            rotate_identity(&mut record, rotated_original_id);
            key = rotated_key.clone();
        }

        match merged.get_mut(&key) {
            Some(existing) => existing.absorb_live(record),
            None => merged.insert(key, record),
        }
    }

    for snapshot in snapshots {
        let overlay = normalize_snapshot(snapshot);
        let key = snapshot.key();
        match merged.get_mut(&key) {
            Some(existing) => apply_overlay(existing, overlay, now),
            None => {
                let mut inserted = overlay;
                if inserted.id.as_deref().is_none_or(str::is_empty) {
                    inserted.id = Some(format!("completed-{}", key.sanitized()));
                }
                inserted.locally_completed = true;
                if inserted.completed_at.is_none() {
                    inserted.completed_at = Some(now);
                }
                synthesize_description(&mut inserted);
                merged.insert(key, inserted);
            }
        }
    }

    merged.into_values()
}

/// Maps a persisted snapshot onto the task record shape.
pub fn normalize_snapshot(snapshot: &CompletedSnapshot) -> TaskRecord {
    TaskRecord {
        source: snapshot.source.clone(),
        original_id: Some(snapshot.original_id.clone()),
        id: snapshot.id.clone(),
        title: snapshot.title.clone(),
        description: snapshot.description.clone(),
        url: snapshot.url.clone(),
        container_id: snapshot.container_id.clone(),
        container_name: snapshot.container_name.clone(),
        container_options: Vec::new(),
        status: Some(
            snapshot
                .status
                .clone()
                .unwrap_or_else(|| COMPLETED_LOCALLY.to_string()),
        ),
        locally_completed: true,
        completed_at: snapshot.completed_at,
        notes: snapshot.notes.clone(),
        previous_id: snapshot.previous_id.clone(),
        priority: None,
        provider: snapshot.provider.clone(),
        extra: snapshot.extra.clone(),
    }
}

/// Folds a completion overlay into a record that already exists under the same key.
pub fn apply_overlay(existing: &mut TaskRecord, overlay: TaskRecord, now: DateTime<Utc>) {
    existing.locally_completed = true;
    if overlay.status.is_some() {
        existing.status = overlay.status.clone();
    }
    existing.completed_at = overlay
        .completed_at
        .or(existing.completed_at)
        .or(Some(now));
    if overlay.notes.is_some() {
        existing.notes = overlay.notes.clone();
    }
    if existing.id.as_deref().is_none_or(str::is_empty) {
        existing.id = overlay.id.clone();
    }
    if existing.previous_id.is_none() {
        existing.previous_id = overlay.previous_id.clone();
    }

    prefer(&mut existing.title, &overlay.title);
    prefer(&mut existing.description, &overlay.description);
    prefer(&mut existing.url, &overlay.url);
    prefer(&mut existing.container_id, &overlay.container_id);
    prefer(&mut existing.container_name, &overlay.container_name);
    existing.fill_missing_from(&overlay);
    synthesize_description(existing);
}

fn prefer(target: &mut Option<String>, overlay: &Option<String>) {
    if overlay.is_some() {
        target.clone_from(overlay);
    }
}

fn synthesize_description(record: &mut TaskRecord) {
    if record.description.is_none() {
        if let Some(container) = record.container_name.as_deref() {
            record.description = Some(format!("Completed in {container}"));
        }
    }
}

/// Previous key → (rotated key, rotated originalId) for snapshots written after an identity rotation.
fn rotation_aliases(snapshots: &[CompletedSnapshot]) -> HashMap<TaskKey, (TaskKey, String)> {
    snapshots
        .iter()
        .filter_map(|snapshot| {
            let previous = snapshot.previous_original_id.as_deref()?;
            if previous.is_empty() || previous == snapshot.original_id {
                return None;
            }
            Some((
                build_task_key(&snapshot.source, previous),
                (snapshot.key(), snapshot.original_id.clone()),
            ))
        })
        .collect()
}

fn rotate_identity(record: &mut TaskRecord, rotated_original_id: &str) {
    record.previous_id = record.id.take();
    record.original_id = Some(rotated_original_id.to_string());
    record.provider = ProviderFields::None;
}

#[derive(Default)]
struct KeyedTasks {
    index: HashMap<TaskKey, usize>,
    tasks: Vec<TaskRecord>,
}

impl KeyedTasks {
    fn get_mut(&mut self, key: &TaskKey) -> Option<&mut TaskRecord> {
        let slot = *self.index.get(key)?;
        self.tasks.get_mut(slot)
    }

    fn insert(&mut self, key: TaskKey, record: TaskRecord) {
        self.index.insert(key, self.tasks.len());
        self.tasks.push(record);
    }

    fn into_values(self) -> Vec<TaskRecord> {
        self.tasks
    }
}
