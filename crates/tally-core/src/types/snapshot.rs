use crate::error::ValidationError;
use crate::types::key::TaskKey;
use crate::types::source::TaskSource;
use crate::types::task::{ProviderFields, TaskRecord};
use crate::validation::validate_identity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const COMPLETED_LOCALLY: &str = "Completed locally";

fn unspecified_source() -> TaskSource {
    TaskSource::Other(String::new())
}

/// Durable record that a task was completed locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedSnapshot {
    #[serde(default = "unspecified_source")]
    pub source: TaskSource,
    #[serde(default)]
    pub original_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(default = "default_true")]
    pub locally_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_original_id: Option<String>,
    #[serde(default, skip_serializing_if = "ProviderFields::is_none")]
    pub provider: ProviderFields,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

impl CompletedSnapshot {
    pub fn new(source: TaskSource, original_id: impl Into<String>) -> Self {
        Self {
            source,
            original_id: original_id.into(),
            id: None,
            title: None,
            description: None,
            notes: None,
            status: None,
            url: None,
            container_id: None,
            container_name: None,
            locally_completed: true,
            completed_at: None,
            created_at: None,
            updated_at: None,
            previous_id: None,
            previous_original_id: None,
            provider: ProviderFields::None,
            extra: Map::new(),
        }
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(&self.source, &self.original_id)
    }

    /// Snapshot payload for a task the workflow just completed.
    pub fn from_task(
        task: &TaskRecord,
        original_id: &str,
        note: &str,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source: task.source.clone(),
            original_id: original_id.to_string(),
            id: task.id.clone(),
            title: Some(
                task.title
                    .clone()
                    .unwrap_or_else(|| "Untitled task".to_string()),
            ),
            description: task.description.clone(),
            notes: Some(note.to_string()),
            status: Some(match task.status.as_deref() {
                Some(status) if task.provider_reports_done() => status.to_string(),
                _ => COMPLETED_LOCALLY.to_string(),
            }),
            url: task.url.clone(),
            container_id: task.container_id.clone(),
            container_name: task.container_name.clone(),
            locally_completed: true,
            completed_at: Some(completed_at),
            created_at: None,
            updated_at: Some(completed_at),
            previous_id: task.previous_id.clone(),
            previous_original_id: None,
            provider: task.provider.clone(),
            extra: task.extra.clone(),
        }
    }

    fn overlay(&mut self, incoming: CompletedSnapshot) {
        fn take(target: &mut Option<String>, value: Option<String>) {
            if value.is_some() {
                *target = value;
            }
        }
        take(&mut self.id, incoming.id);
        take(&mut self.title, incoming.title);
        take(&mut self.description, incoming.description);
        take(&mut self.notes, incoming.notes);
        take(&mut self.status, incoming.status);
        take(&mut self.url, incoming.url);
        take(&mut self.container_id, incoming.container_id);
        take(&mut self.container_name, incoming.container_name);
        take(&mut self.previous_id, incoming.previous_id);
        take(&mut self.previous_original_id, incoming.previous_original_id);
        if !incoming.provider.is_none() {
            self.provider = incoming.provider;
        }
        self.extra.extend(incoming.extra);
    }
}

/// Upsert rule shared by every store backend.
///
/// `existing` is the entry already stored under the incoming snapshot's key.
/// The original `createdAt` survives, `updatedAt` becomes `now`, and
/// `completedAt` comes from the incoming snapshot, then the existing one, then `now`.
pub fn merge_snapshot(
    existing: Option<&CompletedSnapshot>,
    mut incoming: CompletedSnapshot,
    now: DateTime<Utc>,
) -> Result<CompletedSnapshot, ValidationError> {
    incoming.original_id = incoming.original_id.trim().to_string();
    validate_identity(&incoming.source, &incoming.original_id)?;
    let key = incoming.key();
    let incoming_completed_at = incoming.completed_at;

    let mut merged = match existing {
        Some(old) => {
            let mut merged = old.clone();
            merged.source = incoming.source.clone();
            merged.original_id = incoming.original_id.clone();
            merged.overlay(incoming);
            merged.created_at = old.created_at.or(Some(now));
            merged.completed_at = incoming_completed_at.or(old.completed_at).or(Some(now));
            merged
        }
        None => {
            let mut inserted = incoming;
            inserted.created_at = Some(now);
            inserted.completed_at = incoming_completed_at.or(Some(now));
            inserted
        }
    };

    merged.updated_at = Some(now);
    merged.locally_completed = true;
    if merged.id.as_deref().is_none_or(str::is_empty) {
        merged.id = Some(format!("completed-{}", key.sanitized()));
    }
    Ok(merged)
}
