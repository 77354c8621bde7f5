//! Ports to the remote providers. HTTP clients live outside this crate and
//! plug in through these traits.

use crate::error::ProviderError;
use crate::types::{TaskRecord, TaskSource};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRef {
    pub repo: String,
    pub number: u64,
}

#[async_trait]
pub trait IssueTrackerGateway: Send + Sync {
    async fn comment_on_issue(&self, issue: &IssueRef, body: &str) -> Result<(), ProviderError>;
    async fn close_issue(&self, issue: &IssueRef) -> Result<(), ProviderError>;
}

/// A to-do item as the provider stores it, enough to recreate it in another list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[async_trait]
pub trait TodoListGateway: Send + Sync {
    async fn get_task(&self, list_id: &str, task_id: &str) -> Result<TodoItem, ProviderError>;
    /// Inserts `item` into `list_id`; the returned item carries the new native id.
    async fn insert_task(&self, list_id: &str, item: &TodoItem) -> Result<TodoItem, ProviderError>;
    async fn delete_task(&self, list_id: &str, task_id: &str) -> Result<(), ProviderError>;
}

#[async_trait]
pub trait BoardGateway: Send + Sync {
    async fn move_card(&self, card_id: &str, list_id: &str) -> Result<(), ProviderError>;
    async fn comment_on_card(&self, card_id: &str, text: &str) -> Result<(), ProviderError>;
}

/// One provider's normalized output for a refresh cycle.
#[async_trait]
pub trait TaskFeed: Send + Sync {
    fn source(&self) -> TaskSource;

    fn label(&self) -> String {
        self.source().display_name().to_string()
    }

    async fn fetch(&self) -> Result<Vec<TaskRecord>, ProviderError>;
}

/// Mutating clients the orchestrator may call. A missing client means the
/// integration is not configured.
#[derive(Clone, Default)]
pub struct ProviderGateways {
    pub issues: Option<Arc<dyn IssueTrackerGateway>>,
    pub todos: Option<Arc<dyn TodoListGateway>>,
    pub boards: Option<Arc<dyn BoardGateway>>,
}

impl ProviderGateways {
    pub fn issues(&self) -> Result<&dyn IssueTrackerGateway, ProviderError> {
        self.issues
            .as_deref()
            .ok_or_else(|| not_configured(TaskSource::IssueTracker))
    }

    pub fn todos(&self) -> Result<&dyn TodoListGateway, ProviderError> {
        self.todos
            .as_deref()
            .ok_or_else(|| not_configured(TaskSource::TodoList))
    }

    pub fn boards(&self) -> Result<&dyn BoardGateway, ProviderError> {
        self.boards
            .as_deref()
            .ok_or_else(|| not_configured(TaskSource::Board))
    }
}

impl std::fmt::Debug for ProviderGateways {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderGateways")
            .field("issues", &self.issues.is_some())
            .field("todos", &self.todos.is_some())
            .field("boards", &self.boards.is_some())
            .finish()
    }
}

fn not_configured(provider: TaskSource) -> ProviderError {
    ProviderError::NotConfigured { provider }
}

/// Reads one provider's normalized records from a JSON array on disk.
#[derive(Debug, Clone)]
pub struct JsonFileFeed {
    source: TaskSource,
    path: PathBuf,
}

impl JsonFileFeed {
    pub fn new(source: TaskSource, path: impl Into<PathBuf>) -> Self {
        Self {
            source,
            path: path.into(),
        }
    }
}

#[async_trait]
impl TaskFeed for JsonFileFeed {
    fn source(&self) -> TaskSource {
        self.source.clone()
    }

    async fn fetch(&self) -> Result<Vec<TaskRecord>, ProviderError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(not_configured(self.source.clone()));
            }
            Err(err) => {
                return Err(ProviderError::Request {
                    provider: self.source.clone(),
                    message: format!("{}: {err}", self.path.display()),
                });
            }
        };
        let mut records: Vec<TaskRecord> =
            serde_json::from_str(&contents).map_err(|err| ProviderError::Request {
                provider: self.source.clone(),
                message: format!("{}: {err}", self.path.display()),
            })?;
        for record in &mut records {
            record.source = self.source.clone();
        }
        Ok(records)
    }
}
