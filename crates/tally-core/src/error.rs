use crate::types::{TaskKey, TaskSource};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("completed task snapshots must include both source and originalId")]
    MissingIdentity,
    #[error("invalid priority: {value} (expected high, medium or low)")]
    InvalidPriority { value: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{provider} integration is not configured")]
    NotConfigured { provider: TaskSource },
    #[error("{provider} request failed: {message}")]
    Request { provider: TaskSource, message: String },
    #[error("{provider} rejected the request: {message}")]
    Rejected { provider: TaskSource, message: String },
}

impl ProviderError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::NotConfigured { .. })
    }

    pub fn provider(&self) -> &TaskSource {
        match self {
            Self::NotConfigured { provider }
            | Self::Request { provider, .. }
            | Self::Rejected { provider, .. } => provider,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("store backend error: {message}")]
    Backend { message: String },
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("a completion for {key} is already in flight")]
    AlreadyInFlight { key: TaskKey },
    #[error("cannot {action} while {state}")]
    InvalidState { state: String, action: &'static str },
    #[error("unable to determine a stable identifier for this task")]
    Unresolvable,
    #[error("couldn't find a \"{name}\" container for this task")]
    MissingContainer { name: String },
    #[error("unable to determine the {field} needed to complete this task")]
    MissingField { field: &'static str },
    #[error("{step} failed: {source}")]
    Step {
        step: String,
        #[source]
        source: ProviderError,
    },
    #[error("the provider was updated but saving the completion failed: {source}")]
    Persist {
        #[source]
        source: StoreError,
    },
}

impl WorkflowError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Step { source, .. } if source.is_configuration())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {message}")]
    Read { path: String, message: String },
    #[error("failed to parse config {path}: {message}")]
    Parse { path: String, message: String },
    #[error("invalid feed source: {value}")]
    InvalidFeed { value: String },
}

#[derive(Debug, Error)]
pub enum TallyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no task matches {key}")]
    TaskNotFound { key: String },
    #[error("internal error: {message}")]
    Internal { message: String },
}
