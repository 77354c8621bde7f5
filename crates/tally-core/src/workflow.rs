//! Per-task completion state machine.
//!
//! `Idle -> Confirming -> Executing -> Persisting -> Done`. A failure while
//! executing or persisting passes through `Failed` and hands control back to
//! `Confirming`; remote effects already applied stay applied and a retry
//! runs only the steps that have not succeeded yet.

use crate::error::WorkflowError;
use crate::types::{IdentityRotation, TaskKey, TaskRecord};
use crate::workflow_plan::CompletionPlan;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CompletionState {
    Idle,
    Confirming,
    Executing,
    Persisting,
    Done,
    Failed { reason: String },
}

impl CompletionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Confirming => "confirming",
            Self::Executing => "executing",
            Self::Persisting => "persisting",
            Self::Done => "done",
            Self::Failed { .. } => "failed",
        }
    }

    fn can_transition_to(&self, next: &CompletionState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Confirming)
                | (Self::Confirming, Self::Executing | Self::Idle)
                | (Self::Executing, Self::Persisting | Self::Failed { .. })
                | (Self::Persisting, Self::Done | Self::Failed { .. })
                | (Self::Failed { .. }, Self::Confirming)
        )
    }
}

impl fmt::Display for CompletionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One remote (or local) unit of work in a completion plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStep {
    CommentOnIssue,
    CloseIssue,
    RelabelCompleted,
    CopyTodo,
    DeleteTodo,
    MoveCard,
    CommentOnCard,
    CompleteLocally,
}

impl CompletionStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CommentOnIssue => "comment_on_issue",
            Self::CloseIssue => "close_issue",
            Self::RelabelCompleted => "relabel_completed",
            Self::CopyTodo => "copy_todo",
            Self::DeleteTodo => "delete_todo",
            Self::MoveCard => "move_card",
            Self::CommentOnCard => "comment_on_card",
            Self::CompleteLocally => "complete_locally",
        }
    }

    pub fn is_remote(self) -> bool {
        !matches!(self, Self::RelabelCompleted | Self::CompleteLocally)
    }

    /// True for steps that publish the completion note on the provider.
    pub fn posts_note(self) -> bool {
        matches!(self, Self::CommentOnIssue | Self::CommentOnCard)
    }
}

impl fmt::Display for CompletionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single user-initiated completion of one task.
#[derive(Debug, Clone)]
pub struct CompletionAttempt {
    pub(crate) key: TaskKey,
    pub(crate) original_id: String,
    pub(crate) task: TaskRecord,
    pub(crate) working: TaskRecord,
    pub(crate) note: String,
    pub(crate) plan: Option<CompletionPlan>,
    pub(crate) done: Vec<CompletionStep>,
    pub(crate) rotation: Option<IdentityRotation>,
    pub(crate) result: Option<TaskRecord>,
    pub(crate) last_error: Option<String>,
    state: CompletionState,
    history: Vec<CompletionState>,
}

impl CompletionAttempt {
    pub(crate) fn new(key: TaskKey, original_id: String, task: TaskRecord) -> Self {
        Self {
            key,
            original_id,
            working: task.clone(),
            task,
            note: String::new(),
            plan: None,
            done: Vec::new(),
            rotation: None,
            result: None,
            last_error: None,
            state: CompletionState::Idle,
            history: vec![CompletionState::Idle],
        }
    }

    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    pub fn original_id(&self) -> &str {
        &self.original_id
    }

    /// The task as it was when the attempt began.
    pub fn task(&self) -> &TaskRecord {
        &self.task
    }

    pub fn state(&self) -> &CompletionState {
        &self.state
    }

    /// Every state the attempt has passed through, oldest first.
    pub fn history(&self) -> &[CompletionState] {
        &self.history
    }

    pub fn plan(&self) -> Option<&CompletionPlan> {
        self.plan.as_ref()
    }

    /// Steps that already succeeded and will not be repeated on retry.
    pub fn completed_steps(&self) -> &[CompletionStep] {
        &self.done
    }

    /// The note the attempt will record, once confirmed.
    pub fn note(&self) -> &str {
        &self.note
    }

    pub(crate) fn note_posted(&self) -> bool {
        self.done.iter().any(|step| step.posts_note())
    }

    pub fn rotation(&self) -> Option<&IdentityRotation> {
        self.rotation.as_ref()
    }

    pub fn result(&self) -> Option<&TaskRecord> {
        self.result.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub(crate) fn transition(
        &mut self,
        next: CompletionState,
        action: &'static str,
    ) -> Result<CompletionState, WorkflowError> {
        if !self.state.can_transition_to(&next) {
            return Err(WorkflowError::InvalidState {
                state: self.state.name().to_string(),
                action,
            });
        }
        let previous = std::mem::replace(&mut self.state, next.clone());
        self.history.push(next);
        Ok(previous)
    }
}
