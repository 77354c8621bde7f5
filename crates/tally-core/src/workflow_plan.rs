use crate::config::CompletionConfig;
use crate::error::WorkflowError;
use crate::provider::IssueRef;
use crate::types::{ContainerOption, ProviderFields, TaskRecord, TaskSource};
use crate::workflow::CompletionStep;

/// Where the plan's steps act.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionTarget {
    Issue(IssueRef),
    TodoMove {
        from_list: String,
        task_id: String,
        to: ContainerOption,
    },
    Card {
        card_id: String,
        to: ContainerOption,
    },
    Relabel {
        to: ContainerOption,
    },
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionPlan {
    pub steps: Vec<CompletionStep>,
    pub target: CompletionTarget,
}

impl CompletionPlan {
    pub fn has_remote_steps(&self) -> bool {
        self.steps.iter().any(|step| step.is_remote())
    }
}

/// Resolves the steps needed to complete `task`. Fails before any remote call
/// when required provider data is missing.
pub fn plan_completion(
    task: &TaskRecord,
    original_id: &str,
    note: &str,
    config: &CompletionConfig,
) -> Result<CompletionPlan, WorkflowError> {
    let has_note = !note.trim().is_empty();
    match task.source {
        TaskSource::IssueTracker => {
            let issue = issue_ref(task, original_id)?;
            let mut steps = Vec::new();
            if has_note {
                steps.push(CompletionStep::CommentOnIssue);
            }
            steps.push(CompletionStep::CloseIssue);
            Ok(CompletionPlan {
                steps,
                target: CompletionTarget::Issue(issue),
            })
        }
        TaskSource::TodoList => {
            let to = completed_container(task, &config.todo_completed_container)?;
            if already_in(task, &to) {
                return Ok(relabel_only(to));
            }
            let (task_id, list_id) = match &task.provider {
                ProviderFields::TodoList { task_id, list_id } => (task_id.clone(), list_id.clone()),
                _ => (None, None),
            };
            let task_id = non_empty(task_id)
                .or_else(|| non_empty(Some(original_id.to_string())))
                .ok_or(WorkflowError::MissingField { field: "task id" })?;
            let from_list = non_empty(list_id)
                .or_else(|| non_empty(task.container_id.clone()))
                .ok_or(WorkflowError::MissingField { field: "task list" })?;
            Ok(CompletionPlan {
                steps: vec![CompletionStep::CopyTodo, CompletionStep::DeleteTodo],
                target: CompletionTarget::TodoMove {
                    from_list,
                    task_id,
                    to,
                },
            })
        }
        TaskSource::Board => {
            let card_id =
                board_card_id(task).or_else(|| non_empty(Some(original_id.to_string())));
            plan_board(task, card_id, has_note, config)
        }
        // Action items mirrored from a board complete like any other card.
        TaskSource::ActionItems => match board_card_id(task) {
            Some(card_id) if !task.container_options.is_empty() => {
                plan_board(task, Some(card_id), has_note, config)
            }
            _ => Ok(local_plan()),
        },
        TaskSource::Other(_) => Ok(local_plan()),
    }
}

fn plan_board(
    task: &TaskRecord,
    card_id: Option<String>,
    has_note: bool,
    config: &CompletionConfig,
) -> Result<CompletionPlan, WorkflowError> {
    let to = completed_container(task, &config.board_completed_container)?;
    let already_done = already_in(task, &to);
    if already_done && !has_note {
        return Ok(relabel_only(to));
    }
    let card_id = card_id.ok_or(WorkflowError::MissingField { field: "card id" })?;
    let mut steps = vec![if already_done {
        CompletionStep::RelabelCompleted
    } else {
        CompletionStep::MoveCard
    }];
    if has_note {
        steps.push(CompletionStep::CommentOnCard);
    }
    Ok(CompletionPlan {
        steps,
        target: CompletionTarget::Card { card_id, to },
    })
}

fn board_card_id(task: &TaskRecord) -> Option<String> {
    match &task.provider {
        ProviderFields::Board { card_id, .. } => non_empty(card_id.clone()),
        _ => None,
    }
}

fn local_plan() -> CompletionPlan {
    CompletionPlan {
        steps: vec![CompletionStep::CompleteLocally],
        target: CompletionTarget::Local,
    }
}

fn relabel_only(to: ContainerOption) -> CompletionPlan {
    CompletionPlan {
        steps: vec![CompletionStep::RelabelCompleted],
        target: CompletionTarget::Relabel { to },
    }
}

fn completed_container(task: &TaskRecord, name: &str) -> Result<ContainerOption, WorkflowError> {
    task.find_container(name)
        .cloned()
        .ok_or_else(|| WorkflowError::MissingContainer {
            name: name.to_string(),
        })
}

fn already_in(task: &TaskRecord, container: &ContainerOption) -> bool {
    task.container_id.as_deref() == Some(container.id.as_str())
        || task
            .container_name
            .as_deref()
            .is_some_and(|name| container.matches_name(name))
}

fn issue_ref(task: &TaskRecord, original_id: &str) -> Result<IssueRef, WorkflowError> {
    let (repo, number) = match &task.provider {
        ProviderFields::IssueTracker {
            repo, issue_number, ..
        } => (non_empty(repo.clone()), *issue_number),
        _ => (None, None),
    };
    let parsed = original_id
        .rsplit_once('#')
        .and_then(|(repo, number)| Some((repo.to_string(), number.parse::<u64>().ok()?)))
        .filter(|(repo, _)| !repo.is_empty());

    let repo = repo
        .or_else(|| parsed.as_ref().map(|(repo, _)| repo.clone()))
        .ok_or(WorkflowError::MissingField {
            field: "repository",
        })?;
    let number = number
        .or_else(|| parsed.as_ref().map(|(_, number)| *number))
        .ok_or(WorkflowError::MissingField {
            field: "issue number",
        })?;
    Ok(IssueRef { repo, number })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}
