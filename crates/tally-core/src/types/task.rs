use crate::types::priority::Priority;
use crate::types::source::TaskSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A container a task could be moved into (list, board column, repository).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerOption {
    pub id: String,
    pub name: String,
}

impl ContainerOption {
    pub fn matches_name(&self, name: &str) -> bool {
        normalize_text(&self.name) == normalize_text(name)
    }
}

pub(crate) fn normalize_text(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Native fields each provider contributes; the engine only reads the variant
/// matching the record's source.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ProviderFields {
    #[default]
    None,
    IssueTracker {
        #[serde(default, deserialize_with = "string_or_number")]
        issue_id: Option<String>,
        #[serde(default)]
        repo: Option<String>,
        #[serde(default)]
        issue_number: Option<u64>,
    },
    TodoList {
        #[serde(default)]
        task_id: Option<String>,
        #[serde(default)]
        list_id: Option<String>,
    },
    Board {
        #[serde(default)]
        card_id: Option<String>,
        #[serde(default)]
        list_id: Option<String>,
    },
    ActionItems {
        #[serde(default)]
        action_id: Option<String>,
    },
}

impl ProviderFields {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Fills fields that are unset on `self` from `other` when both describe the same provider.
    fn fill_from(&mut self, other: &ProviderFields) {
        if self.is_none() {
            *self = other.clone();
            return;
        }
        match (self, other) {
            (
                Self::IssueTracker {
                    issue_id,
                    repo,
                    issue_number,
                },
                Self::IssueTracker {
                    issue_id: other_id,
                    repo: other_repo,
                    issue_number: other_number,
                },
            ) => {
                fill(issue_id, other_id);
                fill(repo, other_repo);
                if issue_number.is_none() {
                    *issue_number = *other_number;
                }
            }
            (
                Self::TodoList { task_id, list_id },
                Self::TodoList {
                    task_id: other_task,
                    list_id: other_list,
                },
            )
            | (
                Self::Board {
                    card_id: task_id,
                    list_id,
                },
                Self::Board {
                    card_id: other_task,
                    list_id: other_list,
                },
            ) => {
                fill(task_id, other_task);
                fill(list_id, other_list);
            }
            (
                Self::ActionItems { action_id },
                Self::ActionItems {
                    action_id: other_id,
                },
            ) => fill(action_id, other_id),
            _ => {}
        }
    }
}

fn fill(target: &mut Option<String>, other: &Option<String>) {
    if target.is_none() {
        target.clone_from(other);
    }
}

fn overwrite<T: Clone>(target: &mut Option<T>, other: Option<T>) {
    if other.is_some() {
        *target = other;
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

/// The canonical, reconciled representation of one unit of work.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    #[serde(default)]
    pub source: TaskSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_options: Vec<ContainerOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub locally_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "ProviderFields::is_none")]
    pub provider: ProviderFields,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskRecord {
    pub fn new(source: TaskSource) -> Self {
        Self {
            source,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_provider(mut self, provider: ProviderFields) -> Self {
        self.provider = provider;
        self
    }

    /// True when the provider's own status text says the work is finished.
    pub fn provider_reports_done(&self) -> bool {
        let Some(status) = self.status.as_deref() else {
            return false;
        };
        let status = status.to_lowercase();
        ["done", "complete", "closed", "resolved"]
            .iter()
            .any(|word| status.contains(word))
    }

    pub fn is_done(&self) -> bool {
        self.locally_completed || self.provider_reports_done()
    }

    pub fn find_container(&self, name: &str) -> Option<&ContainerOption> {
        self.container_options
            .iter()
            .find(|option| option.matches_name(name))
    }

    /// Shallow-merges a later live record for the same key over `self`.
    ///
    /// Non-null fields of `other` win; completion fields are left untouched.
    pub fn absorb_live(&mut self, other: TaskRecord) {
        overwrite(&mut self.original_id, other.original_id);
        overwrite(&mut self.id, other.id);
        overwrite(&mut self.title, other.title);
        overwrite(&mut self.description, other.description);
        overwrite(&mut self.url, other.url);
        overwrite(&mut self.container_id, other.container_id);
        overwrite(&mut self.container_name, other.container_name);
        overwrite(&mut self.status, other.status);
        overwrite(&mut self.previous_id, other.previous_id);
        overwrite(&mut self.priority, other.priority);
        if !other.container_options.is_empty() {
            self.container_options = other.container_options;
        }
        if !other.provider.is_none() {
            let mut provider = other.provider;
            provider.fill_from(&self.provider);
            self.provider = provider;
        }
        self.extra.extend(other.extra);
    }

    /// Fills every descriptive field `self` lacks from `other`, keeping what `self` has.
    pub(crate) fn fill_missing_from(&mut self, other: &TaskRecord) {
        fill(&mut self.title, &other.title);
        fill(&mut self.description, &other.description);
        fill(&mut self.url, &other.url);
        fill(&mut self.container_id, &other.container_id);
        fill(&mut self.container_name, &other.container_name);
        if self.container_options.is_empty() {
            self.container_options.clone_from(&other.container_options);
        }
        self.provider.fill_from(&other.provider);
        for (key, value) in &other.extra {
            self.extra
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}
