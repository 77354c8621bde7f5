//! Stable cross-provider identity.
//!
//! A task's `originalId` is derived from provider-native fields and never from
//! the locally synthesized view id, so `(source, originalId)` survives moves,
//! renames and re-creation on the provider side.

use crate::types::{ProviderFields, TaskKey, TaskRecord, TaskSource};

/// Prefix of view ids synthesized for records whose identity cannot be resolved.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Derives the provider-stable identifier for `record`.
///
/// Returns an empty string when nothing identifying is available; callers
/// treat that as unresolvable.
pub fn derive_original_id(record: &TaskRecord) -> String {
    if let Some(original_id) = record
        .original_id
        .as_deref()
        .filter(|original_id| !original_id.trim().is_empty())
    {
        return original_id.to_string();
    }

    if let Some(native) = native_id(&record.source, &record.provider) {
        return native;
    }

    let Some(id) = non_empty(record.id.as_deref()) else {
        return String::new();
    };
    if id.starts_with(LOCAL_ID_PREFIX) {
        return String::new();
    }
    // A bare prefix strips to nothing and leaves the record unresolvable.
    if let Some(stripped) = record
        .source
        .view_prefix()
        .and_then(|prefix| id.strip_prefix(prefix))
    {
        return stripped.to_string();
    }
    id.to_string()
}

pub fn build_task_key(source: &TaskSource, original_id: &str) -> TaskKey {
    TaskKey::new(source, original_id)
}

/// Deterministic view id for a record that has no resolvable identity.
pub fn local_fallback_id(source: &TaskSource, slot: usize) -> String {
    let base = TaskKey::new(source, "").sanitized();
    format!("{LOCAL_ID_PREFIX}{base}-{slot}")
}

fn native_id(source: &TaskSource, provider: &ProviderFields) -> Option<String> {
    match (source, provider) {
        (
            TaskSource::IssueTracker,
            ProviderFields::IssueTracker {
                issue_id,
                repo,
                issue_number,
            },
        ) => {
            if let Some(issue_id) = non_empty(issue_id.as_deref()) {
                return Some(issue_id.to_string());
            }
            match (non_empty(repo.as_deref()), issue_number) {
                (Some(repo), Some(number)) => Some(format!("{repo}#{number}")),
                (None, Some(number)) => Some(number.to_string()),
                _ => None,
            }
        }
        (TaskSource::TodoList, ProviderFields::TodoList { task_id, .. }) => {
            non_empty(task_id.as_deref()).map(str::to_string)
        }
        (TaskSource::Board, ProviderFields::Board { card_id, .. }) => {
            non_empty(card_id.as_deref()).map(str::to_string)
        }
        (TaskSource::ActionItems, ProviderFields::ActionItems { action_id }) => {
            non_empty(action_id.as_deref()).map(str::to_string)
        }
        _ => None,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(issue_id: Option<&str>, repo: Option<&str>, number: Option<u64>) -> TaskRecord {
        TaskRecord::new(TaskSource::IssueTracker).with_provider(ProviderFields::IssueTracker {
            issue_id: issue_id.map(str::to_string),
            repo: repo.map(str::to_string),
            issue_number: number,
        })
    }

    #[test]
    fn test_explicit_original_id_wins() {
        let mut record = issue(Some("999"), None, None);
        record.original_id = Some("42".to_string());
        assert_eq!(derive_original_id(&record), "42");
    }

    #[test]
    fn test_explicit_original_id_is_returned_verbatim() {
        let mut record = TaskRecord::new(TaskSource::Board).with_id("trello-card-1");
        record.original_id = Some(" card-1 ".to_string());
        assert_eq!(derive_original_id(&record), " card-1 ");

        record.original_id = Some("   ".to_string());
        assert_eq!(derive_original_id(&record), "card-1");
    }

    #[test]
    fn test_issue_fields_in_priority_order() {
        assert_eq!(
            derive_original_id(&issue(Some("999"), Some("org/app"), Some(42))),
            "999"
        );
        assert_eq!(
            derive_original_id(&issue(None, Some("org/app"), Some(42))),
            "org/app#42"
        );
        assert_eq!(derive_original_id(&issue(None, None, Some(42))), "42");
    }

    #[test]
    fn test_native_ids_for_other_providers() {
        let todo = TaskRecord::new(TaskSource::TodoList).with_provider(ProviderFields::TodoList {
            task_id: Some("abc".to_string()),
            list_id: Some("L1".to_string()),
        });
        assert_eq!(derive_original_id(&todo), "abc");

        let card = TaskRecord::new(TaskSource::Board).with_provider(ProviderFields::Board {
            card_id: Some("card-1".to_string()),
            list_id: None,
        });
        assert_eq!(derive_original_id(&card), "card-1");

        let action =
            TaskRecord::new(TaskSource::ActionItems).with_provider(ProviderFields::ActionItems {
                action_id: Some("act-9".to_string()),
            });
        assert_eq!(derive_original_id(&action), "act-9");
    }

    #[test]
    fn test_mismatched_provider_fields_are_ignored() {
        let record = TaskRecord::new(TaskSource::Board)
            .with_id("trello-card-7")
            .with_provider(ProviderFields::TodoList {
                task_id: Some("abc".to_string()),
                list_id: None,
            });
        assert_eq!(derive_original_id(&record), "card-7");
    }

    #[test]
    fn test_strips_view_prefix_then_falls_back_to_raw_id() {
        let record = TaskRecord::new(TaskSource::IssueTracker).with_id("github-100");
        assert_eq!(derive_original_id(&record), "100");

        let record = TaskRecord::new(TaskSource::Other("Jira".to_string())).with_id("JIRA-7");
        assert_eq!(derive_original_id(&record), "JIRA-7");
    }

    #[test]
    fn test_nothing_available_is_empty() {
        assert_eq!(derive_original_id(&TaskRecord::new(TaskSource::Board)), "");
        let record = TaskRecord::new(TaskSource::Board).with_id("trello-");
        assert_eq!(derive_original_id(&record), "");
        let record = TaskRecord::new(TaskSource::IssueTracker).with_id("github-");
        assert_eq!(derive_original_id(&record), "");
    }

    #[test]
    fn test_local_fallback_ids_are_never_original_ids() {
        let id = local_fallback_id(&TaskSource::Board, 0);
        assert_eq!(id, "local-Trello---0");
        let record = TaskRecord::new(TaskSource::Board).with_id(id);
        assert_eq!(derive_original_id(&record), "");
    }

    #[test]
    fn test_derivation_is_stable() {
        let record = issue(None, Some("org/app"), Some(7));
        assert_eq!(derive_original_id(&record), derive_original_id(&record.clone()));
    }

    #[test]
    fn test_build_task_key_joins_source_and_id() {
        let key = build_task_key(&TaskSource::ActionItems, "act-1");
        assert_eq!(key.as_str(), "Fellow::act-1");
    }
}
