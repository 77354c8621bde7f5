use crate::identity::build_task_key;
use crate::types::{Priority, TaskKey, TaskRecord};
use std::collections::HashMap;

/// Joins the priority map into already reconciled records.
///
/// Records without a resolved `original_id` never carry a priority.
pub fn apply_priorities(records: &mut [TaskRecord], priorities: &HashMap<TaskKey, Priority>) {
    for record in records {
        record.priority = record
            .original_id
            .as_deref()
            .filter(|original_id| !original_id.is_empty())
            .and_then(|original_id| priorities.get(&build_task_key(&record.source, original_id)))
            .copied();
    }
}
