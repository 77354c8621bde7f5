use crate::types::key::TaskKey;
use crate::types::snapshot::CompletedSnapshot;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRotation {
    pub from_key: TaskKey,
    pub to_key: TaskKey,
    pub from_id: Option<String>,
    pub to_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EventBody {
    CompletionStateChanged {
        key: TaskKey,
        from: String,
        to: String,
    },
    CompletionStepApplied {
        key: TaskKey,
        step: String,
    },
    IdentityRotated {
        rotation: IdentityRotation,
    },
    SnapshotUpserted {
        snapshot: CompletedSnapshot,
    },
    RefreshCompleted {
        task_count: usize,
        failed_sources: Vec<String>,
    },
    RefreshCancelled,
}
