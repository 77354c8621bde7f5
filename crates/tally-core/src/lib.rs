pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod in_flight;
pub mod priorities;
pub mod provider;
pub mod reconcile;
pub mod refresh;
pub mod retention;
pub mod store;
pub mod validation;
pub mod workflow;
pub mod workflow_exec;
pub mod workflow_plan;

pub mod types;

pub use crate::error::TallyError;
pub use crate::events::RequestContext;
pub use crate::identity::{build_task_key, derive_original_id};
pub use crate::reconcile::{merge, merge_at};
pub use crate::refresh::{RefreshCoordinator, RefreshOutcome, RefreshReport};
pub use crate::store::{CompletionStore, PriorityStore};
pub use crate::workflow_exec::CompletionOrchestrator;
