//! Cancellable fan-out refresh across provider feeds and the completion store.

use crate::events::{RequestContext, publish};
use crate::priorities::apply_priorities;
use crate::provider::TaskFeed;
use crate::reconcile::merge;
use crate::store::{CompletionStore, PriorityStore};
use crate::types::{CompletedSnapshot, EventBody, TaskRecord};
use futures::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tally_events::bus::EventBus;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const COMPLETED_TASKS_LABEL: &str = "Completed tasks";
pub const PRIORITIES_LABEL: &str = "Task priorities";
const NOT_CONFIGURED_SUFFIX: &str = " (integration not configured)";
const GENERIC_FAILURE: &str = "We couldn't load your tasks right now. Please try again.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFailure {
    pub label: String,
    pub configuration: bool,
    pub message: String,
}

impl SourceFailure {
    fn display_label(&self) -> String {
        if self.configuration {
            format!("{}{NOT_CONFIGURED_SUFFIX}", self.label)
        } else {
            self.label.clone()
        }
    }
}

/// One warning for the whole refresh: specific for a single failed source,
/// generic for two or more.
pub fn summarize_failures(failures: &[SourceFailure]) -> Option<String> {
    match failures {
        [] => None,
        [failure] => Some(format!(
            "Heads up: {} couldn't be loaded right now.",
            failure.display_label()
        )),
        _ => Some(GENERIC_FAILURE.to_string()),
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    pub tasks: Vec<TaskRecord>,
    pub failures: Vec<SourceFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    Applied(RefreshReport),
    /// Superseded by a newer refresh; nothing was written.
    Cancelled,
}

/// The task collection the last applied refresh produced.
#[derive(Debug, Clone, Default)]
pub struct TaskView {
    inner: Arc<RwLock<Vec<TaskRecord>>>,
}

impl TaskView {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Vec<TaskRecord> {
        self.inner.read().await.clone()
    }

    /// Folds a workflow result back into the collection by view id.
    pub async fn replace_task(&self, previous_id: Option<&str>, task: TaskRecord) {
        let mut tasks = self.inner.write().await;
        let position = tasks.iter().position(|existing| {
            existing.id.is_some()
                && (existing.id == task.id || existing.id.as_deref() == previous_id)
        });
        match position {
            Some(position) => tasks[position] = task,
            None => tasks.push(task),
        }
    }
}

pub struct RefreshCoordinator<C: CompletionStore, P: PriorityStore> {
    feeds: Vec<Arc<dyn TaskFeed>>,
    completions: Arc<C>,
    priorities: Arc<P>,
    view: TaskView,
    event_bus: EventBus,
    generation: AtomicU64,
    current: Mutex<Option<ActiveRefresh>>,
}

struct ActiveRefresh {
    generation: u64,
    token: CancellationToken,
}

impl<C: CompletionStore, P: PriorityStore> RefreshCoordinator<C, P> {
    pub fn new(
        feeds: Vec<Arc<dyn TaskFeed>>,
        completions: Arc<C>,
        priorities: Arc<P>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            feeds,
            completions,
            priorities,
            view: TaskView::new(),
            event_bus,
            generation: AtomicU64::new(0),
            current: Mutex::new(None),
        }
    }

    pub fn view(&self) -> &TaskView {
        &self.view
    }

    /// Cancels the refresh in flight, if any.
    pub fn cancel(&self) {
        if let Some(active) = self.active().take() {
            active.token.cancel();
        }
    }

    /// Fetches every feed and the stored snapshots concurrently, reconciles
    /// them and publishes the result to the view. Starting a new refresh
    /// cancels the previous one, which then writes nothing.
    pub async fn refresh(&self, ctx: &RequestContext) -> RefreshOutcome {
        let token = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self.active().replace(ActiveRefresh {
            generation,
            token: token.clone(),
        });
        if let Some(previous) = previous {
            debug!(generation = previous.generation, "superseding in-flight refresh");
            previous.token.cancel();
        }

        let fetches = join_all(self.feeds.iter().map(|feed| async move {
            let label = feed.label();
            (label, feed.fetch().await)
        }));
        let completions = Arc::clone(&self.completions);
        let stored = async move { completions.get_all() };

        let (results, stored) = tokio::select! {
            () = token.cancelled() => return self.cancelled(ctx),
            settled = futures::future::join(fetches, stored) => settled,
        };

        let mut live = Vec::new();
        let mut failures = Vec::new();
        for (label, result) in results {
            match result {
                Ok(records) => live.extend(records),
                Err(err) => {
                    warn!(source = %err.provider(), error = %err, "task feed failed");
                    failures.push(SourceFailure {
                        label,
                        configuration: err.is_configuration(),
                        message: err.to_string(),
                    });
                }
            }
        }
        let snapshots: Vec<CompletedSnapshot> = match stored {
            Ok(snapshots) => snapshots,
            Err(err) => {
                warn!(error = %err, "completed tasks could not be read");
                failures.push(SourceFailure {
                    label: COMPLETED_TASKS_LABEL.to_string(),
                    configuration: false,
                    message: err.to_string(),
                });
                Vec::new()
            }
        };

        let mut tasks = merge(live, &snapshots);
        match self.priorities.all() {
            Ok(priorities) => apply_priorities(&mut tasks, &priorities),
            Err(err) => {
                warn!(error = %err, "priorities could not be read");
                failures.push(SourceFailure {
                    label: PRIORITIES_LABEL.to_string(),
                    configuration: false,
                    message: err.to_string(),
                });
            }
        }

        let report = RefreshReport {
            warning: summarize_failures(&failures),
            tasks,
            failures,
        };

        {
            let mut view = self.view.inner.write().await;
            if token.is_cancelled() {
                drop(view);
                return self.cancelled(ctx);
            }
            view.clone_from(&report.tasks);
        }
        {
            let mut active = self.active();
            if active
                .as_ref()
                .is_some_and(|active| active.generation == generation)
            {
                *active = None;
            }
        }

        debug!(
            tasks = report.tasks.len(),
            failures = report.failures.len(),
            "refresh applied"
        );
        publish(
            &self.event_bus,
            ctx,
            &EventBody::RefreshCompleted {
                task_count: report.tasks.len(),
                failed_sources: report
                    .failures
                    .iter()
                    .map(|failure| failure.label.clone())
                    .collect(),
            },
        );
        RefreshOutcome::Applied(report)
    }

    fn cancelled(&self, ctx: &RequestContext) -> RefreshOutcome {
        debug!("refresh cancelled");
        publish(&self.event_bus, ctx, &EventBody::RefreshCancelled);
        RefreshOutcome::Cancelled
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveRefresh>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
