use crate::config::CompletionConfig;
use crate::error::{ProviderError, WorkflowError};
use crate::events::{RequestContext, publish};
use crate::identity::{build_task_key, derive_original_id};
use crate::in_flight::InFlightKeys;
use crate::provider::{ProviderGateways, TodoItem};
use crate::reconcile::{apply_overlay, normalize_snapshot};
use crate::store::CompletionStore;
use crate::types::{
    CompletedSnapshot, ContainerOption, EventBody, IdentityRotation, ProviderFields, TaskRecord,
};
use crate::workflow::{CompletionAttempt, CompletionState, CompletionStep};
use crate::workflow_plan::{CompletionTarget, plan_completion};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tally_events::bus::EventBus;
use tracing::{debug, info, warn};

/// Runs completion attempts: remote steps first, then the durable snapshot.
pub struct CompletionOrchestrator<S: CompletionStore> {
    store: Arc<S>,
    gateways: ProviderGateways,
    config: CompletionConfig,
    event_bus: EventBus,
    in_flight: InFlightKeys,
}

impl<S: CompletionStore> CompletionOrchestrator<S> {
    pub fn new(
        store: Arc<S>,
        gateways: ProviderGateways,
        config: CompletionConfig,
        event_bus: EventBus,
    ) -> Self {
        Self {
            store,
            gateways,
            config,
            event_bus,
            in_flight: InFlightKeys::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn in_flight(&self) -> &InFlightKeys {
        &self.in_flight
    }

    /// Opens an attempt for `task` and moves it to `Confirming`.
    pub fn begin(
        &self,
        ctx: &RequestContext,
        task: TaskRecord,
    ) -> Result<CompletionAttempt, WorkflowError> {
        let original_id = derive_original_id(&task);
        if original_id.is_empty() {
            return Err(WorkflowError::Unresolvable);
        }
        let key = build_task_key(&task.source, &original_id);
        let mut attempt = CompletionAttempt::new(key, original_id, task);
        self.transition(ctx, &mut attempt, CompletionState::Confirming, "begin")?;
        Ok(attempt)
    }

    /// Abandons a confirming attempt. Remote effects already applied stay applied.
    pub fn cancel(
        &self,
        ctx: &RequestContext,
        attempt: &mut CompletionAttempt,
    ) -> Result<(), WorkflowError> {
        self.transition(ctx, attempt, CompletionState::Idle, "cancel")
    }

    /// Executes (or resumes) the attempt with `note` and persists the result.
    ///
    /// On failure the attempt is back in `Confirming`; calling `confirm` again
    /// runs only the steps that have not succeeded. A retry with a different
    /// note re-plans the remaining steps unless a note was already posted, in
    /// which case the posted note is kept.
    pub async fn confirm(
        &self,
        ctx: &RequestContext,
        attempt: &mut CompletionAttempt,
        note: &str,
    ) -> Result<TaskRecord, WorkflowError> {
        if attempt.state() != &CompletionState::Confirming {
            return Err(WorkflowError::InvalidState {
                state: attempt.state().name().to_string(),
                action: "confirm",
            });
        }
        let Some(_claim) = self.in_flight.try_claim(attempt.key()) else {
            return Err(WorkflowError::AlreadyInFlight {
                key: attempt.key().clone(),
            });
        };

        let note = note.trim();
        if attempt.note != note {
            if attempt.note_posted() {
                debug!(key = %attempt.key(), "note already posted, keeping it");
            } else {
                attempt.note = note.to_string();
                attempt.plan = None;
            }
        }
        self.transition(ctx, attempt, CompletionState::Executing, "confirm")?;
        if let Err(err) = self.execute(ctx, attempt).await {
            return Err(self.fail(ctx, attempt, err));
        }

        self.transition(ctx, attempt, CompletionState::Persisting, "persist")?;
        let now = Utc::now();
        let record = match self.persist(ctx, attempt, now) {
            Ok(record) => record,
            Err(err) => return Err(self.fail(ctx, attempt, err)),
        };

        attempt.result = Some(record.clone());
        attempt.last_error = None;
        self.transition(ctx, attempt, CompletionState::Done, "finish")?;
        info!(key = %attempt.key(), source = %record.source, "task completed");
        Ok(record)
    }

    async fn execute(
        &self,
        ctx: &RequestContext,
        attempt: &mut CompletionAttempt,
    ) -> Result<(), WorkflowError> {
        if attempt.plan.is_none() {
            let plan = plan_completion(
                &attempt.task,
                &attempt.original_id,
                &attempt.note,
                &self.config,
            )?;
            debug!(key = %attempt.key(), steps = plan.steps.len(), "completion planned");
            attempt.plan = Some(plan);
        }
        let Some(plan) = attempt.plan.clone() else {
            return Ok(());
        };

        for step in plan.steps.iter().copied() {
            if attempt.done.contains(&step) {
                continue;
            }
            debug!(key = %attempt.key(), step = %step, "running completion step");
            self.run_step(step, &plan.target, attempt)
                .await
                .map_err(|source| WorkflowError::Step {
                    step: step.to_string(),
                    source,
                })?;
            attempt.done.push(step);
            publish(
                &self.event_bus,
                ctx,
                &EventBody::CompletionStepApplied {
                    key: attempt.key().clone(),
                    step: step.to_string(),
                },
            );
            if step == CompletionStep::CopyTodo {
                if let Some(rotation) = attempt.rotation.clone() {
                    info!(from = %rotation.from_key, to = %rotation.to_key, "task identity rotated");
                    publish(
                        &self.event_bus,
                        ctx,
                        &EventBody::IdentityRotated { rotation },
                    );
                }
            }
        }
        Ok(())
    }

    async fn run_step(
        &self,
        step: CompletionStep,
        target: &CompletionTarget,
        attempt: &mut CompletionAttempt,
    ) -> Result<(), ProviderError> {
        match (step, target) {
            (CompletionStep::CommentOnIssue, CompletionTarget::Issue(issue)) => {
                self.gateways
                    .issues()?
                    .comment_on_issue(issue, &attempt.note)
                    .await
            }
            (CompletionStep::CloseIssue, CompletionTarget::Issue(issue)) => {
                self.gateways.issues()?.close_issue(issue).await?;
                attempt.working.status = Some("closed".to_string());
                Ok(())
            }
            (
                CompletionStep::CopyTodo,
                CompletionTarget::TodoMove {
                    from_list,
                    task_id,
                    to,
                },
            ) => {
                let todos = self.gateways.todos()?;
                let current = todos.get_task(from_list, task_id).await?;
                let payload = TodoItem {
                    id: String::new(),
                    ..current
                };
                let inserted = todos.insert_task(&to.id, &payload).await?;
                rotate_todo(attempt, &inserted, to);
                Ok(())
            }
            (CompletionStep::DeleteTodo, CompletionTarget::TodoMove { from_list, task_id, .. }) => {
                self.gateways.todos()?.delete_task(from_list, task_id).await
            }
            (CompletionStep::MoveCard, CompletionTarget::Card { card_id, to }) => {
                self.gateways.boards()?.move_card(card_id, &to.id).await?;
                place_in(&mut attempt.working, to);
                Ok(())
            }
            (CompletionStep::CommentOnCard, CompletionTarget::Card { card_id, .. }) => {
                self.gateways
                    .boards()?
                    .comment_on_card(card_id, &attempt.note)
                    .await
            }
            (
                CompletionStep::RelabelCompleted,
                CompletionTarget::Relabel { to } | CompletionTarget::Card { to, .. },
            ) => {
                place_in(&mut attempt.working, to);
                Ok(())
            }
            (CompletionStep::CompleteLocally, _) => Ok(()),
            (step, _) => Err(ProviderError::Rejected {
                provider: attempt.task.source.clone(),
                message: format!("{step} does not apply to this task"),
            }),
        }
    }

    fn persist(
        &self,
        ctx: &RequestContext,
        attempt: &CompletionAttempt,
        now: DateTime<Utc>,
    ) -> Result<TaskRecord, WorkflowError> {
        let current_original_id = attempt
            .rotation
            .as_ref()
            .and_then(|_| attempt.working.original_id.clone())
            .unwrap_or_else(|| attempt.original_id.clone());
        let mut snapshot =
            CompletedSnapshot::from_task(&attempt.working, &current_original_id, &attempt.note, now);
        if attempt.rotation.is_some() {
            snapshot.previous_original_id = Some(attempt.original_id.clone());
        }

        let stored = self
            .store
            .upsert_at(snapshot, now)
            .map_err(|source| WorkflowError::Persist { source })?;
        publish(
            &self.event_bus,
            ctx,
            &EventBody::SnapshotUpserted {
                snapshot: stored.clone(),
            },
        );

        let mut record = attempt.working.clone();
        record.original_id = Some(current_original_id);
        apply_overlay(&mut record, normalize_snapshot(&stored), now);
        Ok(record)
    }

    fn fail(
        &self,
        ctx: &RequestContext,
        attempt: &mut CompletionAttempt,
        err: WorkflowError,
    ) -> WorkflowError {
        let reason = err.to_string();
        warn!(key = %attempt.key(), state = %attempt.state(), error = %reason, "completion failed");
        attempt.last_error = Some(reason.clone());
        if let Err(transition_err) =
            self.transition(ctx, attempt, CompletionState::Failed { reason }, "fail")
        {
            return transition_err;
        }
        if let Err(transition_err) =
            self.transition(ctx, attempt, CompletionState::Confirming, "retry")
        {
            return transition_err;
        }
        err
    }

    fn transition(
        &self,
        ctx: &RequestContext,
        attempt: &mut CompletionAttempt,
        next: CompletionState,
        action: &'static str,
    ) -> Result<(), WorkflowError> {
        let previous = attempt.transition(next, action)?;
        debug!(
            key = %attempt.key(),
            from = %previous,
            state = %attempt.state(),
            "completion state changed"
        );
        publish(
            &self.event_bus,
            ctx,
            &EventBody::CompletionStateChanged {
                key: attempt.key().clone(),
                from: previous.name().to_string(),
                to: attempt.state().name().to_string(),
            },
        );
        Ok(())
    }
}

fn place_in(record: &mut TaskRecord, container: &ContainerOption) {
    record.container_id = Some(container.id.clone());
    record.container_name = Some(container.name.clone());
}

/// Points the working record at the re-created to-do item and records the rotation.
fn rotate_todo(attempt: &mut CompletionAttempt, inserted: &TodoItem, to: &ContainerOption) {
    let working = &mut attempt.working;
    let from_id = working.id.clone();
    let prefix = working.source.view_prefix().unwrap_or_default();
    let to_id = format!("{prefix}{}", inserted.id);

    working.previous_id = from_id.clone();
    working.id = Some(to_id.clone());
    working.original_id = Some(inserted.id.clone());
    working.provider = ProviderFields::TodoList {
        task_id: Some(inserted.id.clone()),
        list_id: Some(to.id.clone()),
    };
    if inserted.status.is_some() {
        working.status.clone_from(&inserted.status);
    }
    place_in(working, to);

    attempt.rotation = Some(IdentityRotation {
        from_key: attempt.key.clone(),
        to_key: build_task_key(&working.source, &inserted.id),
        from_id,
        to_id,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::provider::{BoardGateway, IssueRef, IssueTrackerGateway, TodoListGateway};
    use crate::reconcile::merge;
    use crate::retention::RetentionPolicy;
    use crate::store::MemoryCompletionStore;
    use crate::types::{TaskKey, TaskSource};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tally_events::types::EventSource;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct CallLog(Mutex<Vec<String>>);

    impl CallLog {
        fn push(&self, call: impl Into<String>) {
            self.0.lock().unwrap().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    #[derive(Default)]
    struct MockIssues {
        log: Arc<CallLog>,
        fail_comment: bool,
        fail_close_once: AtomicBool,
    }

    #[async_trait]
    impl IssueTrackerGateway for MockIssues {
        async fn comment_on_issue(&self, issue: &IssueRef, body: &str) -> Result<(), ProviderError> {
            self.log
                .push(format!("comment {}#{} {body}", issue.repo, issue.number));
            if self.fail_comment {
                return Err(ProviderError::Request {
                    provider: TaskSource::IssueTracker,
                    message: "500".to_string(),
                });
            }
            Ok(())
        }

        async fn close_issue(&self, issue: &IssueRef) -> Result<(), ProviderError> {
            self.log.push(format!("close {}#{}", issue.repo, issue.number));
            if self.fail_close_once.swap(false, Ordering::SeqCst) {
                return Err(ProviderError::Request {
                    provider: TaskSource::IssueTracker,
                    message: "502".to_string(),
                });
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockTodos {
        log: Arc<CallLog>,
        fail_delete_once: AtomicBool,
    }

    #[async_trait]
    impl TodoListGateway for MockTodos {
        async fn get_task(&self, list_id: &str, task_id: &str) -> Result<TodoItem, ProviderError> {
            self.log.push(format!("get {list_id}/{task_id}"));
            Ok(TodoItem {
                id: task_id.to_string(),
                title: "Buy milk".to_string(),
                status: Some("needsAction".to_string()),
                ..TodoItem::default()
            })
        }

        async fn insert_task(&self, list_id: &str, item: &TodoItem) -> Result<TodoItem, ProviderError> {
            self.log.push(format!("insert {list_id} {}", item.title));
            Ok(TodoItem {
                id: "new-id".to_string(),
                ..item.clone()
            })
        }

        async fn delete_task(&self, list_id: &str, task_id: &str) -> Result<(), ProviderError> {
            self.log.push(format!("delete {list_id}/{task_id}"));
            if self.fail_delete_once.swap(false, Ordering::SeqCst) {
                return Err(ProviderError::Request {
                    provider: TaskSource::TodoList,
                    message: "timeout".to_string(),
                });
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockBoards {
        log: Arc<CallLog>,
        fail_comment: bool,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl BoardGateway for MockBoards {
        async fn move_card(&self, card_id: &str, list_id: &str) -> Result<(), ProviderError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.log.push(format!("move {card_id} {list_id}"));
            Ok(())
        }

        async fn comment_on_card(&self, card_id: &str, text: &str) -> Result<(), ProviderError> {
            self.log.push(format!("comment {card_id} {text}"));
            if self.fail_comment {
                return Err(ProviderError::Rejected {
                    provider: TaskSource::Board,
                    message: "forbidden".to_string(),
                });
            }
            Ok(())
        }
    }

    struct FailingStore {
        fail: AtomicBool,
        inner: MemoryCompletionStore,
    }

    impl CompletionStore for FailingStore {
        fn get_all(&self) -> Result<Vec<CompletedSnapshot>, StoreError> {
            self.inner.get_all()
        }

        fn upsert_at(
            &self,
            snapshot: CompletedSnapshot,
            now: DateTime<Utc>,
        ) -> Result<CompletedSnapshot, StoreError> {
            if self.fail.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Backend {
                    message: "disk full".to_string(),
                });
            }
            self.inner.upsert_at(snapshot, now)
        }

        fn prune(
            &self,
            policy: &dyn RetentionPolicy,
            now: DateTime<Utc>,
        ) -> Result<usize, StoreError> {
            self.inner.prune(policy, now)
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new(EventSource::Cli, Some("test".to_string()))
    }

    fn orchestrator<S: CompletionStore>(
        store: S,
        gateways: ProviderGateways,
    ) -> CompletionOrchestrator<S> {
        CompletionOrchestrator::new(
            Arc::new(store),
            gateways,
            CompletionConfig::default(),
            EventBus::new(64),
        )
    }

    fn issue_task() -> TaskRecord {
        TaskRecord::new(TaskSource::IssueTracker)
            .with_id("github-100")
            .with_title("Fix login bug")
            .with_provider(ProviderFields::IssueTracker {
                issue_id: None,
                repo: Some("my-org/app".to_string()),
                issue_number: Some(42),
            })
    }

    fn todo_task(container: &str) -> TaskRecord {
        let mut task = TaskRecord::new(TaskSource::TodoList)
            .with_id("google-old-id")
            .with_title("Buy milk")
            .with_provider(ProviderFields::TodoList {
                task_id: Some("old-id".to_string()),
                list_id: Some(container.to_string()),
            });
        task.container_id = Some(container.to_string());
        task.container_options = vec![
            ContainerOption {
                id: "inbox".to_string(),
                name: "Inbox".to_string(),
            },
            ContainerOption {
                id: "done-list".to_string(),
                name: "Completed tasks".to_string(),
            },
        ];
        task
    }

    fn card_task() -> TaskRecord {
        let mut task = TaskRecord::new(TaskSource::Board)
            .with_id("trello-card-1")
            .with_title("Plan launch")
            .with_provider(ProviderFields::Board {
                card_id: Some("card-1".to_string()),
                list_id: Some("list-doing".to_string()),
            });
        task.container_id = Some("list-doing".to_string());
        task.container_name = Some("Doing".to_string());
        task.container_options = vec![
            ContainerOption {
                id: "list-doing".to_string(),
                name: "Doing".to_string(),
            },
            ContainerOption {
                id: "list-done".to_string(),
                name: "Completed".to_string(),
            },
        ];
        task
    }

    #[tokio::test]
    async fn test_issue_completion_comments_closes_and_persists() {
        let log = Arc::new(CallLog::default());
        let gateways = ProviderGateways {
            issues: Some(Arc::new(MockIssues {
                log: log.clone(),
                ..MockIssues::default()
            })),
            ..ProviderGateways::default()
        };
        let orchestrator = orchestrator(MemoryCompletionStore::new(), gateways);

        let mut attempt = orchestrator.begin(&ctx(), issue_task()).unwrap();
        let record = orchestrator
            .confirm(&ctx(), &mut attempt, "Fixed in v2")
            .await
            .unwrap();

        assert_eq!(
            log.calls(),
            vec!["comment my-org/app#42 Fixed in v2", "close my-org/app#42"]
        );
        assert_eq!(attempt.state(), &CompletionState::Done);
        assert!(record.locally_completed);
        assert_eq!(record.id.as_deref(), Some("github-100"));
        assert_eq!(record.notes.as_deref(), Some("Fixed in v2"));
        assert_eq!(record.status.as_deref(), Some("closed"));

        let stored = orchestrator.store().get_all().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].original_id, "my-org/app#42");
    }

    #[tokio::test]
    async fn test_failed_issue_comment_never_closes() {
        let log = Arc::new(CallLog::default());
        let gateways = ProviderGateways {
            issues: Some(Arc::new(MockIssues {
                log: log.clone(),
                fail_comment: true,
                ..MockIssues::default()
            })),
            ..ProviderGateways::default()
        };
        let orchestrator = orchestrator(MemoryCompletionStore::new(), gateways);

        let mut attempt = orchestrator.begin(&ctx(), issue_task()).unwrap();
        let err = orchestrator
            .confirm(&ctx(), &mut attempt, "note")
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Step { ref step, .. } if step == "comment_on_issue"));
        assert_eq!(log.calls(), vec!["comment my-org/app#42 note"]);
        assert_eq!(attempt.state(), &CompletionState::Confirming);
        assert!(attempt.last_error().is_some());
        assert!(orchestrator.store().get_all().unwrap().is_empty());
        assert!(
            attempt
                .history()
                .iter()
                .any(|state| matches!(state, CompletionState::Failed { .. }))
        );
    }

    fn flaky_close(log: &Arc<CallLog>) -> ProviderGateways {
        ProviderGateways {
            issues: Some(Arc::new(MockIssues {
                log: log.clone(),
                fail_close_once: AtomicBool::new(true),
                ..MockIssues::default()
            })),
            ..ProviderGateways::default()
        }
    }

    #[tokio::test]
    async fn test_retry_with_new_note_posts_it_before_closing() {
        let log = Arc::new(CallLog::default());
        let orchestrator = orchestrator(MemoryCompletionStore::new(), flaky_close(&log));
        let mut attempt = orchestrator.begin(&ctx(), issue_task()).unwrap();

        let err = orchestrator
            .confirm(&ctx(), &mut attempt, "")
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Step { ref step, .. } if step == "close_issue"));

        let record = orchestrator
            .confirm(&ctx(), &mut attempt, "shipped")
            .await
            .unwrap();

        assert_eq!(
            log.calls(),
            vec![
                "close my-org/app#42",
                "comment my-org/app#42 shipped",
                "close my-org/app#42",
            ]
        );
        assert_eq!(record.notes.as_deref(), Some("shipped"));
    }

    #[tokio::test]
    async fn test_retry_keeps_the_note_already_posted() {
        let log = Arc::new(CallLog::default());
        let orchestrator = orchestrator(MemoryCompletionStore::new(), flaky_close(&log));
        let mut attempt = orchestrator.begin(&ctx(), issue_task()).unwrap();

        orchestrator
            .confirm(&ctx(), &mut attempt, "first")
            .await
            .unwrap_err();
        let record = orchestrator
            .confirm(&ctx(), &mut attempt, "second")
            .await
            .unwrap();

        assert_eq!(
            log.calls(),
            vec![
                "comment my-org/app#42 first",
                "close my-org/app#42",
                "close my-org/app#42",
            ]
        );
        assert_eq!(attempt.note(), "first");
        assert_eq!(record.notes.as_deref(), Some("first"));
        assert_eq!(orchestrator.store().get_all().unwrap()[0].notes.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_todo_already_completed_makes_no_remote_call() {
        let log = Arc::new(CallLog::default());
        let gateways = ProviderGateways {
            todos: Some(Arc::new(MockTodos {
                log: log.clone(),
                ..MockTodos::default()
            })),
            ..ProviderGateways::default()
        };
        let orchestrator = orchestrator(MemoryCompletionStore::new(), gateways);

        let mut attempt = orchestrator.begin(&ctx(), todo_task("done-list")).unwrap();
        let record = orchestrator.confirm(&ctx(), &mut attempt, "").await.unwrap();

        assert!(log.calls().is_empty());
        assert_eq!(record.container_name.as_deref(), Some("Completed tasks"));
        assert_eq!(record.id.as_deref(), Some("google-old-id"));
        assert!(attempt.rotation().is_none());
    }

    #[tokio::test]
    async fn test_todo_move_rotates_identity_and_resumes_after_delete_failure() {
        let log = Arc::new(CallLog::default());
        let todos = MockTodos {
            log: log.clone(),
            fail_delete_once: AtomicBool::new(true),
        };
        let gateways = ProviderGateways {
            todos: Some(Arc::new(todos)),
            ..ProviderGateways::default()
        };
        let orchestrator = orchestrator(MemoryCompletionStore::new(), gateways);
        let mut attempt = orchestrator.begin(&ctx(), todo_task("inbox")).unwrap();

        let err = orchestrator
            .confirm(&ctx(), &mut attempt, "")
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Step { ref step, .. } if step == "delete_todo"));
        assert_eq!(attempt.completed_steps(), &[CompletionStep::CopyTodo]);

        let record = orchestrator.confirm(&ctx(), &mut attempt, "").await.unwrap();

        assert_eq!(
            log.calls(),
            vec![
                "get inbox/old-id",
                "insert done-list Buy milk",
                "delete inbox/old-id",
                "delete inbox/old-id",
            ]
        );
        let rotation = attempt.rotation().unwrap();
        assert_eq!(rotation.from_key, TaskKey::new(&TaskSource::TodoList, "old-id"));
        assert_eq!(rotation.to_key, TaskKey::new(&TaskSource::TodoList, "new-id"));
        assert_eq!(rotation.from_id.as_deref(), Some("google-old-id"));
        assert_eq!(rotation.to_id, "google-new-id");
        assert_eq!(record.id.as_deref(), Some("google-new-id"));
        assert_eq!(record.previous_id.as_deref(), Some("google-old-id"));

        let stored = orchestrator.store().get_all().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].original_id, "new-id");
        assert_eq!(stored[0].previous_original_id.as_deref(), Some("old-id"));

        let merged = merge(vec![todo_task("inbox")], &stored);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id.as_deref(), Some("google-new-id"));
        assert!(merged[0].locally_completed);
    }

    #[tokio::test]
    async fn test_card_comment_failure_keeps_the_move() {
        let log = Arc::new(CallLog::default());
        let gateways = ProviderGateways {
            boards: Some(Arc::new(MockBoards {
                log: log.clone(),
                fail_comment: true,
                gate: None,
            })),
            ..ProviderGateways::default()
        };
        let orchestrator = orchestrator(MemoryCompletionStore::new(), gateways);
        let mut attempt = orchestrator.begin(&ctx(), card_task()).unwrap();

        let err = orchestrator
            .confirm(&ctx(), &mut attempt, "Shipped")
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Step { ref step, .. } if step == "comment_on_card"));
        assert_eq!(
            log.calls(),
            vec!["move card-1 list-done", "comment card-1 Shipped"]
        );
        assert_eq!(attempt.completed_steps(), &[CompletionStep::MoveCard]);
    }

    #[tokio::test]
    async fn test_missing_gateway_is_a_configuration_error() {
        let orchestrator = orchestrator(MemoryCompletionStore::new(), ProviderGateways::default());
        let mut attempt = orchestrator.begin(&ctx(), card_task()).unwrap();
        let err = orchestrator
            .confirm(&ctx(), &mut attempt, "")
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_persist_failure_retries_only_persistence() {
        let log = Arc::new(CallLog::default());
        let gateways = ProviderGateways {
            boards: Some(Arc::new(MockBoards {
                log: log.clone(),
                ..MockBoards::default()
            })),
            ..ProviderGateways::default()
        };
        let store = FailingStore {
            fail: AtomicBool::new(true),
            inner: MemoryCompletionStore::new(),
        };
        let orchestrator = orchestrator(store, gateways);
        let mut attempt = orchestrator.begin(&ctx(), card_task()).unwrap();

        let err = orchestrator
            .confirm(&ctx(), &mut attempt, "")
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Persist { .. }));

        let record = orchestrator.confirm(&ctx(), &mut attempt, "").await.unwrap();
        assert_eq!(log.calls(), vec!["move card-1 list-done"]);
        assert_eq!(record.container_name.as_deref(), Some("Completed"));
        assert_eq!(orchestrator.store().get_all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_local_sources_complete_without_gateways() {
        let orchestrator = orchestrator(MemoryCompletionStore::new(), ProviderGateways::default());
        let mut task = TaskRecord::new(TaskSource::ActionItems).with_id("fellow-a1");
        task.title = Some("Send recap".to_string());

        let mut attempt = orchestrator.begin(&ctx(), task).unwrap();
        let record = orchestrator.confirm(&ctx(), &mut attempt, "sent").await.unwrap();

        assert!(record.locally_completed);
        assert_eq!(record.status.as_deref(), Some("Completed locally"));
        assert_eq!(record.notes.as_deref(), Some("sent"));
        assert_eq!(orchestrator.store().get_all().unwrap()[0].original_id, "a1");
    }

    #[tokio::test]
    async fn test_board_backed_action_item_moves_its_card() {
        let log = Arc::new(CallLog::default());
        let gateways = ProviderGateways {
            boards: Some(Arc::new(MockBoards {
                log: log.clone(),
                ..MockBoards::default()
            })),
            ..ProviderGateways::default()
        };
        let orchestrator = orchestrator(MemoryCompletionStore::new(), gateways);
        let mut task = card_task();
        task.source = TaskSource::ActionItems;

        let mut attempt = orchestrator.begin(&ctx(), task).unwrap();
        let record = orchestrator
            .confirm(&ctx(), &mut attempt, "followed up")
            .await
            .unwrap();

        assert_eq!(
            log.calls(),
            vec!["move card-1 list-done", "comment card-1 followed up"]
        );
        assert_eq!(record.container_name.as_deref(), Some("Completed"));
        assert_eq!(record.source, TaskSource::ActionItems);
    }

    #[tokio::test]
    async fn test_unresolvable_task_cannot_begin() {
        let orchestrator = orchestrator(MemoryCompletionStore::new(), ProviderGateways::default());
        let err = orchestrator
            .begin(&ctx(), TaskRecord::new(TaskSource::Board))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Unresolvable));
    }

    #[tokio::test]
    async fn test_cancel_returns_to_idle_and_blocks_confirm() {
        let orchestrator = orchestrator(MemoryCompletionStore::new(), ProviderGateways::default());
        let mut attempt = orchestrator.begin(&ctx(), card_task()).unwrap();
        orchestrator.cancel(&ctx(), &mut attempt).unwrap();
        assert_eq!(attempt.state(), &CompletionState::Idle);

        let err = orchestrator
            .confirm(&ctx(), &mut attempt, "")
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_attempt_on_same_key_is_rejected() {
        let gate = Arc::new(Notify::new());
        let log = Arc::new(CallLog::default());
        let gateways = ProviderGateways {
            boards: Some(Arc::new(MockBoards {
                log: log.clone(),
                fail_comment: false,
                gate: Some(gate.clone()),
            })),
            ..ProviderGateways::default()
        };
        let orchestrator = Arc::new(orchestrator(MemoryCompletionStore::new(), gateways));

        let first = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                let mut attempt = orchestrator.begin(&ctx(), card_task()).unwrap();
                orchestrator.confirm(&ctx(), &mut attempt, "").await
            })
        };
        let key = TaskKey::new(&TaskSource::Board, "card-1");
        while !orchestrator.in_flight().contains(&key) {
            tokio::task::yield_now().await;
        }

        let mut second = orchestrator.begin(&ctx(), card_task()).unwrap();
        let err = orchestrator
            .confirm(&ctx(), &mut second, "")
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::AlreadyInFlight { .. }));
        assert_eq!(second.state(), &CompletionState::Confirming);

        gate.notify_one();
        first.await.unwrap().unwrap();
        assert_eq!(log.calls(), vec!["move card-1 list-done"]);
    }

    #[tokio::test]
    async fn test_state_changes_are_published() {
        let orchestrator = orchestrator(MemoryCompletionStore::new(), ProviderGateways::default());
        let mut events = orchestrator.event_bus.subscribe();
        let task = TaskRecord::new(TaskSource::Other("Notes".to_string())).with_id("n-1");

        let mut attempt = orchestrator.begin(&ctx(), task).unwrap();
        orchestrator.confirm(&ctx(), &mut attempt, "").await.unwrap();

        let mut types = Vec::new();
        while let Ok(event) = events.try_recv() {
            assert_eq!(event.correlation_id.as_deref(), Some("test"));
            types.push(event.body["type"].as_str().unwrap().to_string());
        }
        assert_eq!(
            types,
            vec![
                "CompletionStateChanged",
                "CompletionStateChanged",
                "CompletionStepApplied",
                "CompletionStateChanged",
                "SnapshotUpserted",
                "CompletionStateChanged",
            ]
        );
    }
}
