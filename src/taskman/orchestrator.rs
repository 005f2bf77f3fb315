//! Asynchronous stage-based task execution
//!
//! Submission returns a handle immediately; a pool of workers pulls tasks
//! off a queue and drives them through the stage contract. Completion is
//! observed via [`TaskOrchestrator::await_terminal`] or status polling,
//! never through the scheduling call. The orchestrator never retries a
//! task; re-attempts are new tasks issued by callers.

use crate::audit::{actions, AuditSink};
use crate::error::{StratusError, StratusResult};
use crate::lifecycle::StatusWriter;
use crate::model::STATUS_UNKNOWN;
use crate::taskman::registry::TaskKindRegistry;
use crate::taskman::task::{Task, TaskState, TaskStore, STAGE_INIT};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Handle to a scheduled or schedulable task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle {
    id: Uuid,
}

impl TaskHandle {
    /// Task id this handle refers to
    pub fn id(&self) -> Uuid {
        self.id
    }
}

struct Inner {
    registry: TaskKindRegistry,
    store: TaskStore,
    status: Arc<dyn StatusWriter>,
    audit: Arc<dyn AuditSink>,
    tx: mpsc::UnboundedSender<Uuid>,
}

/// Owns task records for the duration of their runs and the worker pool
/// executing them
#[derive(Clone)]
pub struct TaskOrchestrator {
    inner: Arc<Inner>,
}

impl TaskOrchestrator {
    /// Start the orchestrator with `workers` queue consumers
    pub fn start(
        registry: TaskKindRegistry,
        status: Arc<dyn StatusWriter>,
        audit: Arc<dyn AuditSink>,
        workers: usize,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            registry,
            store: TaskStore::new(),
            status,
            audit,
            tx,
        });

        let rx = Arc::new(Mutex::new(rx));
        for _ in 0..workers.max(1) {
            let inner = Arc::clone(&inner);
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                loop {
                    let id = { rx.lock().await.recv().await };
                    match id {
                        Some(id) => run_task(&inner, id).await,
                        None => break,
                    }
                }
            });
        }

        Self { inner }
    }

    /// Construct a single-target task
    ///
    /// Fails fast with `UnknownTaskKind` for unregistered kinds and
    /// `Validation` for an empty target.
    pub fn new_task(
        &self,
        kind: &str,
        target_id: &str,
        params: serde_json::Value,
        parent_id: Option<Uuid>,
    ) -> StratusResult<TaskHandle> {
        if target_id.is_empty() {
            return Err(StratusError::Validation(
                "task requires a target entity".to_string(),
            ));
        }
        if !self.inner.registry.contains(kind) {
            return Err(StratusError::UnknownTaskKind(kind.to_string()));
        }

        let task = Task::new(kind, vec![target_id.to_string()], params, parent_id);
        let handle = TaskHandle { id: task.id };
        self.inner.store.insert(task);
        Ok(handle)
    }

    /// Construct a parallel task: one child per target, sharing a tracked
    /// parent identity for progress aggregation
    pub fn new_parallel_task(
        &self,
        kind: &str,
        target_ids: &[String],
        params: serde_json::Value,
        parent_id: Option<Uuid>,
    ) -> StratusResult<TaskHandle> {
        if target_ids.is_empty() {
            return Err(StratusError::Validation(
                "parallel task requires at least one target".to_string(),
            ));
        }
        if !self.inner.registry.contains(kind) {
            return Err(StratusError::UnknownTaskKind(kind.to_string()));
        }

        // One child per distinct target; a repeated target would leave
        // the parent waiting for a child that never runs.
        let mut targets: Vec<String> = Vec::with_capacity(target_ids.len());
        for target in target_ids {
            if !targets.contains(target) {
                targets.push(target.clone());
            }
        }

        let mut parent = Task::new(kind, targets.clone(), params.clone(), parent_id);
        parent.children_total = targets.len();
        let handle = TaskHandle { id: parent.id };

        let children: Vec<Task> = targets
            .iter()
            .map(|target| Task::new(kind, vec![target.clone()], params.clone(), Some(parent.id)))
            .collect();

        self.inner.store.insert(parent);
        for child in children {
            self.inner.store.insert(child);
        }
        Ok(handle)
    }

    /// Enqueue a task for execution; returns without waiting
    ///
    /// A parallel handle enqueues every child; the parent's state is
    /// driven by child aggregation.
    pub fn schedule_run(&self, handle: TaskHandle) -> StratusResult<()> {
        let task = self
            .inner
            .store
            .get(handle.id)
            .ok_or_else(|| StratusError::not_found("task", handle.id.to_string()))?;

        if task.children_total > 0 {
            let children = self.children_of(handle.id);
            for child in children {
                self.enqueue(child)?;
            }
        } else {
            self.enqueue(handle.id)?;
        }
        Ok(())
    }

    /// Snapshot of a task's current record
    pub fn task(&self, id: Uuid) -> Option<Task> {
        self.inner.store.get(id)
    }

    /// Wait for a task (or parallel parent) to reach a terminal state
    pub async fn await_terminal(&self, handle: TaskHandle) -> StratusResult<Task> {
        self.inner
            .store
            .await_terminal(handle.id)
            .await
            .ok_or_else(|| StratusError::not_found("task", handle.id.to_string()))
    }

    /// Drop finished task records; returns how many were removed
    pub fn prune_finished(&self) -> usize {
        self.inner.store.prune_finished()
    }

    fn enqueue(&self, id: Uuid) -> StratusResult<()> {
        self.inner
            .tx
            .send(id)
            .map_err(|_| StratusError::QueueClosed(id.to_string()))
    }

    fn children_of(&self, parent_id: Uuid) -> Vec<Uuid> {
        // Children are created together with the parent; collect their
        // ids from the parent's target list order via the store snapshot.
        let mut out = Vec::new();
        if let Some(parent) = self.inner.store.get(parent_id) {
            for target in &parent.target_ids {
                if let Some(child) = self.find_child(parent_id, target) {
                    out.push(child);
                }
            }
        }
        out
    }

    fn find_child(&self, parent_id: Uuid, target: &str) -> Option<Uuid> {
        self.inner.store.find_child(parent_id, target)
    }
}

/// Execution context handed to task-kind callbacks
///
/// Cheap to clone; all stage transitions funnel through the shared store
/// so the terminal guard holds across stages and workers.
#[derive(Clone)]
pub struct TaskContext {
    inner: Arc<Inner>,
    task_id: Uuid,
}

impl TaskContext {
    /// Id of the running task
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// Target entity ids
    pub fn targets(&self) -> Vec<String> {
        self.inner
            .store
            .get(self.task_id)
            .map(|t| t.target_ids)
            .unwrap_or_default()
    }

    /// Parameter payload
    pub fn params(&self) -> serde_json::Value {
        self.inner
            .store
            .get(self.task_id)
            .map(|t| t.params)
            .unwrap_or(serde_json::Value::Null)
    }

    /// Chain an additional internal stage
    ///
    /// The stage callback runs later on a worker; ignored (with a
    /// warning) once the task is terminal.
    pub async fn set_stage(&self, stage: &str) {
        if !self.inner.store.set_stage(self.task_id, stage) {
            warn!(task = %self.task_id, stage, "stage chain ignored: task already terminal");
            return;
        }
        if self.inner.tx.send(self.task_id).is_err() {
            error!(task = %self.task_id, "task queue closed, chained stage dropped");
        }
    }

    /// Reach the COMPLETE terminal state
    ///
    /// No effect if a terminal state was already set.
    pub async fn set_stage_complete(&self, detail: serde_json::Value) {
        if !self
            .inner
            .store
            .try_finish(self.task_id, TaskState::Complete, None)
        {
            warn!(task = %self.task_id, "set_stage_complete after terminal state ignored");
            return;
        }
        debug!(task = %self.task_id, "task complete");
        self.inner
            .audit
            .record(
                &format!("task/{}", self.task_id),
                actions::TASK_COMPLETE,
                detail,
                "taskman",
            )
            .await;
        self.report_to_parent(false).await;
    }

    /// Reach the FAILED terminal state
    ///
    /// Persists the failure message, flips each target's status to the
    /// unknown marker, and records an audit event. No effect if a
    /// terminal state was already set.
    pub async fn set_stage_failed(&self, message: impl Into<String>) {
        let message = message.into();
        if !self
            .inner
            .store
            .try_finish(self.task_id, TaskState::Failed, Some(message.clone()))
        {
            warn!(task = %self.task_id, "set_stage_failed after terminal state ignored");
            return;
        }

        let task = self.inner.store.get(self.task_id);
        let targets = task.map(|t| t.target_ids).unwrap_or_default();
        error!(task = %self.task_id, %message, "task failed");

        for target in &targets {
            if let Err(e) = self
                .inner
                .status
                .set_status(target, STATUS_UNKNOWN, &message)
                .await
            {
                warn!(task = %self.task_id, target, "could not flag target status: {e}");
            }
        }

        self.inner
            .audit
            .record(
                &format!("task/{}", self.task_id),
                actions::TASK_FAILED,
                serde_json::json!({"message": message, "targets": targets}),
                "taskman",
            )
            .await;
        self.report_to_parent(true).await;
    }

    async fn report_to_parent(&self, failed: bool) {
        let parent_id = self
            .inner
            .store
            .get(self.task_id)
            .and_then(|t| t.parent_id);
        let Some(parent_id) = parent_id else { return };

        if let Some(parent) = self.inner.store.record_child_outcome(parent_id, failed) {
            let action = match parent.state {
                TaskState::Failed => actions::TASK_FAILED,
                _ => actions::TASK_COMPLETE,
            };
            self.inner
                .audit
                .record(
                    &format!("task/{parent_id}"),
                    action,
                    serde_json::json!({
                        "children_complete": parent.children_complete,
                        "children_failed": parent.children_failed,
                        "partial_failure": parent.partial_failure,
                    }),
                    "taskman",
                )
                .await;
        }
    }
}

async fn run_task(inner: &Arc<Inner>, id: Uuid) {
    let Some(task) = inner.store.get(id) else {
        warn!(task = %id, "queued task no longer exists");
        return;
    };

    // Terminal guard: a callback queued before the task finished is
    // skipped, never executed.
    if task.state.is_terminal() {
        debug!(task = %id, "skipping queued callback for terminal task");
        return;
    }

    let kind = match inner.registry.get(&task.kind) {
        Ok(kind) => kind,
        // Construction validates kinds; losing one mid-flight is a bug.
        Err(e) => {
            error!(task = %id, "task kind vanished from registry: {e}");
            inner.store.try_finish(id, TaskState::Failed, Some(e.to_string()));
            return;
        }
    };

    inner.store.set_running(id);
    let ctx = TaskContext {
        inner: Arc::clone(inner),
        task_id: id,
    };

    if task.stage == STAGE_INIT {
        kind.on_init(ctx).await;
    } else {
        kind.on_stage(ctx, &task.stage).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::NullSink;
    use crate::taskman::registry::TaskKind;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Records status writes instead of touching a repository
    struct RecordingStatus {
        writes: StdMutex<Vec<(String, String, String)>>,
    }

    impl RecordingStatus {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                writes: StdMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl StatusWriter for RecordingStatus {
        async fn set_status(
            &self,
            target_id: &str,
            status: &str,
            reason: &str,
        ) -> StratusResult<()> {
            self.writes.lock().unwrap().push((
                target_id.to_string(),
                status.to_string(),
                reason.to_string(),
            ));
            Ok(())
        }
    }

    struct Succeed;

    #[async_trait]
    impl TaskKind for Succeed {
        async fn on_init(&self, ctx: TaskContext) {
            ctx.set_stage_complete(serde_json::Value::Null).await;
        }
    }

    struct Fail;

    #[async_trait]
    impl TaskKind for Fail {
        async fn on_init(&self, ctx: TaskContext) {
            ctx.set_stage_failed("simulated failure").await;
        }
    }

    struct TwoStage;

    #[async_trait]
    impl TaskKind for TwoStage {
        async fn on_init(&self, ctx: TaskContext) {
            ctx.set_stage("finalize").await;
        }

        async fn on_stage(&self, ctx: TaskContext, stage: &str) {
            match stage {
                "finalize" => ctx.set_stage_complete(serde_json::json!({"stage": stage})).await,
                other => ctx.set_stage_failed(format!("unexpected stage {other}")).await,
            }
        }
    }

    /// Fails every odd-numbered target so parallel aggregation is mixed
    struct FailOdd;

    #[async_trait]
    impl TaskKind for FailOdd {
        async fn on_init(&self, ctx: TaskContext) {
            let target = ctx.targets().remove(0);
            if target.ends_with('1') || target.ends_with('3') {
                ctx.set_stage_failed(format!("{target} failed")).await;
            } else {
                ctx.set_stage_complete(serde_json::Value::Null).await;
            }
        }
    }

    fn orchestrator(status: Arc<dyn StatusWriter>) -> TaskOrchestrator {
        let mut registry = TaskKindRegistry::new();
        registry.register("succeed", Arc::new(Succeed));
        registry.register("fail", Arc::new(Fail));
        registry.register("two-stage", Arc::new(TwoStage));
        registry.register("fail-odd", Arc::new(FailOdd));
        TaskOrchestrator::start(registry, status, Arc::new(NullSink), 2)
    }

    #[tokio::test]
    async fn unknown_kind_fails_construction() {
        let orch = orchestrator(RecordingStatus::new());
        let err = orch
            .new_task("bogus", "res-1", serde_json::Value::Null, None)
            .unwrap_err();
        assert!(matches!(err, StratusError::UnknownTaskKind(_)));
    }

    #[tokio::test]
    async fn empty_target_fails_construction() {
        let orch = orchestrator(RecordingStatus::new());
        assert!(matches!(
            orch.new_task("succeed", "", serde_json::Value::Null, None),
            Err(StratusError::Validation(_))
        ));
        assert!(matches!(
            orch.new_parallel_task("succeed", &[], serde_json::Value::Null, None),
            Err(StratusError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn task_runs_to_complete() {
        let orch = orchestrator(RecordingStatus::new());
        let handle = orch
            .new_task("succeed", "res-1", serde_json::Value::Null, None)
            .unwrap();

        orch.schedule_run(handle).unwrap();
        let task = orch.await_terminal(handle).await.unwrap();
        assert_eq!(task.state, TaskState::Complete);
        assert!(task.failure.is_none());
    }

    #[tokio::test]
    async fn failed_task_flags_target_status() {
        let status = RecordingStatus::new();
        let orch = orchestrator(status.clone());
        let handle = orch
            .new_task("fail", "res-9", serde_json::Value::Null, None)
            .unwrap();

        orch.schedule_run(handle).unwrap();
        let task = orch.await_terminal(handle).await.unwrap();

        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.failure.as_deref(), Some("simulated failure"));

        let writes = status.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, "res-9");
        assert_eq!(writes[0].1, STATUS_UNKNOWN);
        assert_eq!(writes[0].2, "simulated failure");
    }

    #[tokio::test]
    async fn stage_chain_reaches_terminal() {
        let orch = orchestrator(RecordingStatus::new());
        let handle = orch
            .new_task("two-stage", "res-1", serde_json::Value::Null, None)
            .unwrap();

        orch.schedule_run(handle).unwrap();
        let task = orch.await_terminal(handle).await.unwrap();
        assert_eq!(task.state, TaskState::Complete);
        assert_eq!(task.stage, "finalize");
    }

    #[tokio::test]
    async fn terminal_state_guard_holds_across_callbacks() {
        let status = RecordingStatus::new();
        let orch = orchestrator(status.clone());
        let handle = orch
            .new_task("fail", "res-1", serde_json::Value::Null, None)
            .unwrap();

        orch.schedule_run(handle).unwrap();
        let task = orch.await_terminal(handle).await.unwrap();
        assert_eq!(task.state, TaskState::Failed);

        // A late complete call must not override the terminal state
        let ctx = TaskContext {
            inner: Arc::clone(&orch.inner),
            task_id: handle.id(),
        };
        ctx.set_stage_complete(serde_json::Value::Null).await;

        let task = orch.task(handle.id()).unwrap();
        assert_eq!(task.state, TaskState::Failed);
        // And no duplicate status write happened
        assert_eq!(status.writes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn parallel_all_succeed() {
        let orch = orchestrator(RecordingStatus::new());
        let targets = vec!["res-0".to_string(), "res-2".to_string()];
        let handle = orch
            .new_parallel_task("succeed", &targets, serde_json::Value::Null, None)
            .unwrap();

        orch.schedule_run(handle).unwrap();
        let parent = orch.await_terminal(handle).await.unwrap();

        assert_eq!(parent.state, TaskState::Complete);
        assert!(!parent.partial_failure);
        assert_eq!(parent.children_complete, 2);
    }

    #[tokio::test]
    async fn parallel_duplicate_targets_collapse() {
        let orch = orchestrator(RecordingStatus::new());
        let targets = vec![
            "res-0".to_string(),
            "res-0".to_string(),
            "res-2".to_string(),
        ];
        let handle = orch
            .new_parallel_task("succeed", &targets, serde_json::Value::Null, None)
            .unwrap();

        orch.schedule_run(handle).unwrap();
        let parent = orch.await_terminal(handle).await.unwrap();

        assert_eq!(parent.state, TaskState::Complete);
        assert_eq!(parent.children_total, 2);
        assert_eq!(parent.children_complete, 2);
    }

    #[tokio::test]
    async fn parallel_mixed_outcome_is_partial_failure() {
        let orch = orchestrator(RecordingStatus::new());
        let targets = vec!["res-0".to_string(), "res-1".to_string(), "res-2".to_string()];
        let handle = orch
            .new_parallel_task("fail-odd", &targets, serde_json::Value::Null, None)
            .unwrap();

        orch.schedule_run(handle).unwrap();
        let parent = orch.await_terminal(handle).await.unwrap();

        assert_eq!(parent.state, TaskState::Complete);
        assert!(parent.partial_failure);
        assert_eq!(parent.children_failed, 1);
        assert_eq!(parent.children_complete, 2);
    }

    #[tokio::test]
    async fn parallel_all_fail_fails_parent() {
        let orch = orchestrator(RecordingStatus::new());
        let targets = vec!["res-1".to_string(), "res-3".to_string()];
        let handle = orch
            .new_parallel_task("fail-odd", &targets, serde_json::Value::Null, None)
            .unwrap();

        orch.schedule_run(handle).unwrap();
        let parent = orch.await_terminal(handle).await.unwrap();

        assert_eq!(parent.state, TaskState::Failed);
        assert!(parent.failure.unwrap().contains("2 child tasks failed"));
    }
}
