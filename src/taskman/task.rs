//! Task records and the in-memory task table

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

/// Stage the worker dispatches first
pub const STAGE_INIT: &str = "on_init";

/// Task lifecycle state; transitions are monotonic and the terminal
/// states are final
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Init,
    Running,
    Complete,
    Failed,
}

impl TaskState {
    /// Terminal states accept no further stage callbacks
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Complete | TaskState::Failed)
    }
}

/// An asynchronous unit of work
///
/// The orchestrator owns the task for the duration of its run; the
/// targeted entities are referenced by id only, never owned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task id
    pub id: Uuid,

    /// Symbolic task-kind name, resolved through the registry
    pub kind: String,

    /// Ids of the entities this task operates on
    pub target_ids: Vec<String>,

    /// Parameter payload
    pub params: serde_json::Value,

    /// Optional parent for chaining and parallel aggregation
    pub parent_id: Option<Uuid>,

    /// Current internal stage
    pub stage: String,

    /// Lifecycle state
    pub state: TaskState,

    /// Failure message once Failed
    pub failure: Option<String>,

    /// Parallel aggregation: number of children (0 for plain tasks)
    pub children_total: usize,

    /// Children that reached Complete
    pub children_complete: usize,

    /// Children that reached Failed
    pub children_failed: usize,

    /// Parent completed but at least one child failed
    pub partial_failure: bool,

    /// When the task was created
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a fresh task in INIT state
    pub fn new(
        kind: impl Into<String>,
        target_ids: Vec<String>,
        params: serde_json::Value,
        parent_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            target_ids,
            params,
            parent_id,
            stage: STAGE_INIT.to_string(),
            state: TaskState::Init,
            failure: None,
            children_total: 0,
            children_complete: 0,
            children_failed: 0,
            partial_failure: false,
            created_at: Utc::now(),
        }
    }
}

/// In-memory task table with the terminal-state guard and parallel
/// aggregation
///
/// All transitions happen under one mutex so the guard is race-free;
/// `Notify` wakes observers waiting for terminal outcomes.
pub struct TaskStore {
    tasks: Mutex<HashMap<Uuid, Task>>,
    changed: Notify,
}

impl TaskStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            changed: Notify::new(),
        }
    }

    /// Insert a freshly built task
    pub fn insert(&self, task: Task) {
        self.tasks
            .lock()
            .expect("task store poisoned")
            .insert(task.id, task);
    }

    /// Fetch a snapshot of a task
    pub fn get(&self, id: Uuid) -> Option<Task> {
        self.tasks.lock().expect("task store poisoned").get(&id).cloned()
    }

    /// Move a task from INIT to RUNNING; no-op for any other state
    pub fn set_running(&self, id: Uuid) {
        let mut tasks = self.tasks.lock().expect("task store poisoned");
        if let Some(task) = tasks.get_mut(&id) {
            if task.state == TaskState::Init {
                task.state = TaskState::Running;
            }
        }
    }

    /// Record the next internal stage; refused once terminal
    pub fn set_stage(&self, id: Uuid, stage: &str) -> bool {
        let mut tasks = self.tasks.lock().expect("task store poisoned");
        match tasks.get_mut(&id) {
            Some(task) if !task.state.is_terminal() => {
                task.stage = stage.to_string();
                true
            }
            _ => false,
        }
    }

    /// Attempt a terminal transition
    ///
    /// Returns `false` when the task is already terminal (the idempotent
    /// guard) or unknown; the caller must then skip all side effects.
    pub fn try_finish(&self, id: Uuid, state: TaskState, failure: Option<String>) -> bool {
        debug_assert!(state.is_terminal());
        let finished = {
            let mut tasks = self.tasks.lock().expect("task store poisoned");
            match tasks.get_mut(&id) {
                Some(task) if !task.state.is_terminal() => {
                    task.state = state;
                    task.failure = failure;
                    true
                }
                _ => false,
            }
        };
        if finished {
            self.changed.notify_waiters();
        }
        finished
    }

    /// Record one child outcome on a parallel parent
    ///
    /// When the last child reports, the parent is finalized: Failed only
    /// if every child failed, Complete otherwise, with `partial_failure`
    /// set when some (but not all) children failed. Returns the finalized
    /// parent snapshot on that last report.
    pub fn record_child_outcome(&self, parent_id: Uuid, child_failed: bool) -> Option<Task> {
        let finalized = {
            let mut tasks = self.tasks.lock().expect("task store poisoned");
            let parent = tasks.get_mut(&parent_id)?;
            if parent.children_total == 0 || parent.state.is_terminal() {
                return None;
            }

            if child_failed {
                parent.children_failed += 1;
            } else {
                parent.children_complete += 1;
            }

            let done = parent.children_complete + parent.children_failed;
            if done < parent.children_total {
                return None;
            }

            if parent.children_failed == parent.children_total {
                parent.state = TaskState::Failed;
                parent.failure = Some(format!(
                    "all {} child tasks failed",
                    parent.children_total
                ));
            } else {
                parent.state = TaskState::Complete;
                parent.partial_failure = parent.children_failed > 0;
            }
            Some(parent.clone())
        };
        if finalized.is_some() {
            self.changed.notify_waiters();
        }
        finalized
    }

    /// Drop terminal tasks from the table; returns how many were removed
    ///
    /// Long-lived hosts call this periodically so finished tasks and
    /// their children do not accumulate. Waiters should observe an
    /// outcome before its task is pruned; a waiter racing a prune sees
    /// the task disappear.
    pub fn prune_finished(&self) -> usize {
        let pruned = {
            let mut tasks = self.tasks.lock().expect("task store poisoned");
            let before = tasks.len();
            tasks.retain(|_, t| !t.state.is_terminal());
            before - tasks.len()
        };
        if pruned > 0 {
            self.changed.notify_waiters();
        }
        pruned
    }

    /// Find the child of a parallel parent covering one target
    pub fn find_child(&self, parent_id: Uuid, target: &str) -> Option<Uuid> {
        let tasks = self.tasks.lock().expect("task store poisoned");
        let parent_kind = tasks.get(&parent_id).map(|p| p.kind.clone())?;
        tasks
            .values()
            .find(|t| {
                t.parent_id == Some(parent_id)
                    && t.kind == parent_kind
                    && t.children_total == 0
                    && t.target_ids.len() == 1
                    && t.target_ids[0] == target
            })
            .map(|t| t.id)
    }

    /// Wait until a task reaches a terminal state and return it
    pub async fn await_terminal(&self, id: Uuid) -> Option<Task> {
        loop {
            // `notify_waiters` only wakes registered futures, so enable
            // the waiter before the state check or a transition landing
            // in between is lost.
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            match self.get(id) {
                Some(task) if task.state.is_terminal() => return Some(task),
                Some(_) => notified.await,
                None => return None,
            }
        }
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}
