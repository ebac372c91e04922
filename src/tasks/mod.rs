//! Background Task Manager
//!
//! Tracks long-running executions so the caller can be answered right away
//! and the result delivered later. Lifecycle:
//!
//! ```text
//! PENDING ──start──> RUNNING ──finish──> COMPLETED | FAILED
//!    │                  │ └──deadline──> TIMED_OUT
//!    └────cancel────────┴──cancel──────> CANCELLED
//! ```
//!
//! Terminal states are final. Cancellation of a running task is signalled on
//! a watch channel; the execution loop observes it at its next suspension
//! point and its late result is discarded. The one exception: a task expired
//! by [`TaskManager::gc`] still accepts the partial result its loop produces
//! when it hits the same deadline.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::ProgressSink;
use crate::bus::ThreadRef;
use crate::config::TasksConfig;
use crate::error::{HeraldError, Result};

// ============================================================================
// Types
// ============================================================================

/// Lifecycle state of a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Pending | TaskState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Running => "RUNNING",
            TaskState::Completed => "COMPLETED",
            TaskState::Failed => "FAILED",
            TaskState::Cancelled => "CANCELLED",
            TaskState::TimedOut => "TIMED_OUT",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an execution produced, as reported to [`TaskManager::finish`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// Full answer.
    Success(String),
    /// Best available answer after recovery gave up. Still a completion.
    Partial(String),
    /// Nothing useful; the text explains what to try next.
    Failed(String),
    /// Deadline passed; carries whatever partial result existed.
    TimedOut(Option<String>),
    Cancelled,
}

impl TaskOutcome {
    pub fn target_state(&self) -> TaskState {
        match self {
            TaskOutcome::Success(_) | TaskOutcome::Partial(_) => TaskState::Completed,
            TaskOutcome::Failed(_) => TaskState::Failed,
            TaskOutcome::TimedOut(_) => TaskState::TimedOut,
            TaskOutcome::Cancelled => TaskState::Cancelled,
        }
    }
}

/// A tracked background execution.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    pub workspace_id: String,
    pub thread_ref: ThreadRef,
    pub trace_id: String,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub progress_text: String,
    pub result: Option<TaskOutcome>,
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatus {
    pub state: TaskState,
    pub progress_text: String,
}

/// Handed to the worker when a task starts running.
#[derive(Debug)]
pub struct TaskHandle {
    pub task_id: String,
    /// Flips to `true` when the task is cancelled. The deadline is enforced
    /// by the holder.
    pub cancel: watch::Receiver<bool>,
    pub deadline: Instant,
}

struct TaskEntry {
    task: Task,
    cancel_tx: watch::Sender<bool>,
    deadline: Option<Instant>,
    finished_at: Option<Instant>,
}

// ============================================================================
// TaskManager
// ============================================================================

/// Owns every background task's state.
pub struct TaskManager {
    tasks: Mutex<HashMap<String, TaskEntry>>,
    max_running_per_workspace: usize,
    timeout: Duration,
    retention: Duration,
}

impl TaskManager {
    pub fn new(config: &TasksConfig) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            max_running_per_workspace: config.max_running_per_workspace,
            timeout: Duration::from_secs(config.timeout_secs),
            retention: Duration::from_secs(config.retention_secs),
        }
    }

    /// Override the per-task wall-clock deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Register a new PENDING task.
    ///
    /// Fails with [`HeraldError::TaskLimit`] when the workspace already has
    /// `max_running_per_workspace` unfinished tasks.
    pub fn create(&self, workspace_id: &str, thread_ref: &ThreadRef, trace_id: &str) -> Result<String> {
        let mut tasks = self.tasks.lock().unwrap();
        let active = tasks
            .values()
            .filter(|e| e.task.workspace_id == workspace_id && !e.task.state.is_terminal())
            .count();
        if active >= self.max_running_per_workspace {
            warn!(workspace = workspace_id, active, "Task limit reached");
            return Err(HeraldError::TaskLimit {
                workspace: workspace_id.to_string(),
                limit: self.max_running_per_workspace,
            });
        }

        let id = Uuid::new_v4().to_string();
        let (cancel_tx, _) = watch::channel(false);
        let task = Task {
            id: id.clone(),
            workspace_id: workspace_id.to_string(),
            thread_ref: thread_ref.clone(),
            trace_id: trace_id.to_string(),
            state: TaskState::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            deadline: None,
            progress_text: "Queued".to_string(),
            result: None,
        };
        tasks.insert(
            id.clone(),
            TaskEntry {
                task,
                cancel_tx,
                deadline: None,
                finished_at: None,
            },
        );
        info!(task_id = %id, workspace = workspace_id, trace_id, "Task created");
        Ok(id)
    }

    /// Move a PENDING task to RUNNING and arm its deadline.
    ///
    /// Returns `None` if the task was cancelled before it started.
    pub fn start(&self, task_id: &str) -> Result<Option<TaskHandle>> {
        let mut tasks = self.tasks.lock().unwrap();
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| HeraldError::NotFound(format!("task {}", task_id)))?;
        if entry.task.state != TaskState::Pending {
            return Ok(None);
        }

        let deadline = Instant::now() + self.timeout;
        entry.task.state = TaskState::Running;
        entry.task.started_at = Some(Utc::now());
        entry.task.deadline = chrono::Duration::from_std(self.timeout)
            .ok()
            .map(|d| Utc::now() + d);
        entry.task.progress_text = "Starting".to_string();
        entry.deadline = Some(deadline);
        debug!(task_id, "Task running");

        Ok(Some(TaskHandle {
            task_id: task_id.to_string(),
            cancel: entry.cancel_tx.subscribe(),
            deadline,
        }))
    }

    /// Record human-readable progress for a RUNNING task.
    pub fn update_progress(&self, task_id: &str, text: &str) {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(entry) = tasks.get_mut(task_id) {
            if entry.task.state == TaskState::Running {
                entry.task.progress_text = text.to_string();
            }
        }
    }

    /// Move a task to its terminal state.
    ///
    /// A task that is already terminal (cancelled mid-run, or expired by
    /// [`gc`](Self::gc)) keeps its state and the outcome is discarded.
    /// Returns the state the task ends up in.
    pub fn finish(&self, task_id: &str, outcome: TaskOutcome) -> Result<TaskState> {
        let mut tasks = self.tasks.lock().unwrap();
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| HeraldError::NotFound(format!("task {}", task_id)))?;

        if entry.task.state.is_terminal() {
            let expired_without_partial = entry.task.state == TaskState::TimedOut
                && entry.task.result == Some(TaskOutcome::TimedOut(None));
            if expired_without_partial && matches!(outcome, TaskOutcome::TimedOut(Some(_))) {
                debug!(task_id, "Partial result attached to expired task");
                entry.task.result = Some(outcome);
            } else {
                debug!(task_id, state = %entry.task.state, "Late outcome discarded");
            }
            return Ok(entry.task.state);
        }

        let state = outcome.target_state();
        entry.task.state = state;
        entry.task.completed_at = Some(Utc::now());
        entry.task.progress_text = match &outcome {
            TaskOutcome::Success(_) => "Done".to_string(),
            TaskOutcome::Partial(_) => "Done (partial result)".to_string(),
            TaskOutcome::Failed(_) => "Failed".to_string(),
            TaskOutcome::TimedOut(_) => "Timed out".to_string(),
            TaskOutcome::Cancelled => "Cancelled".to_string(),
        };
        entry.task.result = Some(outcome);
        entry.finished_at = Some(Instant::now());
        info!(task_id, state = %state, "Task finished");
        Ok(state)
    }

    /// Cancel a task. Pending tasks never start; running tasks are signalled
    /// and stop at their next suspension point. Terminal tasks are unchanged.
    pub fn cancel(&self, task_id: &str) -> Result<TaskState> {
        let mut tasks = self.tasks.lock().unwrap();
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| HeraldError::NotFound(format!("task {}", task_id)))?;

        if entry.task.state.is_terminal() {
            return Ok(entry.task.state);
        }

        entry.task.state = TaskState::Cancelled;
        entry.task.completed_at = Some(Utc::now());
        entry.task.progress_text = "Cancelled".to_string();
        entry.task.result = Some(TaskOutcome::Cancelled);
        entry.finished_at = Some(Instant::now());
        // No receivers yet for a pending task; that is fine.
        let _ = entry.cancel_tx.send(true);
        info!(task_id, "Task cancelled");
        Ok(TaskState::Cancelled)
    }

    pub fn get_status(&self, task_id: &str) -> Result<TaskStatus> {
        let tasks = self.tasks.lock().unwrap();
        tasks
            .get(task_id)
            .map(|e| TaskStatus {
                state: e.task.state,
                progress_text: e.task.progress_text.clone(),
            })
            .ok_or_else(|| HeraldError::NotFound(format!("task {}", task_id)))
    }

    /// Full snapshot of a task.
    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks
            .lock()
            .unwrap()
            .get(task_id)
            .map(|e| e.task.clone())
    }

    /// Unfinished tasks for one workspace, oldest first.
    pub fn active_tasks(&self, workspace_id: &str) -> Vec<Task> {
        let tasks = self.tasks.lock().unwrap();
        let mut active: Vec<Task> = tasks
            .values()
            .filter(|e| e.task.workspace_id == workspace_id && !e.task.state.is_terminal())
            .map(|e| e.task.clone())
            .collect();
        active.sort_by_key(|t| t.created_at);
        active
    }

    pub fn active_count(&self, workspace_id: &str) -> usize {
        self.tasks
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.task.workspace_id == workspace_id && !e.task.state.is_terminal())
            .count()
    }

    /// Unfinished tasks across all workspaces.
    pub fn total_active(&self) -> usize {
        self.tasks
            .lock()
            .unwrap()
            .values()
            .filter(|e| !e.task.state.is_terminal())
            .count()
    }

    /// Housekeeping pass:
    /// - RUNNING tasks past their deadline become TIMED_OUT. They are not
    ///   signalled: the running loop shares the deadline and stops on its
    ///   own with whatever partial result it has
    /// - terminal tasks older than the retention period are dropped
    ///
    /// Returns `(timed_out, removed)`.
    pub fn gc(&self, now: Instant) -> (usize, usize) {
        let mut tasks = self.tasks.lock().unwrap();

        let mut timed_out = 0;
        for entry in tasks.values_mut() {
            let overdue = entry.task.state == TaskState::Running
                && entry.deadline.is_some_and(|d| now >= d);
            if overdue {
                entry.task.state = TaskState::TimedOut;
                entry.task.completed_at = Some(Utc::now());
                entry.task.progress_text = "Timed out".to_string();
                entry.task.result = Some(TaskOutcome::TimedOut(None));
                entry.finished_at = Some(now);
                warn!(task_id = %entry.task.id, "Task deadline passed");
                timed_out += 1;
            }
        }

        let before = tasks.len();
        let retention = self.retention;
        tasks.retain(|_, e| match e.finished_at {
            Some(at) => now.saturating_duration_since(at) < retention,
            None => true,
        });
        let removed = before - tasks.len();
        if timed_out > 0 || removed > 0 {
            debug!(timed_out, removed, remaining = tasks.len(), "Task gc");
        }
        (timed_out, removed)
    }

    /// Run [`gc`](Self::gc) every `interval` until shutdown.
    pub fn spawn_gc(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // skip first immediate tick

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.gc(Instant::now());
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

/// Progress sink bound to one task.
pub struct TaskProgress {
    manager: Arc<TaskManager>,
    task_id: String,
}

impl TaskProgress {
    pub fn new(manager: Arc<TaskManager>, task_id: &str) -> Self {
        Self {
            manager,
            task_id: task_id.to_string(),
        }
    }
}

impl ProgressSink for TaskProgress {
    fn report(&self, text: &str) {
        self.manager.update_progress(&self.task_id, text);
    }
}
