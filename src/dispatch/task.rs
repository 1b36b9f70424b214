//! Scheduled task queue.
//!
//! Tasks can be submitted from any thread through a cloneable
//! [`TaskSender`]. They carry no phase while queued; the owning thread
//! drains the queue and runs each task inside its own scheduled-task phase.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cause::{Causer, keys};
use crate::error::{Result, TrackerError};
use crate::observability::metrics;
use crate::phase::{PhaseTracker, UnwindReport, WorkUnit, state_for_task};

/// Identity of a scheduled task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskInfo {
    /// Task id, unique per queue
    pub id: u64,
    /// Task name
    pub name: String,
    /// Plugin that scheduled the task
    pub plugin: Option<String>,
}

impl TaskInfo {
    /// Creates task info without an owning plugin.
    #[must_use]
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            plugin: None,
        }
    }

    /// The task as a causer.
    #[must_use]
    pub fn causer(&self) -> Causer {
        Causer::Task {
            id: self.id,
            name: self.name.clone(),
        }
    }
}

/// Work a task performs once drained.
pub type TaskFn = Box<dyn FnOnce(&PhaseTracker) -> Result<()> + Send>;

struct QueuedTask {
    info: TaskInfo,
    cancelled: Arc<AtomicBool>,
    run: TaskFn,
}

/// Handle to a submitted task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    info: TaskInfo,
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    /// Task identity.
    #[must_use]
    pub const fn info(&self) -> &TaskInfo {
        &self.info
    }

    /// Prevents the task from running if it has not been drained yet.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether the task was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Submits tasks to a [`TaskQueue`] from any thread.
#[derive(Clone)]
pub struct TaskSender {
    tx: mpsc::UnboundedSender<QueuedTask>,
    next_id: Arc<AtomicU64>,
}

impl TaskSender {
    /// Queues `run` under `name`.
    ///
    /// If the queue is gone the task is dropped and its handle reads as
    /// cancelled.
    pub fn submit<F>(&self, name: impl Into<String>, run: F) -> TaskHandle
    where
        F: FnOnce(&PhaseTracker) -> Result<()> + Send + 'static,
    {
        self.enqueue(TaskInfo::new(self.allocate_id(), name), Box::new(run))
    }

    /// Queues `run` on behalf of `plugin`.
    pub fn submit_for_plugin<F>(
        &self,
        plugin: impl Into<String>,
        name: impl Into<String>,
        run: F,
    ) -> TaskHandle
    where
        F: FnOnce(&PhaseTracker) -> Result<()> + Send + 'static,
    {
        let mut info = TaskInfo::new(self.allocate_id(), name);
        info.plugin = Some(plugin.into());
        self.enqueue(info, Box::new(run))
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn enqueue(&self, info: TaskInfo, run: TaskFn) -> TaskHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = TaskHandle {
            info: info.clone(),
            cancelled: Arc::clone(&cancelled),
        };
        if self
            .tx
            .send(QueuedTask {
                info,
                cancelled,
                run,
            })
            .is_err()
        {
            warn!(task = %handle.info.name, "task queue closed, task dropped");
            handle.cancel();
        }
        handle
    }
}

impl fmt::Debug for TaskSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSender")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// A task that failed while running.
#[derive(Debug)]
pub struct TaskFailure {
    /// Failed task
    pub task: TaskInfo,
    /// What went wrong
    pub error: TrackerError,
}

/// Result of draining the queue once.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Unwind reports of tasks that ran, in run order
    pub ran: Vec<UnwindReport>,
    /// Tasks skipped because they were cancelled
    pub skipped: Vec<TaskInfo>,
    /// Tasks that returned an error
    pub failed: Vec<TaskFailure>,
}

/// Receiving end of the task queue, owned by the simulation thread.
pub struct TaskQueue {
    rx: mpsc::UnboundedReceiver<QueuedTask>,
    sender: TaskSender,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            rx,
            sender: TaskSender {
                tx,
                next_id: Arc::new(AtomicU64::new(0)),
            },
        }
    }

    /// A sender for this queue.
    #[must_use]
    pub fn sender(&self) -> TaskSender {
        self.sender.clone()
    }

    /// Runs every task queued so far, each in its own scheduled-task phase.
    ///
    /// A failing task does not stop the drain; its error is reported.
    ///
    /// # Panics
    ///
    /// Panics if called off the tracker's bound thread.
    pub fn drain(&mut self, tracker: &PhaseTracker) -> DrainReport {
        let mut report = DrainReport::default();
        while let Ok(task) = self.rx.try_recv() {
            let QueuedTask {
                info,
                cancelled,
                run,
            } = task;
            if cancelled.load(Ordering::Acquire) {
                debug!(task = %info.name, id = info.id, "skipped cancelled task");
                metrics::record_task_skipped();
                report.skipped.push(info);
                continue;
            }
            match run_task(tracker, &info, run) {
                Ok(unwind) => report.ran.push(unwind),
                Err(error) => {
                    warn!(task = %info.name, id = info.id, error = %error, "scheduled task failed");
                    metrics::record_error(error.category());
                    report.failed.push(TaskFailure { task: info, error });
                }
            }
        }
        report
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("queued", &self.rx.len())
            .finish()
    }
}

fn run_task(tracker: &PhaseTracker, info: &TaskInfo, run: TaskFn) -> Result<UnwindReport> {
    let state = state_for_task(info);
    let source = info.causer();

    let frame = tracker.cause_stack().push_cause_frame();
    frame.push_cause(source.clone())?;
    if let Some(plugin) = &info.plugin {
        frame.add_context(keys::PLUGIN, plugin.clone());
    }

    if state.is_invalid(&WorkUnit::Task(info), &source) {
        run(tracker)?;
        return Ok(UnwindReport::default());
    }

    let mut ctx = state.create_phase_context(tracker).source(source);
    ctx.build_and_switch()?;
    let outcome = run(tracker);
    let report = ctx.close()?;
    outcome?;
    drop(frame);
    Ok(report)
}
