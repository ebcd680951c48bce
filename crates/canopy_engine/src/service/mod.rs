//! Executor services: how tasks are scheduled onto threads.
//!
//! Two implementations exist:
//!
//! - [`SameThreadExecutorService`] runs everything on the calling thread, in
//!   order.
//! - [`WorkerPoolExecutorService`] runs [`ExecutionMode::Concurrent`] tasks on
//!   a fixed pool of worker threads.
//!
//! Both acquire a task's [`ResourceLock`] before running it and release it
//! once the task, including the part of its subtree that ran inline, is done.

mod pool;
mod same_thread;

pub use pool::WorkerPoolExecutorService;
pub use same_thread::SameThreadExecutorService;

use core::any::Any;
use core::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::lock::ResourceLock;
use crate::node::ExecutionMode;

/// Payload of a panic that escaped a task.
pub type PanicPayload = Box<dyn Any + Send + 'static>;

/// A unit of work scheduled by an executor service.
pub trait TestTask: Send {
    /// How the task may be scheduled relative to its siblings.
    fn execution_mode(&self) -> ExecutionMode;

    /// The lock held while the task runs.
    fn resource_lock(&self) -> &ResourceLock;

    /// Runs the task to completion.
    fn execute(self: Box<Self>);
}

/// Schedules [`TestTask`]s.
pub trait HierarchicalTestExecutorService: Send + Sync {
    /// Schedules `task` and returns a future for its completion.
    fn submit(&self, task: Box<dyn TestTask>) -> TaskFuture;

    /// Runs all `tasks` and blocks until every one of them completed.
    ///
    /// A panic escaping any of the tasks is resumed on the caller once the
    /// tasks that were already started have completed.
    fn invoke_all(&self, tasks: Vec<Box<dyn TestTask>>);

    /// Stops accepting work and releases the service's threads.
    fn close(&self);

    /// Returns the number of threads that may run tasks at the same time.
    fn parallelism(&self) -> usize;
}

/// Runs `task` while holding its resource lock, capturing escaped panics.
pub(crate) fn run_locked(task: Box<dyn TestTask>) -> Result<(), PanicPayload> {
    let lock = task.resource_lock().clone();
    let _guard = lock.acquire();
    panic::catch_unwind(AssertUnwindSafe(move || task.execute()))
}

// ─────────────────────────────────────────────────────────────────────────────
// TaskFuture
// ─────────────────────────────────────────────────────────────────────────────

enum CellState {
    Pending(Box<dyn TestTask>),
    Running,
    Done(Result<(), PanicPayload>),
    Joined,
}

/// Shared slot for one submitted task.
///
/// Whoever claims the pending task first runs it: a worker taking it from the
/// queue, or the joining thread.
pub(crate) struct TaskCell {
    state: Mutex<CellState>,
    completed: Condvar,
}

impl TaskCell {
    pub(crate) fn pending(task: Box<dyn TestTask>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CellState::Pending(task)),
            completed: Condvar::new(),
        })
    }

    fn done(outcome: Result<(), PanicPayload>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CellState::Done(outcome)),
            completed: Condvar::new(),
        })
    }

    /// Takes the task if nobody claimed it yet.
    fn claim(&self) -> Option<Box<dyn TestTask>> {
        let mut state = self.state.lock();
        match core::mem::replace(&mut *state, CellState::Running) {
            CellState::Pending(task) => Some(task),
            other => {
                *state = other;
                None
            }
        }
    }

    /// Claims and runs the task; a no-op if it was already claimed.
    pub(crate) fn run(&self) {
        if let Some(task) = self.claim() {
            let outcome = run_locked(task);
            *self.state.lock() = CellState::Done(outcome);
            self.completed.notify_all();
        }
    }

    fn is_done(&self) -> bool {
        matches!(*self.state.lock(), CellState::Done(_) | CellState::Joined)
    }

    fn wait(&self) -> Result<(), PanicPayload> {
        let mut state = self.state.lock();
        loop {
            match core::mem::replace(&mut *state, CellState::Joined) {
                CellState::Done(outcome) => return outcome,
                CellState::Joined => return Ok(()),
                other => {
                    *state = other;
                    self.completed.wait(&mut state);
                }
            }
        }
    }
}

/// Completion handle of a submitted task.
#[must_use = "dropping a future does not wait for the task"]
pub struct TaskFuture {
    cell: Arc<TaskCell>,
}

impl TaskFuture {
    pub(crate) fn new(cell: Arc<TaskCell>) -> Self {
        Self { cell }
    }

    /// A future that already holds its outcome.
    pub(crate) fn completed(outcome: Result<(), PanicPayload>) -> Self {
        Self::new(TaskCell::done(outcome))
    }

    /// Returns `true` once the task has finished.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cell.is_done()
    }

    /// Waits for the task to finish.
    ///
    /// A task nobody has picked up yet runs on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns the payload of a panic that escaped the task.
    pub fn join(self) -> Result<(), PanicPayload> {
        self.cell.run();
        self.cell.wait()
    }
}

impl fmt::Debug for TaskFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFuture")
            .field("done", &self.is_done())
            .finish()
    }
}
