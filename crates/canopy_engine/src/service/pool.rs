use std::collections::VecDeque;
use std::panic;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use super::{
    HierarchicalTestExecutorService, PanicPayload, TaskCell, TaskFuture, TestTask, run_locked,
};
use crate::interrupt;
use crate::node::ExecutionMode;

struct Queue {
    cells: VecDeque<Arc<TaskCell>>,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
}

impl Shared {
    fn push(&self, cell: Arc<TaskCell>) -> bool {
        let mut queue = self.queue.lock();
        if queue.shutdown {
            return false;
        }
        queue.cells.push_back(cell);
        drop(queue);
        self.available.notify_one();
        true
    }

    /// Blocks until a cell is available, or returns `None` on shutdown.
    fn next(&self) -> Option<Arc<TaskCell>> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(cell) = queue.cells.pop_front() {
                return Some(cell);
            }
            if queue.shutdown {
                return None;
            }
            self.available.wait(&mut queue);
        }
    }
}

/// Runs concurrent tasks on a fixed set of worker threads.
///
/// Workers share a FIFO queue. [`ExecutionMode::SameThread`] tasks never
/// enter the queue; they run on the submitting thread. A thread joining a
/// task that no worker has picked up yet runs it itself, so a pool never
/// starves even when every worker is blocked waiting for its children.
///
/// # Example
///
/// ```
/// use canopy_engine::service::{HierarchicalTestExecutorService, WorkerPoolExecutorService};
///
/// let pool = WorkerPoolExecutorService::new(4);
/// assert_eq!(pool.parallelism(), 4);
/// pool.close();
/// ```
pub struct WorkerPoolExecutorService {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    parallelism: usize,
}

impl WorkerPoolExecutorService {
    /// Starts a pool with `parallelism` workers (at least one).
    #[must_use]
    pub fn new(parallelism: usize) -> Self {
        let parallelism = parallelism.max(1);
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                cells: VecDeque::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
        });

        let workers = (0..parallelism)
            .filter_map(|index| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("canopy-worker-{index}"))
                    .spawn(move || work(&shared))
                    .inspect_err(|error| {
                        tracing::warn!(index, %error, "failed to spawn worker thread");
                    })
                    .ok()
            })
            .collect();

        tracing::debug!(parallelism, "worker pool started");
        Self {
            shared,
            workers: Mutex::new(workers),
            parallelism,
        }
    }
}

fn work(shared: &Shared) {
    let handle = interrupt::current();
    tracing::trace!(worker = handle.thread_name(), "worker started");
    while let Some(cell) = shared.next() {
        cell.run();
    }
    tracing::trace!(worker = handle.thread_name(), "worker stopped");
}

impl HierarchicalTestExecutorService for WorkerPoolExecutorService {
    fn submit(&self, task: Box<dyn TestTask>) -> TaskFuture {
        if task.execution_mode() == ExecutionMode::SameThread {
            return TaskFuture::completed(run_locked(task));
        }
        let cell = TaskCell::pending(task);
        if !self.shared.push(Arc::clone(&cell)) {
            tracing::debug!("pool closed, running submitted task on the caller");
        }
        TaskFuture::new(cell)
    }

    fn invoke_all(&self, tasks: Vec<Box<dyn TestTask>>) {
        let (concurrent, same_thread): (Vec<_>, Vec<_>) = tasks
            .into_iter()
            .partition(|task| task.execution_mode() == ExecutionMode::Concurrent);

        let forks: Vec<TaskFuture> = concurrent.into_iter().map(|task| self.submit(task)).collect();

        let mut first_panic: Option<PanicPayload> = None;
        for task in same_thread {
            if let Err(payload) = run_locked(task) {
                first_panic = Some(payload);
                break;
            }
        }

        for fork in forks.into_iter().rev() {
            if let Err(payload) = fork.join() {
                first_panic.get_or_insert(payload);
            }
        }

        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
    }

    fn close(&self) {
        self.shared.queue.lock().shutdown = true;
        self.shared.available.notify_all();

        let current = thread::current().id();
        let workers = core::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                tracing::warn!("worker thread panicked");
            }
        }
    }

    fn parallelism(&self) -> usize {
        self.parallelism
    }
}

impl Drop for WorkerPoolExecutorService {
    fn drop(&mut self) {
        self.close();
    }
}

impl core::fmt::Debug for WorkerPoolExecutorService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkerPoolExecutorService")
            .field("parallelism", &self.parallelism)
            .finish_non_exhaustive()
    }
}
