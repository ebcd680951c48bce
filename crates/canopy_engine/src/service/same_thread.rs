use std::panic;

use super::{HierarchicalTestExecutorService, TaskFuture, TestTask, run_locked};

/// Runs every task on the calling thread, in submission order.
///
/// Execution modes are ignored. Resource locks are still acquired, so the
/// service can share a lock table with concurrently running services.
#[derive(Debug, Clone, Copy, Default)]
pub struct SameThreadExecutorService;

impl SameThreadExecutorService {
    /// Creates the service.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HierarchicalTestExecutorService for SameThreadExecutorService {
    fn submit(&self, task: Box<dyn TestTask>) -> TaskFuture {
        TaskFuture::completed(run_locked(task))
    }

    fn invoke_all(&self, tasks: Vec<Box<dyn TestTask>>) {
        for task in tasks {
            if let Err(payload) = run_locked(task) {
                panic::resume_unwind(payload);
            }
        }
    }

    fn close(&self) {}

    fn parallelism(&self) -> usize {
        1
    }
}
