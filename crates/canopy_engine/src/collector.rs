//! Failure aggregation for one task invocation.
//!
//! [`ThrowableCollector`] runs fallible steps and records their failures so
//! that later steps (`after`, `clean_up`) still run. Fatal failures are the
//! exception: they are re-raised as an unwind immediately and never recorded.

use std::panic::{self, AssertUnwindSafe};

use parking_lot::Mutex;

use crate::result::{EscapedPanic, Failure, NodeResult, TestExecutionResult};

/// Collects the failures of the lifecycle phases of a single node.
///
/// The collector uses interior mutability, so a step may itself call
/// [`execute`](Self::execute) on the same collector, as happens when the body
/// passed to `around` runs further phases.
#[derive(Debug, Default)]
pub struct ThrowableCollector {
    failures: Mutex<Vec<Failure>>,
}

impl ThrowableCollector {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `step`, returning its value on success.
    ///
    /// Returned failures and panics are recorded and `None` is returned.
    ///
    /// # Panics
    ///
    /// Re-raises fatal failures, panics carrying a
    /// [`FatalError`](crate::result::FatalError) payload, and panics that
    /// escaped a nested task, with [`resume_unwind`](std::panic::resume_unwind).
    pub fn execute<T>(&self, step: impl FnOnce() -> NodeResult<T>) -> Option<T> {
        match panic::catch_unwind(AssertUnwindSafe(step)) {
            Ok(Ok(value)) => Some(value),
            Ok(Err(failure)) => {
                self.record(failure);
                None
            }
            Err(payload) if (*payload).is::<EscapedPanic>() => panic::resume_unwind(payload),
            Err(payload) => {
                self.record(Failure::from_panic(payload));
                None
            }
        }
    }

    /// Records a failure that was produced outside of [`execute`](Self::execute).
    ///
    /// # Panics
    ///
    /// Re-raises fatal failures.
    pub fn record(&self, failure: Failure) {
        if let Failure::Fatal(fatal) = failure {
            panic::resume_unwind(Box::new(fatal));
        }
        self.failures.lock().push(failure);
    }

    /// Returns `true` if no failure has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.lock().is_empty()
    }

    /// Returns the number of recorded failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.failures.lock().len()
    }

    /// Consumes the collector, converting the recorded failures into a result.
    #[must_use]
    pub fn into_result(self) -> TestExecutionResult {
        TestExecutionResult::from_failures(self.failures.into_inner())
    }
}
