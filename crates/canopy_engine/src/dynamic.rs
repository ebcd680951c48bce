//! Registration of nodes discovered while their parent executes.

use core::fmt;
use std::panic;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::descriptor::{Descriptor, TestDescriptor};
use crate::node::{ExecutionContext, ExecutionMode};
use crate::resource::ExclusiveResource;
use crate::result::{EscapedPanic, Failure, NodeResult, TestExecutionResult};
use crate::service::TaskFuture;
use crate::task::{NodeExecutionTask, TaskContext};
use crate::unique_id::UniqueId;

/// Handle through which [`Node::execute`](crate::node::Node::execute)
/// registers children that were not known before the run.
pub trait DynamicTestExecutor<C: ExecutionContext> {
    /// Attaches `child` to the executing node and schedules it.
    ///
    /// A child whose unique id already ran, or is already attached to the
    /// executing node, is ignored.
    ///
    /// The child runs with the context the executing node had when `execute`
    /// was invoked.
    fn execute(&self, child: Arc<TestDescriptor<C>>);

    /// Blocks until every child registered so far has finished.
    ///
    /// # Errors
    ///
    /// Returns the first failure that escaped a child task.
    ///
    /// # Panics
    ///
    /// Resumes a panic that escaped a child task outside its lifecycle
    /// phases, once every child has been joined.
    fn await_finished(&self) -> NodeResult<()>;
}

/// Rejection of a dynamically registered node.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DynamicRegistrationError {
    /// Dynamic nodes cannot take part in lock planning.
    #[error("dynamic node {id} must not declare exclusive resources: {}", format_resources(.resources))]
    ExclusiveResources {
        /// The rejected node.
        id: UniqueId,
        /// What it declared.
        resources: Vec<ExclusiveResource>,
    },
}

fn format_resources(resources: &[ExclusiveResource]) -> String {
    resources
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) struct DefaultDynamicTestExecutor<'a, C: ExecutionContext> {
    scope: &'a Arc<TaskContext>,
    parent: &'a Arc<TestDescriptor<C>>,
    context: C,
    parent_mode: ExecutionMode,
    futures: Mutex<Vec<TaskFuture>>,
}

impl<'a, C: ExecutionContext> DefaultDynamicTestExecutor<'a, C> {
    pub(crate) fn new(
        scope: &'a Arc<TaskContext>,
        parent: &'a Arc<TestDescriptor<C>>,
        context: C,
        parent_mode: ExecutionMode,
    ) -> Self {
        Self {
            scope,
            parent,
            context,
            parent_mode,
            futures: Mutex::new(Vec::new()),
        }
    }

    /// Returns `true` if `id` already ran or is already a child of the parent.
    fn is_registered(&self, id: &UniqueId) -> bool {
        self.scope.tracker.was_already_executed(id)
            || self
                .parent
                .children()
                .iter()
                .any(|existing| existing.unique_id() == id)
    }

    fn reject(&self, child: &TestDescriptor<C>, resources: Vec<ExclusiveResource>) {
        let listener = &self.scope.listener;
        let id = child.unique_id();
        if !self.scope.tracker.mark_executed(id) {
            return;
        }
        tracing::debug!(%id, "rejecting dynamic node with exclusive resources");

        let error = DynamicRegistrationError::ExclusiveResources {
            id: id.clone(),
            resources,
        };
        listener.execution_started(child);
        listener.execution_finished(child, &TestExecutionResult::failed(Failure::new(error)));
    }
}

impl<C: ExecutionContext> DynamicTestExecutor<C> for DefaultDynamicTestExecutor<'_, C> {
    fn execute(&self, child: Arc<TestDescriptor<C>>) {
        if self.is_registered(child.unique_id()) {
            tracing::debug!(id = %child.unique_id(), "dynamic node already registered, ignoring");
            return;
        }
        self.parent.add_child(Arc::clone(&child));
        self.scope.listener.dynamic_test_registered(&*child);

        let resources = child.node().exclusive_resources();
        if !resources.is_empty() {
            self.reject(&child, resources);
            return;
        }

        let mut task = NodeExecutionTask::new(Arc::clone(self.scope), child, self.context.clone());
        if self.parent_mode == ExecutionMode::SameThread {
            task = task.with_execution_mode(ExecutionMode::SameThread);
        }
        let future = self.scope.service.submit(Box::new(task));
        self.futures.lock().push(future);
    }

    fn await_finished(&self) -> NodeResult<()> {
        let futures = core::mem::take(&mut *self.futures.lock());
        let mut first_failure = None;
        let mut escaped = None;
        for future in futures {
            match future.join() {
                Ok(()) => {}
                Err(payload) if (*payload).is::<EscapedPanic>() => {
                    escaped.get_or_insert(payload);
                }
                Err(payload) => {
                    first_failure.get_or_insert_with(|| Failure::from_panic(payload));
                }
            }
        }
        if let Some(payload) = escaped {
            panic::resume_unwind(payload);
        }
        first_failure.map_or(Ok(()), Err)
    }
}

impl<C: ExecutionContext> fmt::Debug for DefaultDynamicTestExecutor<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultDynamicTestExecutor")
            .field("parent", self.parent.unique_id())
            .field("pending", &self.futures.lock().len())
            .finish_non_exhaustive()
    }
}
