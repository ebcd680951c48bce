//! The recursive unit of execution.
//!
//! A [`NodeExecutionTask`] drives one descriptor through its lifecycle and
//! hands its children to the executor service:
//!
//! ```text
//! prepare ─▶ should_be_skipped ─▶ started ─▶ around {
//!     before ─▶ execute ─▶ children ─▶ await dynamic children ─▶ after
//! } ─▶ clean_up ─▶ skipped | finished
//! ```
//!
//! Each phase runs inside the task's
//! [`ThrowableCollector`](crate::collector::ThrowableCollector). A failing
//! phase never prevents `clean_up` or completion reporting.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::advisor::ExecutionAdvisor;
use crate::collector::ThrowableCollector;
use crate::descriptor::{Descriptor, TestDescriptor};
use crate::dynamic::{DefaultDynamicTestExecutor, DynamicTestExecutor};
use crate::interrupt;
use crate::listener::EngineExecutionListener;
use crate::lock::ResourceLock;
use crate::node::{ExecutionContext, ExecutionMode, Invocation, SkipResult};
use crate::result::{EscapedPanic, NodeResult};
use crate::service::{HierarchicalTestExecutorService, TestTask};
use crate::tracker::ExecutionTracker;
use crate::unique_id::UniqueId;

/// State shared by every task of one run.
pub(crate) struct TaskContext {
    pub(crate) listener: Arc<dyn EngineExecutionListener>,
    pub(crate) service: Arc<dyn HierarchicalTestExecutorService>,
    pub(crate) advisor: ExecutionAdvisor,
    pub(crate) tracker: ExecutionTracker,
}

/// Executes one descriptor and, recursively, its subtree.
pub(crate) struct NodeExecutionTask<C: ExecutionContext> {
    scope: Arc<TaskContext>,
    descriptor: Arc<TestDescriptor<C>>,
    parent_context: C,
    execution_mode: ExecutionMode,
    resource_lock: ResourceLock,
}

impl<C: ExecutionContext> NodeExecutionTask<C> {
    pub(crate) fn new(
        scope: Arc<TaskContext>,
        descriptor: Arc<TestDescriptor<C>>,
        parent_context: C,
    ) -> Self {
        let execution_mode = scope.advisor.execution_mode(&descriptor);
        let resource_lock = scope.advisor.resource_lock(descriptor.unique_id());
        Self {
            scope,
            descriptor,
            parent_context,
            execution_mode,
            resource_lock,
        }
    }

    #[must_use]
    pub(crate) fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }
}

impl<C: ExecutionContext> TestTask for NodeExecutionTask<C> {
    fn execution_mode(&self) -> ExecutionMode {
        self.execution_mode
    }

    fn resource_lock(&self) -> &ResourceLock {
        &self.resource_lock
    }

    fn execute(self: Box<Self>) {
        let task = *self;
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || task.run())) {
            panic::resume_unwind(EscapedPanic::wrap(payload));
        }
    }
}

impl<C: ExecutionContext> NodeExecutionTask<C> {
    /// Runs the lifecycle. Anything unwinding out of here escaped every
    /// collector of this node.
    fn run(self) {
        let Self {
            scope,
            descriptor,
            parent_context,
            execution_mode,
            ..
        } = self;

        let id = descriptor.unique_id();
        if !scope.tracker.mark_executed(id) {
            tracing::debug!(%id, "already executed, ignoring");
            return;
        }

        let span = tracing::debug_span!("node", %id);
        let _entered = span.enter();
        let _interrupt = InterruptReset {
            id,
            name: descriptor.display_name(),
        };

        let mut run = NodeRun {
            scope: &scope,
            descriptor: &descriptor,
            execution_mode,
            collector: ThrowableCollector::new(),
            context: None,
            skip: SkipResult::Proceed,
            started: false,
        };
        run.prepare(parent_context);
        if run.collector.is_empty() {
            run.check_whether_skipped();
        }
        if run.collector.is_empty() && !run.skip.is_skipped() {
            run.execute_recursively();
        }
        if run.context.is_some() {
            run.clean_up();
        }
        run.report_completion();
    }
}

/// Clears the interrupt flag of the executing thread when a task ends,
/// however it ends.
struct InterruptReset<'a> {
    id: &'a UniqueId,
    name: &'a str,
}

impl Drop for InterruptReset<'_> {
    fn drop(&mut self) {
        if interrupt::clear() {
            tracing::debug!(
                id = %self.id,
                name = self.name,
                "cleared interrupt flag left set by the node"
            );
        }
    }
}

struct NodeRun<'a, C: ExecutionContext> {
    scope: &'a Arc<TaskContext>,
    descriptor: &'a Arc<TestDescriptor<C>>,
    execution_mode: ExecutionMode,
    collector: ThrowableCollector,
    context: Option<C>,
    skip: SkipResult,
    started: bool,
}

impl<C: ExecutionContext> NodeRun<'_, C> {
    fn prepare(&mut self, parent: C) {
        let node = self.descriptor.node();
        self.context = self.collector.execute(|| node.prepare(&parent));
    }

    fn check_whether_skipped(&mut self) {
        let node = self.descriptor.node();
        if let Some(ctx) = &self.context
            && let Some(skip) = self.collector.execute(|| node.should_be_skipped(ctx))
        {
            self.skip = skip;
        }
    }

    fn execute_recursively(&mut self) {
        self.scope.listener.execution_started(&**self.descriptor);
        self.started = true;

        let Some(outer) = self.context.take() else {
            return;
        };
        let node = self.descriptor.node();
        let mut latest = None;
        self.collector.execute(|| {
            node.around(
                &outer,
                Invocation::new(|ctx| latest = Some(self.run_body(ctx))),
            )
        });
        self.context = Some(latest.unwrap_or(outer));
    }

    /// `before`, `execute`, children, dynamic children and `after`.
    ///
    /// Returns the newest context produced.
    fn run_body(&self, ctx: C) -> C {
        let node = self.descriptor.node();
        let collector = &self.collector;
        let children = self.descriptor.children();

        let mut current = match collector.execute(|| node.before(&ctx)) {
            Some(next) => {
                drop(ctx);
                next
            }
            None => return ctx,
        };

        let dynamic = DefaultDynamicTestExecutor::new(
            self.scope,
            self.descriptor,
            current.clone(),
            self.execution_mode,
        );
        if let Some(next) = collector.execute(|| node.execute(&current, &dynamic)) {
            current = next;
            if !children.is_empty() {
                let tasks = children
                    .into_iter()
                    .map(|child| {
                        let task =
                            NodeExecutionTask::new(Arc::clone(self.scope), child, current.clone());
                        Box::new(task) as Box<dyn TestTask>
                    })
                    .collect();
                self.scope.service.invoke_all(tasks);
            }
        }

        collector.execute(|| dynamic.await_finished());
        collector.execute(|| node.after(&current));
        current
    }

    fn clean_up(&mut self) {
        let node = self.descriptor.node();
        if let Some(ctx) = &self.context {
            self.collector.execute(|| node.clean_up(ctx));
        }
    }

    fn report_completion(&mut self) {
        let node = self.descriptor.node();
        let descriptor: &dyn Descriptor = &**self.descriptor;
        let listener = &self.scope.listener;

        if self.collector.is_empty() && self.skip.is_skipped() {
            if let Some(ctx) = &self.context {
                notify(descriptor.unique_id(), "node_skipped", || {
                    node.node_skipped(ctx, descriptor, &self.skip)
                });
            }
            let reason = self.skip.reason().unwrap_or(SkipResult::UNKNOWN_REASON);
            listener.execution_skipped(descriptor, reason);
            return;
        }

        if !self.started {
            listener.execution_started(descriptor);
        }
        let result = core::mem::take(&mut self.collector).into_result();
        notify(descriptor.unique_id(), "node_finished", || {
            node.node_finished(self.context.as_ref(), descriptor, &result)
        });
        listener.execution_finished(descriptor, &result);
    }
}

/// Invokes a best-effort lifecycle notification.
///
/// Failures are logged and dropped; fatal failures still unwind.
fn notify(id: &UniqueId, hook: &'static str, call: impl FnOnce() -> NodeResult<()>) {
    let collector = ThrowableCollector::new();
    collector.execute(call);
    if !collector.is_empty() {
        let result = collector.into_result();
        if let Some(failure) = result.failure() {
            tracing::debug!(%id, hook, error = %failure, "lifecycle notification failed");
        }
    }
}
