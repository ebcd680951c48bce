//! The lifecycle contract implemented by every executable node.
//!
//! A [`Node`] supplies the behavior of one vertex of the test tree. Every
//! method has a default, so a leaf that only needs to run something overrides
//! [`execute`](Node::execute) and nothing else.
//!
//! Each phase receives the context produced by the previous phase of the same
//! node and returns the context that supersedes it. [`prepare`](Node::prepare)
//! receives the parent's context.
//!
//! # Example
//!
//! ```
//! use canopy_engine::prelude::*;
//!
//! struct Addition;
//!
//! impl Node<()> for Addition {
//!     fn execute(&self, ctx: &(), _dynamic: &dyn DynamicTestExecutor<()>) -> NodeResult<()> {
//!         if 1 + 1 == 2 {
//!             Ok(*ctx)
//!         } else {
//!             Err(Failure::msg("arithmetic is broken"))
//!         }
//!     }
//! }
//! ```

use core::fmt;

use crate::descriptor::Descriptor;
use crate::dynamic::DynamicTestExecutor;
use crate::resource::ExclusiveResource;
use crate::result::{NodeResult, TestExecutionResult};

/// Bound shared by every execution context type.
///
/// Contexts are cloned when handed to children and moved between worker
/// threads, so they must be `Clone + Send + 'static`.
pub trait ExecutionContext: Clone + Send + 'static {}

impl<T: Clone + Send + 'static> ExecutionContext for T {}

/// How the children of a node may be scheduled relative to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    /// May run in parallel with its siblings.
    Concurrent,
    /// Runs on the thread of its parent, after the preceding siblings.
    SameThread,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Concurrent => write!(f, "concurrent"),
            ExecutionMode::SameThread => write!(f, "same_thread"),
        }
    }
}

/// Outcome of [`Node::should_be_skipped`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SkipResult {
    /// Run the node.
    #[default]
    Proceed,
    /// Do not run the node.
    Skip {
        /// Why the node was skipped, if known.
        reason: Option<String>,
    },
}

impl SkipResult {
    /// Reason reported when a skip carries none.
    pub const UNKNOWN_REASON: &'static str = "<unknown>";

    /// Creates a skip with the given reason.
    #[must_use]
    pub fn skip(reason: impl Into<String>) -> Self {
        SkipResult::Skip {
            reason: Some(reason.into()),
        }
    }

    /// Creates a skip without a reason.
    #[must_use]
    pub fn skip_without_reason() -> Self {
        SkipResult::Skip { reason: None }
    }

    /// Returns `true` if the node must not run.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, SkipResult::Skip { .. })
    }

    /// Returns the reason as reported to listeners.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            SkipResult::Proceed => None,
            SkipResult::Skip { reason } => {
                Some(reason.as_deref().unwrap_or(Self::UNKNOWN_REASON))
            }
        }
    }
}

/// The remainder of a node's execution, handed to [`Node::around`].
///
/// Calling [`invoke`](Self::invoke) runs `before`, `execute`, the children
/// and `after` with the given context. Failures of those phases are recorded
/// by the engine and do not surface here.
pub struct Invocation<'a, C> {
    body: Box<dyn FnOnce(C) + 'a>,
}

impl<'a, C> Invocation<'a, C> {
    pub(crate) fn new(body: impl FnOnce(C) + 'a) -> Self {
        Self {
            body: Box::new(body),
        }
    }

    /// Runs the wrapped phases with `ctx`.
    pub fn invoke(self, ctx: C) {
        (self.body)(ctx);
    }
}

impl<C> fmt::Debug for Invocation<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation").finish_non_exhaustive()
    }
}

/// Lifecycle callbacks of one node.
///
/// Every phase may fail by returning a [`Failure`](crate::result::Failure) or
/// by panicking; both are recorded against the node and the remaining
/// phases run as described on each method. A
/// [`FatalError`](crate::result::FatalError) is never recorded: it aborts the
/// run.
pub trait Node<C: ExecutionContext>: Send + Sync + 'static {
    /// Derives this node's context from its parent's.
    ///
    /// A failure here skips everything up to completion reporting.
    fn prepare(&self, parent: &C) -> NodeResult<C> {
        Ok(parent.clone())
    }

    /// Decides whether the node runs. Only consulted when `prepare` succeeded.
    fn should_be_skipped(&self, _ctx: &C) -> NodeResult<SkipResult> {
        Ok(SkipResult::Proceed)
    }

    /// Wraps `before`, `execute`, the children and `after`.
    ///
    /// Implementations must call [`Invocation::invoke`] at most once. Code
    /// after the call runs whether or not the wrapped phases failed.
    fn around(&self, ctx: &C, invocation: Invocation<'_, C>) -> NodeResult<()> {
        invocation.invoke(ctx.clone());
        Ok(())
    }

    /// Runs before this node and its children execute.
    fn before(&self, ctx: &C) -> NodeResult<C> {
        Ok(ctx.clone())
    }

    /// The node's own behavior.
    ///
    /// Children discovered at runtime are handed to `dynamic`.
    fn execute(&self, ctx: &C, _dynamic: &dyn DynamicTestExecutor<C>) -> NodeResult<C> {
        Ok(ctx.clone())
    }

    /// Runs after the node and its children, provided `before` succeeded.
    fn after(&self, _ctx: &C) -> NodeResult<()> {
        Ok(())
    }

    /// Releases what `prepare` allocated. Runs whenever `prepare` succeeded.
    fn clean_up(&self, _ctx: &C) -> NodeResult<()> {
        Ok(())
    }

    /// Notification that the node was skipped. Failures are logged and ignored.
    fn node_skipped(
        &self,
        _ctx: &C,
        _descriptor: &dyn Descriptor,
        _skip: &SkipResult,
    ) -> NodeResult<()> {
        Ok(())
    }

    /// Notification that the node finished. Failures are logged and ignored.
    ///
    /// `ctx` is `None` when `prepare` failed.
    fn node_finished(
        &self,
        _ctx: Option<&C>,
        _descriptor: &dyn Descriptor,
        _result: &TestExecutionResult,
    ) -> NodeResult<()> {
        Ok(())
    }

    /// The declared execution mode; `None` defers to the configured default.
    fn execution_mode(&self) -> Option<ExecutionMode> {
        None
    }

    /// External resources this node needs while it runs.
    fn exclusive_resources(&self) -> Vec<ExclusiveResource> {
        Vec::new()
    }
}

/// A node without behavior, typically used for plain containers.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyNode;

impl<C: ExecutionContext> Node<C> for EmptyNode {}
