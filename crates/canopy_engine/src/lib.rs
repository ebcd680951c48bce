//! Hierarchical execution engine for Canopy.
//!
//! `canopy_engine` runs a tree of test descriptors. Each node goes through a
//! fixed lifecycle, containers wrap their children, and the whole tree can be
//! scheduled on a worker pool while nodes that share exclusive resources are
//! kept apart.
//!
//! # Core Concepts
//!
//! - [`Node`](node::Node) - Lifecycle hooks a node implements
//! - [`TestDescriptor`](descriptor::TestDescriptor) - A node in the tree, with its id and children
//! - [`ExclusiveResource`](resource::ExclusiveResource) - A named resource a node reads or writes
//! - [`ExecutionAdvisor`](advisor::ExecutionAdvisor) - Per-node execution modes and locks, planned up front
//! - [`HierarchicalTestExecutorService`](service::HierarchicalTestExecutorService) - Where tasks run
//! - [`EngineExecutionListener`](listener::EngineExecutionListener) - Receives lifecycle events
//! - [`HierarchicalTestExecutor`] - Runs a whole tree
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use canopy_engine::prelude::*;
//! use canopy_engine::testkit::EventRecorder;
//!
//! struct Writes(&'static str);
//!
//! impl Node<()> for Writes {
//!     fn exclusive_resources(&self) -> Vec<ExclusiveResource> {
//!         vec![ExclusiveResource::read_write(self.0)]
//!     }
//! }
//!
//! let engine = UniqueId::for_engine("demo");
//! let root = TestDescriptor::container(engine.clone(), "demo", EmptyNode);
//! root.add_child(TestDescriptor::test(engine.append("case", "a"), "a", Writes("db")));
//! root.add_child(TestDescriptor::test(engine.append("case", "b"), "b", Writes("db")));
//!
//! let recorder = Arc::new(EventRecorder::new());
//! let params = ConfigurationParameters::new()
//!     .with("canopy.execution.parallel.enabled", "true")
//!     .with("canopy.execution.parallel.mode.default", "concurrent");
//! let request = ExecutionRequest::new(root, recorder.clone(), ()).with_configuration(params);
//!
//! HierarchicalTestExecutor::new(request).execute()?;
//! assert!(recorder.is_well_formed());
//! # Ok::<(), ExecutionError>(())
//! ```

/// Execution-mode and lock planning.
pub mod advisor;

/// Failure collection for lifecycle phases.
pub mod collector;

/// Configuration parameters and execution settings.
pub mod config;

/// Descriptor tree.
pub mod descriptor;

/// Registration of nodes discovered during execution.
pub mod dynamic;

/// Top-level driver.
pub mod executor;

/// Cooperative per-thread interruption.
pub mod interrupt;

/// Lifecycle event listeners.
pub mod listener;

/// Resource locks and their registry.
pub mod lock;

/// The node lifecycle contract.
pub mod node;

/// Exclusive resources and their ordering.
pub mod resource;

/// Failures and execution results.
pub mod result;

/// Executor services.
pub mod service;

mod task;

/// Recording listener for tests.
pub mod testkit;

/// Run-wide idempotence tracking.
pub mod tracker;

/// Hierarchical identifiers.
pub mod unique_id;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use crate::config::{ConfigurationParameters, ExecutionConfiguration};
    pub use crate::descriptor::{Descriptor, DescriptorKind, TestDescriptor};
    pub use crate::dynamic::DynamicTestExecutor;
    pub use crate::executor::{
        ExecutionError, ExecutionRequest, ExecutionSummary, HierarchicalTestExecutor,
    };
    pub use crate::listener::{EngineExecutionListener, ListenerRegistry, LoggingListener};
    pub use crate::node::{
        EmptyNode, ExecutionContext, ExecutionMode, Invocation, Node, SkipResult,
    };
    pub use crate::resource::{ExclusiveResource, LockMode};
    pub use crate::result::{Failure, FatalError, NodeResult, Status, TestExecutionResult};
    pub use crate::unique_id::UniqueId;
}

// Re-export key types at crate root for convenience
pub use executor::{ExecutionError, ExecutionRequest, ExecutionSummary, HierarchicalTestExecutor};
pub use unique_id::UniqueId;
