//! The driver that runs a whole tree.
//!
//! [`HierarchicalTestExecutor`] reads the configuration, plans locks and
//! execution modes, picks an executor service, runs the root task and shuts
//! the service down again.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use canopy_engine::prelude::*;
//!
//! let engine = UniqueId::for_engine("demo");
//! let root = TestDescriptor::<()>::container(engine.clone(), "demo", EmptyNode);
//! root.add_child(TestDescriptor::test(engine.append("case", "one"), "one", EmptyNode));
//!
//! let params = ConfigurationParameters::new()
//!     .with("canopy.execution.parallel.enabled", "true")
//!     .with("canopy.execution.parallel.config.strategy", "fixed")
//!     .with("canopy.execution.parallel.config.fixed.parallelism", "2");
//! let request = ExecutionRequest::new(root, Arc::new(LoggingListener::new()), ())
//!     .with_configuration(params);
//!
//! let summary = HierarchicalTestExecutor::new(request).execute()?;
//! assert_eq!(summary.worker_threads, 2);
//! assert_eq!(summary.nodes_executed, 2);
//! # Ok::<(), ExecutionError>(())
//! ```

use core::fmt;
use core::time::Duration;
use std::sync::Arc;
use std::time::Instant;

use crate::advisor::ExecutionAdvisor;
use crate::config::{ConfigError, ConfigurationParameters, ExecutionConfiguration};
use crate::descriptor::{Descriptor, TestDescriptor};
use crate::listener::EngineExecutionListener;
use crate::lock::LockManager;
use crate::node::ExecutionContext;
use crate::resource::ExclusiveResource;
use crate::result::{FatalError, panic_message};
use crate::service::{
    HierarchicalTestExecutorService, PanicPayload, SameThreadExecutorService,
    WorkerPoolExecutorService,
};
use crate::task::{NodeExecutionTask, TaskContext};
use crate::tracker::ExecutionTracker;
use crate::unique_id::UniqueId;

/// Outcome of a completed run.
///
/// Node failures do not make a run fail; they are reported to the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionSummary {
    /// Wall-clock duration of the run.
    pub duration: Duration,
    /// Number of threads that could run nodes at the same time.
    pub worker_threads: usize,
    /// Number of distinct nodes that were executed or rejected.
    pub nodes_executed: usize,
}

/// Errors that abort a run as a whole.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// The configuration could not be read.
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigError),

    /// The root node declared exclusive resources.
    #[error("root {id} must not declare exclusive resources: {}", format_resources(.resources))]
    RootDeclaresResources {
        /// The root's unique id.
        id: UniqueId,
        /// What it declared.
        resources: Vec<ExclusiveResource>,
    },

    /// A fatal failure escaped a node.
    #[error("run aborted by fatal failure: {0}")]
    Fatal(String),

    /// A panic escaped the engine, for example from a listener.
    #[error("run aborted by panic: {0}")]
    Panicked(String),
}

impl ExecutionError {
    fn from_panic(payload: PanicPayload) -> Self {
        match payload.downcast::<FatalError>() {
            Ok(fatal) => ExecutionError::Fatal(fatal.message().to_owned()),
            Err(other) => ExecutionError::Panicked(panic_message(other.as_ref())),
        }
    }
}

fn format_resources(resources: &[ExclusiveResource]) -> String {
    resources
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Everything needed to run a tree.
pub struct ExecutionRequest<C: ExecutionContext> {
    root: Arc<TestDescriptor<C>>,
    listener: Arc<dyn EngineExecutionListener>,
    configuration: ConfigurationParameters,
    root_context: C,
}

impl<C: ExecutionContext> ExecutionRequest<C> {
    /// Creates a request with default configuration.
    #[must_use]
    pub fn new(
        root: Arc<TestDescriptor<C>>,
        listener: Arc<dyn EngineExecutionListener>,
        root_context: C,
    ) -> Self {
        Self {
            root,
            listener,
            configuration: ConfigurationParameters::default(),
            root_context,
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_configuration(mut self, configuration: ConfigurationParameters) -> Self {
        self.configuration = configuration;
        self
    }

    /// Returns the root descriptor.
    #[must_use]
    pub fn root(&self) -> &Arc<TestDescriptor<C>> {
        &self.root
    }

    /// Returns the configuration.
    #[must_use]
    pub fn configuration(&self) -> &ConfigurationParameters {
        &self.configuration
    }
}

impl<C: ExecutionContext> fmt::Debug for ExecutionRequest<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionRequest")
            .field("root", self.root.unique_id())
            .field("configuration", &self.configuration)
            .finish_non_exhaustive()
    }
}

/// Runs the tree of an [`ExecutionRequest`].
#[derive(Debug)]
pub struct HierarchicalTestExecutor<C: ExecutionContext> {
    request: ExecutionRequest<C>,
}

impl<C: ExecutionContext> HierarchicalTestExecutor<C> {
    /// Creates an executor for `request`.
    #[must_use]
    pub fn new(request: ExecutionRequest<C>) -> Self {
        Self { request }
    }

    /// Runs the tree to completion.
    ///
    /// # Errors
    ///
    /// - [`ExecutionError::Configuration`] for unusable configuration values.
    /// - [`ExecutionError::RootDeclaresResources`] if the root declares
    ///   exclusive resources. Nothing runs in that case.
    /// - [`ExecutionError::Fatal`] and [`ExecutionError::Panicked`] if an
    ///   unwind escaped the root task. Events already emitted stay emitted.
    pub fn execute(self) -> Result<ExecutionSummary, ExecutionError> {
        let ExecutionRequest {
            root,
            listener,
            configuration,
            root_context,
        } = self.request;
        let started = Instant::now();

        let config = ExecutionConfiguration::from_parameters(&configuration)?;
        let lock_manager = LockManager::new();
        let advisor = ExecutionAdvisor::build(&root, config.default_execution_mode, &lock_manager)?;

        let service: Arc<dyn HierarchicalTestExecutorService> = if config.parallel_enabled {
            Arc::new(WorkerPoolExecutorService::new(config.parallelism()))
        } else {
            Arc::new(SameThreadExecutorService::new())
        };
        let worker_threads = service.parallelism();

        tracing::info!(
            root = %root.unique_id(),
            parallel = config.parallel_enabled,
            default_mode = %config.default_execution_mode,
            worker_threads,
            "execution started"
        );

        let scope = Arc::new(TaskContext {
            listener,
            service: Arc::clone(&service),
            advisor,
            tracker: ExecutionTracker::new(),
        });
        let task = NodeExecutionTask::new(Arc::clone(&scope), Arc::clone(&root), root_context);
        let outcome = service.submit(Box::new(task)).join();
        service.close();

        let summary = ExecutionSummary {
            duration: started.elapsed(),
            worker_threads,
            nodes_executed: scope.tracker.len(),
        };

        match outcome {
            Ok(()) => {
                tracing::info!(
                    duration_ms = summary.duration.as_millis(),
                    nodes = summary.nodes_executed,
                    "execution finished"
                );
                Ok(summary)
            }
            Err(payload) => {
                let error = ExecutionError::from_panic(payload);
                tracing::error!(%error, "execution aborted");
                Err(error)
            }
        }
    }
}
