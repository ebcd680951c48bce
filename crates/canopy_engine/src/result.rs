//! Failures and execution results.
//!
//! Lifecycle phases report problems as [`Failure`]s. The
//! [`ThrowableCollector`](crate::collector::ThrowableCollector) of a task
//! gathers them and converts them into the [`TestExecutionResult`] that is
//! reported through `execution_finished`.

use core::any::Any;
use core::fmt;
use std::sync::Arc;

/// A boxed, thread-safe error.
pub type BoxError = Box<dyn core::error::Error + Send + Sync + 'static>;

/// Result type returned by every fallible lifecycle phase.
pub type NodeResult<T> = Result<T, Failure>;

/// An unrecoverable failure.
///
/// A `FatalError` is never recorded by a collector. It unwinds through the
/// task that produced it, aborting that subtree without graceful reporting,
/// and surfaces from the driver as
/// [`ExecutionError::Fatal`](crate::executor::ExecutionError::Fatal).
///
/// Lifecycle code raises it either by returning [`Failure::Fatal`] or by
/// panicking with it as payload via [`std::panic::panic_any`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("fatal: {message}")]
pub struct FatalError {
    message: String,
}

impl FatalError {
    /// Creates a new fatal error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A failure captured from one lifecycle phase.
#[derive(Debug, thiserror::Error)]
pub enum Failure {
    /// The phase returned an error.
    #[error("{0}")]
    Error(BoxError),

    /// The phase gave up on purpose, e.g. because an assumption did not hold.
    #[error("aborted: {0}")]
    Aborted(String),

    /// The phase panicked.
    #[error("panicked: {0}")]
    Panic(String),

    /// The phase hit an unrecoverable condition.
    #[error(transparent)]
    Fatal(FatalError),

    /// Several independent failures of the same node.
    #[error("{} failures: {}", .0.len(), join_messages(.0))]
    Multiple(Vec<Failure>),
}

impl Failure {
    /// Wraps an arbitrary error.
    #[must_use]
    pub fn new(error: impl Into<BoxError>) -> Self {
        Failure::Error(error.into())
    }

    /// Creates a failure from a plain message.
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Failure::Error(message.into())
    }

    /// Creates an aborted failure.
    #[must_use]
    pub fn aborted(reason: impl Into<String>) -> Self {
        Failure::Aborted(reason.into())
    }

    /// Creates a fatal failure.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Failure::Fatal(FatalError::new(message))
    }

    /// Converts a caught panic payload.
    ///
    /// Payloads carrying a [`FatalError`] become [`Failure::Fatal`]; string
    /// payloads keep their message.
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<FatalError>() {
            Ok(fatal) => return Failure::Fatal(*fatal),
            Err(other) => other,
        };
        Failure::Panic(panic_message(payload.as_ref()))
    }

    /// Returns `true` if this failure must not be captured.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Failure::Fatal(_))
    }

    /// Returns `true` if this failure represents an aborted execution.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Failure::Aborted(_))
    }
}

/// Extracts a human-readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(fatal) = payload.downcast_ref::<FatalError>() {
        fatal.to_string()
    } else if let Some(escaped) = payload.downcast_ref::<EscapedPanic>() {
        panic_message(escaped.0.as_ref())
    } else {
        "opaque panic payload".to_owned()
    }
}

/// A panic that escaped a task outside its lifecycle phases, for example from
/// a listener.
///
/// Collectors of enclosing nodes re-raise it instead of recording it.
pub(crate) struct EscapedPanic(pub(crate) Box<dyn Any + Send>);

impl EscapedPanic {
    /// Wraps `payload` unless it is fatal or already wrapped.
    pub(crate) fn wrap(payload: Box<dyn Any + Send>) -> Box<dyn Any + Send> {
        if (*payload).is::<FatalError>() || (*payload).is::<EscapedPanic>() {
            payload
        } else {
            Box::new(EscapedPanic(payload))
        }
    }
}

fn join_messages(failures: &[Failure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Outcome of executing a single node, as reported to listeners.
#[derive(Debug, Clone)]
pub enum TestExecutionResult {
    /// No phase failed.
    Successful,
    /// Execution was aborted; the node neither passed nor failed.
    Aborted(Arc<Failure>),
    /// At least one phase failed.
    Failed(Arc<Failure>),
}

impl TestExecutionResult {
    /// Creates a failed result from a single failure.
    #[must_use]
    pub fn failed(failure: Failure) -> Self {
        TestExecutionResult::Failed(Arc::new(failure))
    }

    /// Creates an aborted result.
    #[must_use]
    pub fn aborted(failure: Failure) -> Self {
        TestExecutionResult::Aborted(Arc::new(failure))
    }

    /// Builds a result from the failures collected for one node.
    ///
    /// No failures yields [`Successful`](Self::Successful). A single aborted
    /// failure yields [`Aborted`](Self::Aborted). Anything else is
    /// [`Failed`](Self::Failed), with several failures combined into
    /// [`Failure::Multiple`].
    #[must_use]
    pub fn from_failures(mut failures: Vec<Failure>) -> Self {
        match failures.len() {
            0 => TestExecutionResult::Successful,
            1 => {
                let failure = failures.remove(0);
                if failure.is_aborted() {
                    Self::aborted(failure)
                } else {
                    Self::failed(failure)
                }
            }
            _ => Self::failed(Failure::Multiple(failures)),
        }
    }

    /// Returns the status without the failure payload.
    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            TestExecutionResult::Successful => Status::Successful,
            TestExecutionResult::Aborted(_) => Status::Aborted,
            TestExecutionResult::Failed(_) => Status::Failed,
        }
    }

    /// Returns the failure, if any.
    #[must_use]
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            TestExecutionResult::Successful => None,
            TestExecutionResult::Aborted(failure) | TestExecutionResult::Failed(failure) => {
                Some(failure)
            }
        }
    }

    /// Returns `true` for [`Successful`](Self::Successful).
    #[must_use]
    pub fn is_successful(&self) -> bool {
        matches!(self, TestExecutionResult::Successful)
    }
}

/// Status of a [`TestExecutionResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// No phase failed.
    Successful,
    /// Execution was aborted.
    Aborted,
    /// At least one phase failed.
    Failed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Successful => write!(f, "successful"),
            Status::Aborted => write!(f, "aborted"),
            Status::Failed => write!(f, "failed"),
        }
    }
}
