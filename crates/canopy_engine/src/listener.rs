//! Execution events and their consumers.
//!
//! The engine reports progress exclusively through an
//! [`EngineExecutionListener`]. For every node it emits either a single
//! `execution_skipped`, or `execution_started` followed by exactly one
//! `execution_finished`. Dynamically discovered nodes are announced with
//! `dynamic_test_registered` first.
//!
//! Listeners are invoked from whichever thread runs the node, so
//! implementations must be `Send + Sync`.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use canopy_engine::listener::{ListenerRegistry, LoggingListener};
//! use canopy_engine::testkit::EventRecorder;
//!
//! let registry = ListenerRegistry::new();
//! registry.register("log", Arc::new(LoggingListener::new()))?;
//! registry.register("recorder", Arc::new(EventRecorder::new()))?;
//! assert_eq!(registry.names(), vec!["log", "recorder"]);
//! # Ok::<(), canopy_engine::listener::ListenerRegistrationError>(())
//! ```

use std::sync::Arc;

use parking_lot::RwLock;

use crate::descriptor::Descriptor;
use crate::result::{Status, TestExecutionResult};

/// Receives the events of a run. Every callback defaults to a no-op.
pub trait EngineExecutionListener: Send + Sync {
    /// A node was discovered while its parent was executing.
    fn dynamic_test_registered(&self, _descriptor: &dyn Descriptor) {}

    /// A node will not run.
    fn execution_skipped(&self, _descriptor: &dyn Descriptor, _reason: &str) {}

    /// A node started.
    fn execution_started(&self, _descriptor: &dyn Descriptor) {}

    /// A started node finished, including all of its children.
    fn execution_finished(&self, _descriptor: &dyn Descriptor, _result: &TestExecutionResult) {}
}

/// A listener that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl EngineExecutionListener for NoopListener {}

// ─────────────────────────────────────────────────────────────────────────────
// ListenerRegistry
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur while registering listeners.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListenerRegistrationError {
    /// A listener with this name is already registered.
    #[error("listener '{name}' is already registered")]
    DuplicateName {
        /// The duplicate name.
        name: String,
    },
}

struct ListenerEntry {
    name: String,
    listener: Arc<dyn EngineExecutionListener>,
}

/// Fans events out to named listeners, in registration order.
///
/// The registry is itself a listener, so it can be handed to the engine
/// directly.
#[derive(Default)]
pub struct ListenerRegistry {
    entries: RwLock<Vec<ListenerEntry>>,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `listener` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerRegistrationError::DuplicateName`] if `name` is taken.
    pub fn register(
        &self,
        name: impl Into<String>,
        listener: Arc<dyn EngineExecutionListener>,
    ) -> Result<&Self, ListenerRegistrationError> {
        let name = name.into();
        let mut entries = self.entries.write();
        if entries.iter().any(|entry| entry.name == name) {
            return Err(ListenerRegistrationError::DuplicateName { name });
        }
        entries.push(ListenerEntry { name, listener });
        Ok(self)
    }

    /// Removes the listener registered under `name`, returning it.
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn EngineExecutionListener>> {
        let mut entries = self.entries.write();
        let index = entries.iter().position(|entry| entry.name == name)?;
        Some(entries.remove(index).listener)
    }

    /// Returns the registered names, in order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .map(|entry| entry.name.clone())
            .collect()
    }

    /// Returns the number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn each(&self, mut f: impl FnMut(&dyn EngineExecutionListener)) {
        let listeners: Vec<_> = self
            .entries
            .read()
            .iter()
            .map(|entry| Arc::clone(&entry.listener))
            .collect();
        for listener in &listeners {
            f(listener.as_ref());
        }
    }
}

impl EngineExecutionListener for ListenerRegistry {
    fn dynamic_test_registered(&self, descriptor: &dyn Descriptor) {
        self.each(|listener| listener.dynamic_test_registered(descriptor));
    }

    fn execution_skipped(&self, descriptor: &dyn Descriptor, reason: &str) {
        self.each(|listener| listener.execution_skipped(descriptor, reason));
    }

    fn execution_started(&self, descriptor: &dyn Descriptor) {
        self.each(|listener| listener.execution_started(descriptor));
    }

    fn execution_finished(&self, descriptor: &dyn Descriptor, result: &TestExecutionResult) {
        self.each(|listener| listener.execution_finished(descriptor, result));
    }
}

impl core::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("names", &self.names())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LoggingListener
// ─────────────────────────────────────────────────────────────────────────────

/// Reports every event through `tracing`.
///
/// Registrations, starts and successful finishes are logged at `debug`,
/// skips and aborts at `info`, and failures at `warn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingListener;

impl LoggingListener {
    /// Creates the listener.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl EngineExecutionListener for LoggingListener {
    fn dynamic_test_registered(&self, descriptor: &dyn Descriptor) {
        tracing::debug!(
            id = %descriptor.unique_id(),
            name = descriptor.display_name(),
            "dynamic node registered"
        );
    }

    fn execution_skipped(&self, descriptor: &dyn Descriptor, reason: &str) {
        tracing::info!(
            id = %descriptor.unique_id(),
            name = descriptor.display_name(),
            reason,
            "skipped"
        );
    }

    fn execution_started(&self, descriptor: &dyn Descriptor) {
        tracing::debug!(
            id = %descriptor.unique_id(),
            name = descriptor.display_name(),
            "started"
        );
    }

    fn execution_finished(&self, descriptor: &dyn Descriptor, result: &TestExecutionResult) {
        let id = descriptor.unique_id();
        let name = descriptor.display_name();
        match (result.status(), result.failure()) {
            (Status::Failed, Some(failure)) => {
                tracing::warn!(%id, name, error = %failure, "failed");
            }
            (Status::Aborted, Some(failure)) => {
                tracing::info!(%id, name, reason = %failure, "aborted");
            }
            (status, _) => tracing::debug!(%id, name, %status, "finished"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::TestDescriptor;
    use crate::node::EmptyNode;
    use crate::unique_id::UniqueId;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Counting {
        started: AtomicUsize,
    }

    impl EngineExecutionListener for Counting {
        fn execution_started(&self, _descriptor: &dyn Descriptor) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Ordered {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl EngineExecutionListener for Ordered {
        fn execution_started(&self, _descriptor: &dyn Descriptor) {
            self.log.lock().push(self.name);
        }
    }

    fn descriptor() -> Arc<TestDescriptor<()>> {
        TestDescriptor::test(UniqueId::for_engine("canopy").append("case", "x"), "x", EmptyNode)
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = ListenerRegistry::new();
        registry.register("a", Arc::new(NoopListener)).unwrap();

        let error = registry.register("a", Arc::new(NoopListener)).unwrap_err();
        assert_eq!(
            error,
            ListenerRegistrationError::DuplicateName { name: "a".into() }
        );
        assert_eq!(error.to_string(), "listener 'a' is already registered");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn events_fan_out_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ListenerRegistry::new();
        registry
            .register("first", Arc::new(Ordered { name: "first", log: Arc::clone(&log) }))
            .unwrap()
            .register("second", Arc::new(Ordered { name: "second", log: Arc::clone(&log) }))
            .unwrap();

        registry.execution_started(&*descriptor());
        assert_eq!(*log.lock(), vec!["first", "second"]);
    }

    #[test]
    fn unregistered_listeners_stop_receiving_events() {
        let counting = Arc::new(Counting::default());
        let registry = ListenerRegistry::new();
        registry.register("count", counting.clone()).unwrap();

        registry.execution_started(&*descriptor());
        assert!(registry.unregister("count").is_some());
        registry.execution_started(&*descriptor());

        assert_eq!(counting.started.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
        assert!(registry.unregister("count").is_none());
    }
}
