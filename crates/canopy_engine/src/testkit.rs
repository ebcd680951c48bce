//! Recording listener for asserting on event streams.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use canopy_engine::prelude::*;
//! use canopy_engine::testkit::{EventKind, EventRecorder};
//!
//! let root = TestDescriptor::<()>::container(UniqueId::for_engine("demo"), "demo", EmptyNode);
//! let recorder = Arc::new(EventRecorder::new());
//!
//! HierarchicalTestExecutor::new(ExecutionRequest::new(root, recorder.clone(), ()))
//!     .execute()
//!     .expect("run completes");
//!
//! assert_eq!(recorder.count(EventKind::Started), 1);
//! assert!(recorder.is_well_formed());
//! ```

use std::time::Instant;

use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;

use crate::descriptor::Descriptor;
use crate::listener::EngineExecutionListener;
use crate::result::{Status, TestExecutionResult};
use crate::unique_id::UniqueId;

/// Kind of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `dynamic_test_registered`.
    DynamicRegistered,
    /// `execution_skipped`.
    Skipped,
    /// `execution_started`.
    Started,
    /// `execution_finished`.
    Finished,
}

/// Payload of a recorded event.
#[derive(Debug, Clone)]
pub enum EventPayload {
    /// No payload.
    None,
    /// The skip reason.
    Reason(String),
    /// The execution result.
    Result(TestExecutionResult),
}

/// One recorded event.
#[derive(Debug, Clone)]
pub struct ExecutionEvent {
    /// What happened.
    pub kind: EventKind,
    /// The node it happened to.
    pub id: UniqueId,
    /// The node's parent, if attached.
    pub parent_id: Option<UniqueId>,
    /// The node's display name.
    pub display_name: String,
    /// Reason or result.
    pub payload: EventPayload,
    /// When the event was recorded.
    pub at: Instant,
}

impl ExecutionEvent {
    /// Returns the result of a finished event.
    #[must_use]
    pub fn result(&self) -> Option<&TestExecutionResult> {
        match &self.payload {
            EventPayload::Result(result) => Some(result),
            _ => None,
        }
    }

    /// Returns the reason of a skipped event.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Reason(reason) => Some(reason),
            _ => None,
        }
    }
}

/// A listener that records every event in arrival order.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Mutex<Vec<ExecutionEvent>>,
}

impl EventRecorder {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, kind: EventKind, descriptor: &dyn Descriptor, payload: EventPayload) {
        let event = ExecutionEvent {
            kind,
            id: descriptor.unique_id().clone(),
            parent_id: descriptor.parent_id(),
            display_name: descriptor.display_name().to_owned(),
            payload,
            at: Instant::now(),
        };
        self.events.lock().push(event);
    }

    /// Returns a copy of all events.
    #[must_use]
    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().clone()
    }

    /// Returns the events of one node.
    #[must_use]
    pub fn events_for(&self, id: &UniqueId) -> Vec<ExecutionEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| &event.id == id)
            .cloned()
            .collect()
    }

    /// Returns the event kinds of one node, in order.
    #[must_use]
    pub fn kinds_for(&self, id: &UniqueId) -> Vec<EventKind> {
        self.events_for(id).iter().map(|event| event.kind).collect()
    }

    /// Returns the first event of `kind` for the node whose display name is
    /// `name`.
    #[must_use]
    pub fn find(&self, name: &str, kind: EventKind) -> Option<ExecutionEvent> {
        self.events
            .lock()
            .iter()
            .find(|event| event.display_name == name && event.kind == kind)
            .cloned()
    }

    /// Returns the skipped or finished event of one node.
    #[must_use]
    pub fn terminal_event(&self, id: &UniqueId) -> Option<ExecutionEvent> {
        self.events_for(id)
            .into_iter()
            .find(|event| matches!(event.kind, EventKind::Skipped | EventKind::Finished))
    }

    /// Returns the status a node finished with.
    #[must_use]
    pub fn status_of(&self, id: &UniqueId) -> Option<Status> {
        self.terminal_event(id)
            .and_then(|event| event.result().map(TestExecutionResult::status))
    }

    /// Returns the number of events of `kind`.
    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.kind == kind)
            .count()
    }

    /// Returns the position of the first event of `kind` for `id`.
    #[must_use]
    pub fn position(&self, id: &UniqueId, kind: EventKind) -> Option<usize> {
        self.events
            .lock()
            .iter()
            .position(|event| &event.id == id && event.kind == kind)
    }

    /// Checks the ordering guarantees of the event stream:
    ///
    /// - every node has at most one terminal event,
    /// - `finished` is preceded by `started`, and `skipped` by nothing but a
    ///   registration,
    /// - a node's events happen between its parent's `started` and
    ///   `finished`.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.violations().is_empty()
    }

    /// Describes every ordering violation found in the event stream.
    #[must_use]
    pub fn violations(&self) -> Vec<String> {
        let events = self.events.lock();
        let mut violations = Vec::new();
        let mut started: HashSet<&UniqueId> = HashSet::new();
        let mut terminated: HashMap<&UniqueId, EventKind> = HashMap::new();

        for event in events.iter() {
            let id = &event.id;
            if let Some(previous) = terminated.get(id) {
                violations.push(format!("{id}: {:?} after {previous:?}", event.kind));
                continue;
            }

            if !matches!(event.kind, EventKind::DynamicRegistered)
                && let Some(parent) = &event.parent_id
                && !started.contains(parent)
                && events.iter().any(|other| &other.id == parent)
            {
                violations.push(format!("{id}: {:?} before parent started", event.kind));
            }
            if let Some(parent) = &event.parent_id
                && terminated.contains_key(parent)
            {
                violations.push(format!("{id}: {:?} after parent terminated", event.kind));
            }

            match event.kind {
                EventKind::DynamicRegistered => {}
                EventKind::Started => {
                    if !started.insert(id) {
                        violations.push(format!("{id}: started twice"));
                    }
                }
                EventKind::Finished => {
                    if !started.contains(id) {
                        violations.push(format!("{id}: finished without start"));
                    }
                    terminated.insert(id, EventKind::Finished);
                }
                EventKind::Skipped => {
                    if started.contains(id) {
                        violations.push(format!("{id}: skipped after start"));
                    }
                    terminated.insert(id, EventKind::Skipped);
                }
            }
        }

        for id in &started {
            if !terminated.contains_key(id) {
                violations.push(format!("{id}: started but never finished"));
            }
        }
        violations
    }

    /// Removes all recorded events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EngineExecutionListener for EventRecorder {
    fn dynamic_test_registered(&self, descriptor: &dyn Descriptor) {
        self.record(EventKind::DynamicRegistered, descriptor, EventPayload::None);
    }

    fn execution_skipped(&self, descriptor: &dyn Descriptor, reason: &str) {
        self.record(
            EventKind::Skipped,
            descriptor,
            EventPayload::Reason(reason.to_owned()),
        );
    }

    fn execution_started(&self, descriptor: &dyn Descriptor) {
        self.record(EventKind::Started, descriptor, EventPayload::None);
    }

    fn execution_finished(&self, descriptor: &dyn Descriptor, result: &TestExecutionResult) {
        self.record(
            EventKind::Finished,
            descriptor,
            EventPayload::Result(result.clone()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::TestDescriptor;
    use crate::node::EmptyNode;
    use std::sync::Arc;

    fn pair() -> (Arc<TestDescriptor<()>>, Arc<TestDescriptor<()>>) {
        let root_id = UniqueId::for_engine("canopy");
        let root = TestDescriptor::container(root_id.clone(), "root", EmptyNode);
        let child = TestDescriptor::test(root_id.append("case", "c"), "c", EmptyNode);
        root.add_child(Arc::clone(&child));
        (root, child)
    }

    #[test]
    fn well_formed_stream_has_no_violations() {
        let (root, child) = pair();
        let recorder = EventRecorder::new();
        recorder.execution_started(&*root);
        recorder.execution_started(&*child);
        recorder.execution_finished(&*child, &TestExecutionResult::Successful);
        recorder.execution_finished(&*root, &TestExecutionResult::Successful);

        assert!(recorder.is_well_formed(), "{:?}", recorder.violations());
        assert_eq!(recorder.count(EventKind::Started), 2);
        assert_eq!(
            recorder.kinds_for(child.unique_id()),
            vec![EventKind::Started, EventKind::Finished]
        );
        assert_eq!(recorder.status_of(child.unique_id()), Some(Status::Successful));
    }

    #[test]
    fn child_after_parent_finish_is_a_violation() {
        let (root, child) = pair();
        let recorder = EventRecorder::new();
        recorder.execution_started(&*root);
        recorder.execution_finished(&*root, &TestExecutionResult::Successful);
        recorder.execution_skipped(&*child, "late");

        assert!(!recorder.is_well_formed());
    }

    #[test]
    fn missing_finish_is_a_violation() {
        let (root, _) = pair();
        let recorder = EventRecorder::new();
        recorder.execution_started(&*root);

        assert_eq!(recorder.violations().len(), 1);
    }
}
