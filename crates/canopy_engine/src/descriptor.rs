//! The discovered tree of executable nodes.
//!
//! A [`TestDescriptor`] pairs a [`Node`] implementation with its identity and
//! position in the tree. Parents own their children; children keep a weak
//! back-reference used for lookup only.
//!
//! Children may be appended while the tree is executing, which is how
//! dynamically discovered nodes join the tree. Readers always work on a
//! snapshot of the child list.

use core::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::node::{ExecutionContext, Node};
use crate::unique_id::UniqueId;

/// Whether a descriptor groups other descriptors, is a test, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    /// Groups children and is not itself a test.
    Container,
    /// A test without children of its own.
    Test,
    /// A test that may also have children, e.g. a test factory.
    ContainerAndTest,
}

impl DescriptorKind {
    /// Returns `true` for kinds that may hold children.
    #[must_use]
    pub fn is_container(self) -> bool {
        matches!(self, DescriptorKind::Container | DescriptorKind::ContainerAndTest)
    }

    /// Returns `true` for kinds that count as a test.
    #[must_use]
    pub fn is_test(self) -> bool {
        matches!(self, DescriptorKind::Test | DescriptorKind::ContainerAndTest)
    }
}

/// Read-only view of a descriptor, independent of its context type.
///
/// Listeners and lifecycle notifications receive descriptors through this
/// trait.
pub trait Descriptor: Send + Sync {
    /// Returns the unique id.
    fn unique_id(&self) -> &UniqueId;

    /// Returns the human-readable name.
    fn display_name(&self) -> &str;

    /// Returns the kind.
    fn kind(&self) -> DescriptorKind;

    /// Returns the unique id of the parent, if attached.
    fn parent_id(&self) -> Option<UniqueId>;
}

/// A node in the execution tree.
pub struct TestDescriptor<C: ExecutionContext> {
    unique_id: UniqueId,
    display_name: String,
    kind: DescriptorKind,
    node: Box<dyn Node<C>>,
    parent: RwLock<Weak<TestDescriptor<C>>>,
    children: RwLock<Vec<Arc<TestDescriptor<C>>>>,
}

impl<C: ExecutionContext> TestDescriptor<C> {
    /// Creates a detached descriptor.
    #[must_use]
    pub fn new(
        unique_id: UniqueId,
        display_name: impl Into<String>,
        kind: DescriptorKind,
        node: impl Node<C>,
    ) -> Arc<Self> {
        Arc::new(Self {
            unique_id,
            display_name: display_name.into(),
            kind,
            node: Box::new(node),
            parent: RwLock::new(Weak::new()),
            children: RwLock::new(Vec::new()),
        })
    }

    /// Creates a detached [`DescriptorKind::Container`].
    #[must_use]
    pub fn container(
        unique_id: UniqueId,
        display_name: impl Into<String>,
        node: impl Node<C>,
    ) -> Arc<Self> {
        Self::new(unique_id, display_name, DescriptorKind::Container, node)
    }

    /// Creates a detached [`DescriptorKind::Test`].
    #[must_use]
    pub fn test(
        unique_id: UniqueId,
        display_name: impl Into<String>,
        node: impl Node<C>,
    ) -> Arc<Self> {
        Self::new(unique_id, display_name, DescriptorKind::Test, node)
    }

    /// Appends `child` and points its parent reference at `self`.
    ///
    /// Returns `self` so that trees can be assembled fluently.
    pub fn add_child(self: &Arc<Self>, child: Arc<Self>) -> &Arc<Self> {
        *child.parent.write() = Arc::downgrade(self);
        self.children.write().push(child);
        self
    }

    /// Returns a snapshot of the current children, in order.
    #[must_use]
    pub fn children(&self) -> Vec<Arc<Self>> {
        self.children.read().clone()
    }

    /// Returns `true` if no child has been attached.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.read().is_empty()
    }

    /// Returns the parent, if it is attached and still alive.
    #[must_use]
    pub fn parent(&self) -> Option<Arc<Self>> {
        self.parent.read().upgrade()
    }

    /// Returns the lifecycle implementation.
    #[must_use]
    pub fn node(&self) -> &dyn Node<C> {
        self.node.as_ref()
    }

    /// Finds the descriptor with `id` in this subtree.
    #[must_use]
    pub fn find_by_unique_id(self: &Arc<Self>, id: &UniqueId) -> Option<Arc<Self>> {
        if &self.unique_id == id {
            return Some(Arc::clone(self));
        }
        if !id.has_prefix(&self.unique_id) {
            return None;
        }
        self.children()
            .iter()
            .find_map(|child| child.find_by_unique_id(id))
    }

    /// Returns all descendants in depth-first pre-order.
    #[must_use]
    pub fn descendants(&self) -> Vec<Arc<Self>> {
        let mut out = Vec::new();
        let mut stack: Vec<_> = self.children().into_iter().rev().collect();
        while let Some(next) = stack.pop() {
            stack.extend(next.children().into_iter().rev());
            out.push(next);
        }
        out
    }
}

impl<C: ExecutionContext> Descriptor for TestDescriptor<C> {
    fn unique_id(&self) -> &UniqueId {
        &self.unique_id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn kind(&self) -> DescriptorKind {
        self.kind
    }

    fn parent_id(&self) -> Option<UniqueId> {
        self.parent().map(|parent| parent.unique_id.clone())
    }
}

impl<C: ExecutionContext> fmt::Debug for TestDescriptor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestDescriptor")
            .field("unique_id", &self.unique_id)
            .field("display_name", &self.display_name)
            .field("kind", &self.kind)
            .field("children", &self.children.read().len())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for dyn Descriptor + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.display_name(), self.unique_id())
    }
}
