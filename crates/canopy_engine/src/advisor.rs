//! Scheduling decisions computed once per run.
//!
//! Before anything executes, the engine walks the discovered tree and records,
//! per unique id:
//!
//! - a forced [`ExecutionMode::SameThread`], where concurrent execution would
//!   be unsafe or was ruled out by an ancestor, and
//! - the [`ResourceLock`] a task must hold while it runs.
//!
//! # Rules
//!
//! - The root must not declare exclusive resources.
//! - The outermost node declaring resources locks the union of its own and its
//!   descendants' resources. All of its descendants run on its thread and get
//!   no lock of their own.
//! - A node whose effective mode is `SameThread` forces its whole subtree to
//!   `SameThread`.
//! - Siblings whose subtree resources conflict are forced to `SameThread`, so
//!   they run one after another.
//! - Once any node declares [`ExclusiveResource::global_read_write`], every
//!   other node with resources also takes [`ExclusiveResource::global_read`],
//!   so the isolated node never overlaps with another locked node.

use hashbrown::HashMap;
use std::sync::Arc;

use crate::descriptor::{Descriptor, TestDescriptor};
use crate::executor::ExecutionError;
use crate::lock::{LockManager, ResourceLock};
use crate::node::{ExecutionContext, ExecutionMode};
use crate::resource::{ExclusiveResource, LockMode, any_conflict, distinct_sorted};
use crate::unique_id::UniqueId;

/// Read-only map from unique id to forced execution mode and resource lock.
#[derive(Debug)]
pub struct ExecutionAdvisor {
    default_mode: ExecutionMode,
    forced_modes: HashMap<UniqueId, ExecutionMode>,
    locks: HashMap<UniqueId, ResourceLock>,
}

impl ExecutionAdvisor {
    /// Walks the tree below `root` and records the scheduling decisions.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::RootDeclaresResources`] if the root declares
    /// exclusive resources.
    pub fn build<C: ExecutionContext>(
        root: &Arc<TestDescriptor<C>>,
        default_mode: ExecutionMode,
        lock_manager: &LockManager,
    ) -> Result<Self, ExecutionError> {
        let declared = root.node().exclusive_resources();
        if !declared.is_empty() {
            return Err(ExecutionError::RootDeclaresResources {
                id: root.unique_id().clone(),
                resources: distinct_sorted(declared),
            });
        }

        let mut subtree_resources = HashMap::new();
        collect_subtree_resources(root, &mut subtree_resources);
        if requires_isolation(&subtree_resources) {
            share_global_read(&mut subtree_resources);
        }

        let mut advisor = Self {
            default_mode,
            forced_modes: HashMap::new(),
            locks: HashMap::new(),
        };
        let mut walker = Walker {
            advisor: &mut advisor,
            lock_manager,
            subtree_resources: &subtree_resources,
        };
        walker.visit(root, Inherited::default());

        tracing::debug!(
            forced = advisor.forced_modes.len(),
            locked = advisor.locks.len(),
            "execution advisor built"
        );
        Ok(advisor)
    }

    /// Creates an advisor without any overrides or locks.
    #[must_use]
    pub fn unrestricted(default_mode: ExecutionMode) -> Self {
        Self {
            default_mode,
            forced_modes: HashMap::new(),
            locks: HashMap::new(),
        }
    }

    /// Returns the mode nodes run in when they declare none.
    #[must_use]
    pub fn default_mode(&self) -> ExecutionMode {
        self.default_mode
    }

    /// Returns the forced mode of `id`, if any.
    #[must_use]
    pub fn forced_execution_mode(&self, id: &UniqueId) -> Option<ExecutionMode> {
        self.forced_modes.get(id).copied()
    }

    /// Returns the mode `descriptor` runs in.
    ///
    /// Forced modes win over declared modes, which win over the default.
    #[must_use]
    pub fn execution_mode<C: ExecutionContext>(
        &self,
        descriptor: &TestDescriptor<C>,
    ) -> ExecutionMode {
        self.forced_execution_mode(descriptor.unique_id())
            .or_else(|| descriptor.node().execution_mode())
            .unwrap_or(self.default_mode)
    }

    /// Returns the lock a task for `id` must hold. Unknown ids need none.
    #[must_use]
    pub fn resource_lock(&self, id: &UniqueId) -> ResourceLock {
        self.locks.get(id).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Inherited {
    same_thread: bool,
    under_lock: bool,
}

struct Walker<'a> {
    advisor: &'a mut ExecutionAdvisor,
    lock_manager: &'a LockManager,
    subtree_resources: &'a HashMap<UniqueId, Vec<ExclusiveResource>>,
}

impl Walker<'_> {
    fn visit<C: ExecutionContext>(&mut self, descriptor: &Arc<TestDescriptor<C>>, inherited: Inherited) {
        let id = descriptor.unique_id();
        let mut under_lock = inherited.under_lock;

        if !under_lock && !descriptor.node().exclusive_resources().is_empty() {
            let resources = self.resources_of(id).to_vec();
            let lock = self.lock_manager.lock_for_resources(resources);
            tracing::trace!(%id, resources = ?lock.resources(), "lock assigned");
            self.advisor.locks.insert(id.clone(), lock);
            under_lock = true;
        }

        if inherited.same_thread {
            self.advisor
                .forced_modes
                .insert(id.clone(), ExecutionMode::SameThread);
        }

        let children = descriptor.children();
        let conflicting = self.conflicting_siblings(&children);
        let subtree_same_thread =
            under_lock || self.advisor.execution_mode(descriptor) == ExecutionMode::SameThread;

        for (child, conflicts) in children.iter().zip(conflicting) {
            self.visit(
                child,
                Inherited {
                    same_thread: subtree_same_thread || conflicts,
                    under_lock,
                },
            );
        }
    }

    fn resources_of(&self, id: &UniqueId) -> &[ExclusiveResource] {
        self.subtree_resources.get(id).map_or(&[], Vec::as_slice)
    }

    fn conflicting_siblings<C: ExecutionContext>(
        &self,
        children: &[Arc<TestDescriptor<C>>],
    ) -> Vec<bool> {
        let resources: Vec<_> = children
            .iter()
            .map(|child| self.resources_of(child.unique_id()))
            .collect();

        (0..children.len())
            .map(|i| {
                (0..children.len()).any(|j| i != j && any_conflict(resources[i], resources[j]))
            })
            .collect()
    }
}

fn collect_subtree_resources<C: ExecutionContext>(
    descriptor: &Arc<TestDescriptor<C>>,
    out: &mut HashMap<UniqueId, Vec<ExclusiveResource>>,
) -> Vec<ExclusiveResource> {
    let mut resources = descriptor.node().exclusive_resources();
    for child in descriptor.children() {
        resources.extend(collect_subtree_resources(&child, out));
    }
    let resources = distinct_sorted(resources);
    out.insert(descriptor.unique_id().clone(), resources.clone());
    resources
}

fn requires_isolation(subtree_resources: &HashMap<UniqueId, Vec<ExclusiveResource>>) -> bool {
    subtree_resources
        .values()
        .flatten()
        .any(|resource| resource.is_global() && resource.mode() == LockMode::ReadWrite)
}

/// Adds a shared global lock to every subtree that locks anything.
fn share_global_read(subtree_resources: &mut HashMap<UniqueId, Vec<ExclusiveResource>>) {
    for resources in subtree_resources.values_mut() {
        if !resources.is_empty() {
            let mut widened = core::mem::take(resources);
            widened.push(ExclusiveResource::global_read());
            *resources = distinct_sorted(widened);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{EmptyNode, Node};

    struct Declaring {
        resources: Vec<ExclusiveResource>,
        mode: Option<ExecutionMode>,
    }

    impl Declaring {
        fn new(resources: Vec<ExclusiveResource>) -> Self {
            Self {
                resources,
                mode: None,
            }
        }
    }

    impl Node<()> for Declaring {
        fn exclusive_resources(&self) -> Vec<ExclusiveResource> {
            self.resources.clone()
        }

        fn execution_mode(&self) -> Option<ExecutionMode> {
            self.mode
        }
    }

    fn id(path: &[&str]) -> UniqueId {
        path.iter()
            .fold(UniqueId::for_engine("canopy"), |id, value| id.append("node", *value))
    }

    fn leaf(path: &[&str], resources: Vec<ExclusiveResource>) -> Arc<TestDescriptor<()>> {
        TestDescriptor::test(id(path), path.join("/"), Declaring::new(resources))
    }

    #[test]
    fn root_with_resources_is_rejected() {
        let root = TestDescriptor::container(
            id(&[]),
            "root",
            Declaring::new(vec![ExclusiveResource::read("R")]),
        );
        let error = ExecutionAdvisor::build(&root, ExecutionMode::Concurrent, &LockManager::new())
            .unwrap_err();
        assert!(matches!(error, ExecutionError::RootDeclaresResources { .. }));
    }

    #[test]
    fn lock_covers_descendants_and_forces_them_same_thread() {
        let root = TestDescriptor::container(id(&[]), "root", EmptyNode);
        let suite = TestDescriptor::container(
            id(&["suite"]),
            "suite",
            Declaring::new(vec![ExclusiveResource::read("a")]),
        );
        suite.add_child(leaf(&["suite", "x"], vec![ExclusiveResource::read_write("b")]));
        suite.add_child(leaf(&["suite", "y"], vec![ExclusiveResource::read_write("a")]));
        root.add_child(Arc::clone(&suite));

        let advisor =
            ExecutionAdvisor::build(&root, ExecutionMode::Concurrent, &LockManager::new()).unwrap();

        let lock = advisor.resource_lock(&id(&["suite"]));
        let covered: Vec<_> = lock.resources().into_iter().cloned().collect();
        assert_eq!(
            covered,
            vec![
                ExclusiveResource::read_write("a"),
                ExclusiveResource::read_write("b")
            ]
        );
        assert!(advisor.resource_lock(&id(&["suite", "x"])).is_nop());
        assert_eq!(
            advisor.forced_execution_mode(&id(&["suite", "x"])),
            Some(ExecutionMode::SameThread)
        );
        assert_eq!(advisor.forced_execution_mode(&id(&["suite"])), None);
        assert!(advisor.resource_lock(&id(&[])).is_nop());
    }

    #[test]
    fn conflicting_siblings_are_forced_same_thread() {
        let root = TestDescriptor::container(id(&[]), "root", EmptyNode);
        root.add_child(leaf(&["a"], vec![ExclusiveResource::read_write("R")]));
        root.add_child(leaf(&["b"], vec![ExclusiveResource::read("R")]));
        root.add_child(leaf(&["c"], vec![ExclusiveResource::read_write("other")]));

        let advisor =
            ExecutionAdvisor::build(&root, ExecutionMode::Concurrent, &LockManager::new()).unwrap();

        assert_eq!(
            advisor.forced_execution_mode(&id(&["a"])),
            Some(ExecutionMode::SameThread)
        );
        assert_eq!(
            advisor.forced_execution_mode(&id(&["b"])),
            Some(ExecutionMode::SameThread)
        );
        assert_eq!(advisor.forced_execution_mode(&id(&["c"])), None);
    }

    #[test]
    fn isolated_node_conflicts_with_every_locked_sibling() {
        let root = TestDescriptor::container(id(&[]), "root", EmptyNode);
        root.add_child(leaf(&["iso"], vec![ExclusiveResource::global_read_write()]));
        root.add_child(leaf(&["w"], vec![ExclusiveResource::read_write("R")]));
        root.add_child(leaf(&["free"], Vec::new()));

        let advisor =
            ExecutionAdvisor::build(&root, ExecutionMode::Concurrent, &LockManager::new()).unwrap();

        assert_eq!(
            advisor.forced_execution_mode(&id(&["iso"])),
            Some(ExecutionMode::SameThread)
        );
        assert_eq!(
            advisor.forced_execution_mode(&id(&["w"])),
            Some(ExecutionMode::SameThread)
        );
        assert_eq!(advisor.forced_execution_mode(&id(&["free"])), None);

        let lock = advisor.resource_lock(&id(&["w"]));
        let covered: Vec<_> = lock.resources().into_iter().cloned().collect();
        assert_eq!(
            covered,
            vec![
                ExclusiveResource::global_read(),
                ExclusiveResource::read_write("R")
            ]
        );
    }

    #[test]
    fn global_read_is_not_added_without_an_isolated_node() {
        let root = TestDescriptor::container(id(&[]), "root", EmptyNode);
        root.add_child(leaf(&["w"], vec![ExclusiveResource::read_write("R")]));

        let advisor =
            ExecutionAdvisor::build(&root, ExecutionMode::Concurrent, &LockManager::new()).unwrap();

        let lock = advisor.resource_lock(&id(&["w"]));
        let covered: Vec<_> = lock.resources().into_iter().cloned().collect();
        assert_eq!(covered, vec![ExclusiveResource::read_write("R")]);
    }

    #[test]
    fn same_thread_node_forces_its_subtree() {
        let root = TestDescriptor::container(id(&[]), "root", EmptyNode);
        let suite = TestDescriptor::container(
            id(&["suite"]),
            "suite",
            Declaring {
                resources: Vec::new(),
                mode: Some(ExecutionMode::SameThread),
            },
        );
        let child = TestDescriptor::test(
            id(&["suite", "x"]),
            "x",
            Declaring {
                resources: Vec::new(),
                mode: Some(ExecutionMode::Concurrent),
            },
        );
        suite.add_child(Arc::clone(&child));
        root.add_child(suite);

        let advisor =
            ExecutionAdvisor::build(&root, ExecutionMode::Concurrent, &LockManager::new()).unwrap();

        assert_eq!(advisor.execution_mode(&child), ExecutionMode::SameThread);
    }

    #[test]
    fn unknown_ids_fall_back_to_declared_or_default_mode() {
        let advisor = ExecutionAdvisor::unrestricted(ExecutionMode::SameThread);
        let plain = TestDescriptor::<()>::test(id(&["dyn"]), "dyn", EmptyNode);
        assert_eq!(advisor.execution_mode(&plain), ExecutionMode::SameThread);
        assert!(advisor.resource_lock(&id(&["dyn"])).is_nop());
    }
}
