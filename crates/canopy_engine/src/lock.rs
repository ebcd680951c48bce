//! Resource locks.
//!
//! The [`LockManager`] hands out one shared read-write lock per resource key.
//! A [`ResourceLock`] bundles the locks a task needs. It is acquired before
//! the task runs and released, in reverse order, once the task and its inline
//! subtree are done.
//!
//! Locks inside a [`ResourceLock::Composite`] are always stored in the order
//! defined by [`ExclusiveResource`]'s `Ord` implementation. Every task
//! therefore acquires overlapping locks in the same order, which rules out
//! circular waits between concurrently running siblings.

use core::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, Mutex, RawRwLock, RwLock};

use crate::resource::{ExclusiveResource, LockMode, distinct_sorted};

/// A single lock on one resource key in one mode.
#[derive(Clone)]
pub struct SingleLock {
    resource: ExclusiveResource,
    lock: Arc<RwLock<()>>,
}

impl SingleLock {
    /// Returns the resource this lock guards.
    #[must_use]
    pub fn resource(&self) -> &ExclusiveResource {
        &self.resource
    }

    fn acquire(&self) -> HeldLock {
        match self.resource.mode() {
            LockMode::Read => HeldLock::Read(self.lock.read_arc()),
            LockMode::ReadWrite => HeldLock::Write(self.lock.write_arc()),
        }
    }
}

impl fmt::Debug for SingleLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleLock")
            .field("resource", &self.resource)
            .finish()
    }
}

/// The lock a task must hold while it executes.
#[derive(Debug, Clone, Default)]
pub enum ResourceLock {
    /// No resources; acquiring is a no-op.
    #[default]
    Nop,
    /// Exactly one resource key.
    Single(SingleLock),
    /// Several resource keys, in acquisition order.
    Composite(Vec<SingleLock>),
}

impl ResourceLock {
    /// Blocks until every underlying lock is held.
    ///
    /// The returned guard releases the locks in reverse acquisition order
    /// when dropped.
    #[must_use = "the lock is released as soon as the guard is dropped"]
    pub fn acquire(&self) -> ResourceLockGuard {
        let held = match self {
            ResourceLock::Nop => Vec::new(),
            ResourceLock::Single(lock) => vec![lock.acquire()],
            ResourceLock::Composite(locks) => locks.iter().map(SingleLock::acquire).collect(),
        };
        ResourceLockGuard { held }
    }

    /// Returns the resources covered by this lock, in acquisition order.
    #[must_use]
    pub fn resources(&self) -> Vec<&ExclusiveResource> {
        match self {
            ResourceLock::Nop => Vec::new(),
            ResourceLock::Single(lock) => vec![lock.resource()],
            ResourceLock::Composite(locks) => locks.iter().map(SingleLock::resource).collect(),
        }
    }

    /// Returns `true` for [`ResourceLock::Nop`].
    #[must_use]
    pub fn is_nop(&self) -> bool {
        matches!(self, ResourceLock::Nop)
    }
}

enum HeldLock {
    Read(ArcRwLockReadGuard<RawRwLock, ()>),
    Write(ArcRwLockWriteGuard<RawRwLock, ()>),
}

/// Guard returned by [`ResourceLock::acquire`].
pub struct ResourceLockGuard {
    held: Vec<HeldLock>,
}

impl ResourceLockGuard {
    /// Returns the number of underlying locks held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// Returns `true` if no lock is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

impl Drop for ResourceLockGuard {
    fn drop(&mut self) {
        while let Some(held) = self.held.pop() {
            drop(held);
        }
    }
}

impl fmt::Debug for ResourceLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLockGuard")
            .field("held", &self.held.len())
            .finish()
    }
}

/// Owns the lock table of a run: one [`RwLock`] per resource key.
#[derive(Default)]
pub struct LockManager {
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl LockManager {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock for a set of resource declarations.
    ///
    /// Declarations are deduplicated per key (the stronger mode wins) and
    /// sorted into acquisition order.
    #[must_use]
    pub fn lock_for_resources(
        &self,
        resources: impl IntoIterator<Item = ExclusiveResource>,
    ) -> ResourceLock {
        let mut locks: Vec<SingleLock> = distinct_sorted(resources)
            .into_iter()
            .map(|resource| self.single(resource))
            .collect();

        match locks.len() {
            0 => ResourceLock::Nop,
            1 => ResourceLock::Single(locks.remove(0)),
            _ => ResourceLock::Composite(locks),
        }
    }

    /// Returns the number of distinct keys seen so far.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.locks.lock().len()
    }

    fn single(&self, resource: ExclusiveResource) -> SingleLock {
        let lock = Arc::clone(
            self.locks
                .lock()
                .entry(resource.key().to_owned())
                .or_insert_with(|| Arc::new(RwLock::new(()))),
        );
        SingleLock { resource, lock }
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("keys", &self.key_count())
            .finish()
    }
}
