//! Exclusive resource declarations.
//!
//! Nodes declare the external resources they touch, for example a system
//! property, an environment variable or a shared file, as
//! [`ExclusiveResource`]s. The engine uses these declarations to serialize
//! nodes that would otherwise race on the same resource.
//!
//! # Conflict Rules
//!
//! For two declarations on the same key:
//! - Read + Read: OK (multiple readers allowed)
//! - Read + `ReadWrite`: CONFLICT
//! - `ReadWrite` + `ReadWrite`: CONFLICT
//!
//! Declarations on different keys never conflict.

use core::cmp::Ordering;
use core::fmt;

/// Key of the resource that stands for "everything".
///
/// A node holding it in [`LockMode::ReadWrite`] runs in isolation from every
/// other locked node: the advisor then adds a shared global lock to every
/// other node that declares resources.
pub const GLOBAL_KEY: &str = "canopy.engine.GLOBAL";

/// The mode of access to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared, read-only access.
    Read,
    /// Exclusive, read-write access.
    ReadWrite,
}

impl LockMode {
    fn rank(self) -> u8 {
        match self {
            LockMode::ReadWrite => 0,
            LockMode::Read => 1,
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Read => write!(f, "READ"),
            LockMode::ReadWrite => write!(f, "READ_WRITE"),
        }
    }
}

/// A named external resource together with the required access mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExclusiveResource {
    key: String,
    mode: LockMode,
}

impl ExclusiveResource {
    /// Creates a new declaration.
    #[must_use]
    pub fn new(key: impl Into<String>, mode: LockMode) -> Self {
        Self {
            key: key.into(),
            mode,
        }
    }

    /// Declares shared read access to `key`.
    #[must_use]
    pub fn read(key: impl Into<String>) -> Self {
        Self::new(key, LockMode::Read)
    }

    /// Declares exclusive read-write access to `key`.
    #[must_use]
    pub fn read_write(key: impl Into<String>) -> Self {
        Self::new(key, LockMode::ReadWrite)
    }

    /// Declares shared access to the global resource.
    #[must_use]
    pub fn global_read() -> Self {
        Self::read(GLOBAL_KEY)
    }

    /// Declares exclusive access to the global resource, isolating the node.
    #[must_use]
    pub fn global_read_write() -> Self {
        Self::read_write(GLOBAL_KEY)
    }

    /// Returns the resource key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the access mode.
    #[must_use]
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Returns `true` if this is the global resource.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.key == GLOBAL_KEY
    }

    /// Checks whether two declarations may not be held concurrently.
    #[must_use]
    pub fn conflicts_with(&self, other: &ExclusiveResource) -> bool {
        self.key == other.key
            && (self.mode == LockMode::ReadWrite || other.mode == LockMode::ReadWrite)
    }
}

impl fmt::Display for ExclusiveResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.key, self.mode)
    }
}

/// Lock acquisition order: the global key first, then keys ascending, and
/// [`LockMode::ReadWrite`] before [`LockMode::Read`] on the same key.
impl Ord for ExclusiveResource {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .is_global()
            .cmp(&self.is_global())
            .then_with(|| self.key.cmp(&other.key))
            .then_with(|| self.mode.rank().cmp(&other.mode.rank()))
    }
}

impl PartialOrd for ExclusiveResource {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Checks whether any declaration in `a` conflicts with any declaration in `b`.
#[must_use]
pub fn any_conflict(a: &[ExclusiveResource], b: &[ExclusiveResource]) -> bool {
    a.iter().any(|x| b.iter().any(|y| x.conflicts_with(y)))
}

/// Returns the keys on which `a` and `b` conflict.
///
/// Useful for generating detailed diagnostics.
#[must_use]
pub fn find_conflicts<'a>(a: &'a [ExclusiveResource], b: &[ExclusiveResource]) -> Vec<&'a str> {
    let mut conflicts = Vec::new();
    for x in a {
        if b.iter().any(|y| x.conflicts_with(y)) && !conflicts.contains(&x.key()) {
            conflicts.push(x.key());
        }
    }
    conflicts
}

/// Collapses declarations to one per key, sorted in lock acquisition order.
///
/// If a key is declared both [`Read`](LockMode::Read) and
/// [`ReadWrite`](LockMode::ReadWrite), the stronger mode wins.
#[must_use]
pub fn distinct_sorted(resources: impl IntoIterator<Item = ExclusiveResource>) -> Vec<ExclusiveResource> {
    let mut sorted: Vec<_> = resources.into_iter().collect();
    sorted.sort();
    // ReadWrite sorts before Read for the same key, so keeping the first
    // declaration of each key keeps the strongest mode.
    sorted.dedup_by(|later, earlier| later.key == earlier.key);
    sorted
}
