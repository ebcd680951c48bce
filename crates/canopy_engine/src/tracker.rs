//! Guard against executing the same descriptor twice.

use hashbrown::HashSet;
use parking_lot::RwLock;

use crate::unique_id::UniqueId;

/// Records which unique ids have already been executed during a run.
///
/// Dynamic registration can race with the ordinary traversal of the tree, so
/// the set is shared between all tasks of a run and guarded by a [`RwLock`].
#[derive(Debug, Default)]
pub struct ExecutionTracker {
    executed: RwLock<HashSet<UniqueId>>,
}

impl ExecutionTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `id` as executed.
    ///
    /// Returns `false` if it had already been marked, in which case the caller
    /// must not execute it again.
    pub fn mark_executed(&self, id: &UniqueId) -> bool {
        if self.executed.read().contains(id) {
            return false;
        }
        self.executed.write().insert(id.clone())
    }

    /// Returns `true` if `id` has been marked as executed.
    #[must_use]
    pub fn was_already_executed(&self, id: &UniqueId) -> bool {
        self.executed.read().contains(id)
    }

    /// Returns the number of executed ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.executed.read().len()
    }

    /// Returns `true` if nothing has been executed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executed.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn first_mark_wins() {
        let tracker = ExecutionTracker::new();
        let id = UniqueId::for_engine("canopy").append("case", "a");

        assert!(!tracker.was_already_executed(&id));
        assert!(tracker.mark_executed(&id));
        assert!(tracker.was_already_executed(&id));
        assert!(!tracker.mark_executed(&id));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn concurrent_marks_admit_exactly_one_winner() {
        let tracker = Arc::new(ExecutionTracker::new());
        let id = UniqueId::for_engine("canopy").append("case", "contended");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                let id = id.clone();
                thread::spawn(move || tracker.mark_executed(&id))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread panicked"))
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
    }
}
