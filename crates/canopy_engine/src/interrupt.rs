//! Per-thread interrupt flags.
//!
//! Node implementations that enforce timeouts interrupt the thread running a
//! slow phase through its [`InterruptHandle`]. Cooperative code polls
//! [`is_interrupted`] or sleeps through [`sleep`], which wakes up early when
//! the flag is set.
//!
//! The engine clears the flag of the executing thread after every task, so an
//! interrupt that user code leaves behind never leaks into the next task run
//! on the same worker.

use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use std::sync::Arc;
use std::thread::{self, Thread};
use std::time::Instant;

thread_local! {
    static CURRENT: InterruptHandle = InterruptHandle::for_current_thread();
}

/// The sleep ended early because the thread was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("thread was interrupted")]
pub struct Interrupted;

/// Handle to one thread's interrupt flag.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
    thread: Thread,
}

impl InterruptHandle {
    fn for_current_thread() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            thread: thread::current(),
        }
    }

    /// Sets the flag and wakes the thread if it is parked.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.thread.unpark();
    }

    /// Returns `true` if the flag is set.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns the name of the owning thread.
    #[must_use]
    pub fn thread_name(&self) -> Option<&str> {
        self.thread.name()
    }
}

/// Returns the handle of the calling thread.
#[must_use]
pub fn current() -> InterruptHandle {
    CURRENT.with(Clone::clone)
}

/// Returns `true` if the calling thread's flag is set.
#[must_use]
pub fn is_interrupted() -> bool {
    CURRENT.with(InterruptHandle::is_interrupted)
}

/// Clears the calling thread's flag, returning whether it was set.
pub fn clear() -> bool {
    CURRENT.with(|handle| handle.flag.swap(false, Ordering::SeqCst))
}

/// Sleeps for `duration` unless the calling thread is interrupted first.
///
/// The flag is left set on early return.
///
/// # Errors
///
/// Returns [`Interrupted`] if the flag was set before or during the sleep.
pub fn sleep(duration: Duration) -> Result<(), Interrupted> {
    let deadline = Instant::now() + duration;
    loop {
        if is_interrupted() {
            return Err(Interrupted);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        thread::park_timeout(deadline - now);
    }
}
