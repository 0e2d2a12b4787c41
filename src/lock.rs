//! Registry lock primitive.
//!
//! A single writer-exclusion lock with reader counting. The sweep takes it
//! shared on the cooperative path (bounded by a timeout so a busy registry
//! only delays the sweep, never wedges it) and exclusive on the force-flush
//! path. Guard types do not fit the acquire/release contract the registry
//! trait exposes, so acquisition and release are explicit calls.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    writer: bool,
}

/// Shared/exclusive lock with a timed shared acquisition.
///
/// Release does not need to know the mode: a holder is a writer exactly when
/// the writer flag is set, otherwise it is one of the counted readers.
#[derive(Debug, Default)]
pub struct RegistryLock {
    state: Mutex<LockState>,
    cond: Condvar,
}

impl RegistryLock {
    /// Creates an unheld lock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock shared, waiting at most `timeout`.
    ///
    /// Returns false if the timeout elapsed with a writer still active.
    pub fn acquire_shared(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while state.writer {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, result) = self
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
            if result.timed_out() && state.writer {
                return false;
            }
        }
        state.readers += 1;
        true
    }

    /// Acquires the lock exclusive, waiting indefinitely.
    pub fn acquire_exclusive(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while state.writer || state.readers > 0 {
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.writer = true;
    }

    /// Releases one holder, shared or exclusive.
    pub fn release(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.writer {
            state.writer = false;
        } else {
            debug_assert!(state.readers > 0, "release without a holder");
            state.readers = state.readers.saturating_sub(1);
        }
        drop(state);
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_shared_acquire_is_reentrant_across_holders() {
        let lock = RegistryLock::new();
        assert!(lock.acquire_shared(Duration::from_millis(10)));
        assert!(lock.acquire_shared(Duration::from_millis(10)));
        lock.release();
        lock.release();
    }

    #[test]
    fn test_shared_times_out_against_writer() {
        let lock = Arc::new(RegistryLock::new());
        lock.acquire_exclusive();

        let contender = Arc::clone(&lock);
        let handle =
            thread::spawn(move || contender.acquire_shared(Duration::from_millis(50)));
        assert!(!handle.join().unwrap());

        lock.release();
        assert!(lock.acquire_shared(Duration::from_millis(50)));
        lock.release();
    }

    #[test]
    fn test_exclusive_waits_for_readers() {
        let lock = Arc::new(RegistryLock::new());
        assert!(lock.acquire_shared(Duration::from_millis(10)));

        let writer = Arc::clone(&lock);
        let handle = thread::spawn(move || {
            writer.acquire_exclusive();
            writer.release();
        });

        // Give the writer a chance to block, then let it through.
        thread::sleep(Duration::from_millis(20));
        lock.release();
        handle.join().unwrap();
    }

    #[test]
    fn test_shared_succeeds_after_writer_releases_within_timeout() {
        let lock = Arc::new(RegistryLock::new());
        lock.acquire_exclusive();

        let reader = Arc::clone(&lock);
        let handle =
            thread::spawn(move || reader.acquire_shared(Duration::from_millis(500)));

        thread::sleep(Duration::from_millis(30));
        lock.release();
        assert!(handle.join().unwrap());
    }
}
