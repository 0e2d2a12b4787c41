//! Store registry interface.
//!
//! The registry is the process-wide collection of open hive stores. It is
//! owned by the hive-management layer; the scheduler only enumerates it in
//! registry order, bounded batches at a time, resuming from a cursor. Two
//! locks guard the sweep:
//! - the registry lock, the writer-exclusion point for "flush vs. unload"
//! - the load/unload lock, so stores cannot appear or vanish mid-sweep
//!
//! `MemoryRegistry` is the in-memory reference implementation used by
//! embedders and the test suite.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::lock::RegistryLock;
use crate::store::HiveStoreRef;

/// Continuation token for a batch-limited sweep.
///
/// Positions are registry-order indices; a sweep that stops mid-registry
/// resumes where it left off instead of restarting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepCursor(usize);

impl SweepCursor {
    /// Cursor at the head of the registry.
    pub const START: Self = Self(0);

    /// Raw registry-order index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }

    /// Cursor at an explicit registry-order index.
    #[must_use]
    pub const fn at(index: usize) -> Self {
        Self(index)
    }
}

impl Default for SweepCursor {
    fn default() -> Self {
        Self::START
    }
}

/// One bounded slice of the registry, in registry order.
#[derive(Clone)]
pub struct RegistryBatch {
    /// Stores in this batch.
    pub stores: Vec<HiveStoreRef>,
    /// Cursor for the next batch.
    pub next: SweepCursor,
    /// True if this batch reached the end of the registry: the cursor in
    /// `next` has wrapped to the start and a full pass is complete.
    pub done: bool,
}

/// Process-wide collection of open hive stores.
///
/// Lock acquisition and release are explicit calls because the sweep holds
/// the lock across several trait-object boundaries; implementations track
/// holder mode internally.
pub trait StoreRegistry: Send + Sync {
    /// Enumerate up to `max` stores starting at `cursor`.
    fn enumerate(&self, cursor: SweepCursor, max: usize) -> RegistryBatch;

    /// Number of registered stores.
    fn count(&self) -> usize;

    /// True once the owning process is shutting down; sweeps observing this
    /// exit without flushing or re-arming.
    fn is_shutting_down(&self) -> bool;

    /// Cooperative (shared) lock acquisition, bounded by `timeout`.
    /// Returns false on timeout.
    fn acquire_shared(&self, timeout: Duration) -> bool;

    /// Exclusive lock acquisition, used by force flush. Unbounded.
    fn acquire_exclusive(&self);

    /// Release the registry lock, shared or exclusive.
    fn release(&self);

    /// Prevent loads and unloads until the matching unlock.
    fn lock_load_unload(&self);

    /// Allow loads and unloads again.
    fn unlock_load_unload(&self);
}

/// In-memory store registry.
///
/// Registry order is load order. `load` and `unload` take the load/unload
/// lock themselves, so they block while a sweep is walking the registry.
pub struct MemoryRegistry {
    stores: Mutex<Vec<HiveStoreRef>>,
    lock: RegistryLock,
    load_unload: RegistryLock,
    shutting_down: AtomicBool,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stores: Mutex::new(Vec::new()),
            lock: RegistryLock::new(),
            load_unload: RegistryLock::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Registers a store at the end of registry order.
    pub fn load(&self, store: HiveStoreRef) {
        self.load_unload.acquire_exclusive();
        self.stores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(store);
        self.load_unload.release();
    }

    /// Removes a store by name. Returns true if it was present.
    pub fn unload(&self, name: &str) -> bool {
        self.load_unload.acquire_exclusive();
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        let before = stores.len();
        stores.retain(|s| s.name() != name);
        let removed = stores.len() != before;
        drop(stores);
        self.load_unload.release();
        removed
    }

    /// Marks the registry as shutting down. Irreversible.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreRegistry for MemoryRegistry {
    fn enumerate(&self, cursor: SweepCursor, max: usize) -> RegistryBatch {
        let stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        let len = stores.len();
        // The registry may have shrunk since the cursor was taken.
        let start = cursor.index().min(len);
        let end = start.saturating_add(max).min(len);
        let batch: Vec<HiveStoreRef> = stores[start..end].iter().map(Arc::clone).collect();
        let done = end >= len;
        RegistryBatch {
            stores: batch,
            next: if done {
                SweepCursor::START
            } else {
                SweepCursor::at(end)
            },
            done,
        }
    }

    fn count(&self) -> usize {
        self.stores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn acquire_shared(&self, timeout: Duration) -> bool {
        self.lock.acquire_shared(timeout)
    }

    fn acquire_exclusive(&self) {
        self.lock.acquire_exclusive();
    }

    fn release(&self) {
        self.lock.release();
    }

    fn lock_load_unload(&self) {
        self.load_unload.acquire_exclusive();
    }

    fn unlock_load_unload(&self) {
        self.load_unload.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn registry_with(names: &[&str]) -> MemoryRegistry {
        let registry = MemoryRegistry::new();
        for name in names {
            registry.load(Arc::new(MemoryStore::new(*name)));
        }
        registry
    }

    #[test]
    fn test_enumerate_batches_cover_registry_without_duplicates() {
        let registry = registry_with(&["a", "b", "c", "d", "e"]);

        let mut seen = Vec::new();
        let mut cursor = SweepCursor::START;
        let mut batches = 0;
        loop {
            let batch = registry.enumerate(cursor, 2);
            batches += 1;
            seen.extend(batch.stores.iter().map(|s| s.name().to_string()));
            cursor = batch.next;
            if batch.done {
                break;
            }
        }

        assert_eq!(batches, 3);
        assert_eq!(seen, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(cursor, SweepCursor::START);
    }

    #[test]
    fn test_enumerate_empty_registry_is_done() {
        let registry = MemoryRegistry::new();
        let batch = registry.enumerate(SweepCursor::START, 4);
        assert!(batch.stores.is_empty());
        assert!(batch.done);
        assert_eq!(batch.next, SweepCursor::START);
    }

    #[test]
    fn test_enumerate_clamps_stale_cursor() {
        let registry = registry_with(&["a", "b", "c"]);
        registry.unload("b");
        registry.unload("c");

        // Cursor taken when the registry was longer.
        let batch = registry.enumerate(SweepCursor::at(2), 2);
        assert!(batch.stores.is_empty());
        assert!(batch.done);
    }

    #[test]
    fn test_unload_removes_store() {
        let registry = registry_with(&["a", "b"]);
        assert!(registry.unload("a"));
        assert!(!registry.unload("a"));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_shutdown_flag() {
        let registry = MemoryRegistry::new();
        assert!(!registry.is_shutting_down());
        registry.begin_shutdown();
        assert!(registry.is_shutting_down());
    }
}
