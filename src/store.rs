//! Hive store interface.
//!
//! A hive store is a hierarchical key/value namespace persisted to a backing
//! file. The scheduler never touches store internals: it only observes the
//! dirty bit and asks the store to flush. By using a trait, we enable:
//! - In-memory stores for testing and embedded use
//! - File-backed stores owned by a hive-management layer
//!
//! Mutation paths set the dirty bit; only a successful flush clears it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;

/// Errors a store can report from [`HiveStore::flush`].
#[derive(Debug, Clone, Error)]
pub enum StoreFlushError {
    /// The backing volume has no room for the write.
    ///
    /// Handled specially by the scheduler's disk-pressure path; retrying
    /// immediately without user intervention would spin.
    #[error("backing storage is exhausted")]
    StorageExhausted,

    /// Any other I/O failure. The store remains dirty and will be retried
    /// on the next sweep.
    #[error("flush I/O error: {message}")]
    Io {
        /// Description of the underlying failure.
        message: String,
    },
}

impl StoreFlushError {
    /// Returns true if this failure is storage exhaustion.
    #[must_use]
    pub const fn is_storage_exhausted(&self) -> bool {
        matches!(self, Self::StorageExhausted)
    }
}

/// Result of a successful flush call.
#[derive(Debug, Clone, Copy)]
pub struct FlushOutcome {
    /// True if the store re-dirtied during the flush (a racing mutation) or
    /// could only be partially persisted. It will be revisited.
    pub still_dirty: bool,
}

/// A flushable hive store, referenced (never owned) by the scheduler.
///
/// Implementations must be safe to call concurrently with their own mutation
/// paths; the scheduler serializes `flush` calls with load/unload through the
/// registry locks, nothing more.
pub trait HiveStore: Send + Sync {
    /// Stable, human-readable identity for logs and error reports.
    fn name(&self) -> &str;

    /// True if the store has in-memory mutations not yet persisted.
    fn is_dirty(&self) -> bool;

    /// True if this store holds critical configuration whose durability
    /// gates the disk-pressure warning lifecycle.
    fn is_critical(&self) -> bool {
        false
    }

    /// True if this store opted out of lazy flushing entirely. Exempt
    /// stores are never flushed by the sweep; their owner must flush them
    /// explicitly.
    fn lazy_flush_exempt(&self) -> bool {
        false
    }

    /// Persist dirty state to the backing file.
    ///
    /// # Errors
    /// [`StoreFlushError::StorageExhausted`] when the volume is full, any
    /// other failure as [`StoreFlushError::Io`]. On error the store stays
    /// dirty.
    fn flush(&self) -> Result<FlushOutcome, StoreFlushError>;
}

/// Shared handle to a hive store.
pub type HiveStoreRef = Arc<dyn HiveStore>;

/// In-memory hive store.
///
/// Reference implementation used by embedders without a file-backed hive
/// layer and throughout the test suite. "Flushing" just clears the dirty
/// bit and counts the call.
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    dirty: AtomicBool,
    critical: bool,
    exempt: bool,
    flush_count: AtomicU64,
}

impl MemoryStore {
    /// Creates a clean in-memory store.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dirty: AtomicBool::new(false),
            critical: false,
            exempt: false,
            flush_count: AtomicU64::new(0),
        }
    }

    /// Marks this store as holding critical configuration.
    #[must_use]
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Opts this store out of lazy flushing.
    #[must_use]
    pub fn exempt(mut self) -> Self {
        self.exempt = true;
        self
    }

    /// Sets the dirty bit, as a mutation path would.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Number of times `flush` has been called.
    #[must_use]
    pub fn flush_count(&self) -> u64 {
        self.flush_count.load(Ordering::SeqCst)
    }
}

impl HiveStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn is_critical(&self) -> bool {
        self.critical
    }

    fn lazy_flush_exempt(&self) -> bool {
        self.exempt
    }

    fn flush(&self) -> Result<FlushOutcome, StoreFlushError> {
        self.flush_count.fetch_add(1, Ordering::SeqCst);
        self.dirty.store(false, Ordering::SeqCst);
        Ok(FlushOutcome { still_dirty: false })
    }
}
