//! The flush sweep.
//!
//! One sweep visits a bounded batch of stores in registry order, starting at
//! the continuation cursor, and flushes the dirty ones. Individual flush
//! failures are recorded and do not abort the sweep; the failing store stays
//! dirty and is retried on a later pass. The sweep holds the registry lock
//! (shared or exclusive depending on mode) and the load/unload lock for its
//! whole duration, and performs no I/O beyond the per-store flush calls.

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::StoreFailure;
use crate::registry::{StoreRegistry, SweepCursor};

/// How the registry lock is taken for a sweep.
#[derive(Debug, Clone, Copy)]
pub(crate) enum LockMode {
    /// Shared acquisition bounded by a timeout. Timing out aborts the sweep
    /// and schedules a retry; it is not a failure.
    Cooperative(Duration),
    /// Unbounded exclusive acquisition, used when a forced flush is
    /// outstanding.
    Exclusive,
}

/// Parameters for one sweep invocation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SweepRequest {
    pub mode: LockMode,
    pub cursor: SweepCursor,
    /// Maximum stores visited. Forced sweeps pass `usize::MAX` to walk the
    /// whole registry in one pass.
    pub budget: usize,
}

/// What a completed sweep observed.
#[derive(Debug)]
pub(crate) struct SweepReport {
    /// Where the next sweep resumes.
    pub next_cursor: SweepCursor,
    /// Stores flushed successfully.
    pub flushed: usize,
    /// Visited stores whose dirty bit was still set at the end of the walk:
    /// flush failures, residual dirt, and stores re-dirtied by racing
    /// mutations after their visit.
    pub still_dirty: usize,
    /// Per-store flush failures, in sweep order.
    pub failures: Vec<StoreFailure>,
    /// True if any failure was storage exhaustion.
    pub storage_exhausted: bool,
    /// True if a critical store was flushed successfully this sweep.
    pub critical_flushed: bool,
    /// True if the batch stopped before the end of the registry.
    pub more_work: bool,
}

/// Sweep outcome, from the scheduler's point of view.
#[derive(Debug)]
pub(crate) enum SweepResult {
    /// Cooperative lock acquisition timed out. Retry after the interval.
    Contended,
    /// Shutdown was observed; exit without re-arming.
    ShuttingDown,
    /// The sweep ran; here is what happened.
    Completed(SweepReport),
}

/// Runs one sweep. `shutting_down` is polled at the top and before each
/// store; an in-progress store flush is always allowed to complete so no
/// partial write is abandoned mid-stream.
pub(crate) fn run_sweep(
    registry: &dyn StoreRegistry,
    request: SweepRequest,
    shutting_down: impl Fn() -> bool,
) -> SweepResult {
    if registry.is_shutting_down() || shutting_down() {
        return SweepResult::ShuttingDown;
    }

    match request.mode {
        LockMode::Cooperative(timeout) => {
            if !registry.acquire_shared(timeout) {
                debug!(timeout_ms = timeout.as_millis() as u64, "registry lock contended, sweep deferred");
                return SweepResult::Contended;
            }
        }
        LockMode::Exclusive => registry.acquire_exclusive(),
    }
    registry.lock_load_unload();

    // Flush at least one store per invocation, whatever the caller asked.
    let budget = request.budget.max(1);
    let batch = registry.enumerate(request.cursor, budget);

    let mut report = SweepReport {
        next_cursor: batch.next,
        flushed: 0,
        still_dirty: 0,
        failures: Vec::new(),
        storage_exhausted: false,
        critical_flushed: false,
        more_work: !batch.done,
    };

    let mut aborted = false;
    for store in &batch.stores {
        if shutting_down() || registry.is_shutting_down() {
            aborted = true;
            break;
        }
        if store.lazy_flush_exempt() || !store.is_dirty() {
            continue;
        }

        match store.flush() {
            Ok(outcome) => {
                report.flushed += 1;
                if !outcome.still_dirty && store.is_critical() {
                    report.critical_flushed = true;
                }
            }
            Err(err) => {
                if err.is_storage_exhausted() {
                    report.storage_exhausted = true;
                }
                warn!(store = store.name(), error = %err, "store flush failed, will retry");
                report.failures.push(StoreFailure {
                    store: store.name().to_string(),
                    source: err,
                });
            }
        }
    }

    if !aborted {
        // Re-sum dirty bits across the whole batch after the walk: a racing
        // mutation can re-dirty a store after it was visited (or flushed),
        // and that residual dirt must keep the retrigger loop alive.
        report.still_dirty = batch
            .stores
            .iter()
            .filter(|store| !store.lazy_flush_exempt() && store.is_dirty())
            .count();
    }

    registry.unlock_load_unload();
    registry.release();

    if aborted {
        return SweepResult::ShuttingDown;
    }

    debug!(
        visited = batch.stores.len(),
        flushed = report.flushed,
        still_dirty = report.still_dirty,
        failures = report.failures.len(),
        more_work = report.more_work,
        "sweep complete"
    );

    SweepResult::Completed(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use crate::store::{FlushOutcome, HiveStore, MemoryStore, StoreFlushError};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct FailingStore {
        name: String,
        dirty: AtomicBool,
        error: StoreFlushError,
    }

    impl FailingStore {
        fn new(name: &str, error: StoreFlushError) -> Self {
            Self {
                name: name.to_string(),
                dirty: AtomicBool::new(true),
                error,
            }
        }
    }

    impl HiveStore for FailingStore {
        fn name(&self) -> &str {
            &self.name
        }
        fn is_dirty(&self) -> bool {
            self.dirty.load(Ordering::SeqCst)
        }
        fn flush(&self) -> Result<FlushOutcome, StoreFlushError> {
            Err(self.error.clone())
        }
    }

    fn cooperative(cursor: SweepCursor, budget: usize) -> SweepRequest {
        SweepRequest {
            mode: LockMode::Cooperative(Duration::from_millis(100)),
            cursor,
            budget,
        }
    }

    fn completed(result: SweepResult) -> SweepReport {
        match result {
            SweepResult::Completed(report) => report,
            other => panic!("expected completed sweep, got {other:?}"),
        }
    }

    #[test]
    fn test_sweep_flushes_dirty_stores_within_budget() {
        let registry = MemoryRegistry::new();
        let stores: Vec<Arc<MemoryStore>> = (0..5)
            .map(|i| Arc::new(MemoryStore::new(format!("hive-{i}"))))
            .collect();
        for store in &stores {
            store.mark_dirty();
            registry.load(Arc::clone(store) as _);
        }

        let report = completed(run_sweep(&registry, cooperative(SweepCursor::START, 2), || false));
        assert_eq!(report.flushed, 2);
        assert!(report.more_work);
        assert_eq!(report.next_cursor, SweepCursor::at(2));
        assert!(stores[0].flush_count() == 1 && stores[1].flush_count() == 1);
        assert_eq!(stores[2].flush_count(), 0);
    }

    #[test]
    fn test_sweep_skips_clean_and_exempt_stores() {
        let registry = MemoryRegistry::new();
        let clean = Arc::new(MemoryStore::new("clean"));
        let exempt = Arc::new(MemoryStore::new("exempt").exempt());
        exempt.mark_dirty();
        let dirty = Arc::new(MemoryStore::new("dirty"));
        dirty.mark_dirty();
        registry.load(Arc::clone(&clean) as _);
        registry.load(Arc::clone(&exempt) as _);
        registry.load(Arc::clone(&dirty) as _);

        let report = completed(run_sweep(&registry, cooperative(SweepCursor::START, 10), || false));
        assert_eq!(report.flushed, 1);
        assert!(!report.more_work);
        assert_eq!(clean.flush_count(), 0);
        assert_eq!(exempt.flush_count(), 0);
        assert_eq!(dirty.flush_count(), 1);
        // Exempt stores stay dirty and stay out of the residual count.
        assert!(exempt.is_dirty());
        assert_eq!(report.still_dirty, 0);
    }

    #[test]
    fn test_sweep_records_failure_and_continues() {
        let registry = MemoryRegistry::new();
        let failing = Arc::new(FailingStore::new(
            "broken",
            StoreFlushError::Io {
                message: "short write".to_string(),
            },
        ));
        let healthy = Arc::new(MemoryStore::new("healthy"));
        healthy.mark_dirty();
        registry.load(Arc::clone(&failing) as _);
        registry.load(Arc::clone(&healthy) as _);

        let report = completed(run_sweep(&registry, cooperative(SweepCursor::START, 10), || false));
        assert_eq!(report.flushed, 1);
        assert_eq!(report.still_dirty, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].store, "broken");
        assert!(!report.storage_exhausted);
        assert_eq!(healthy.flush_count(), 1);
    }

    #[test]
    fn test_sweep_flags_storage_exhaustion() {
        let registry = MemoryRegistry::new();
        registry.load(Arc::new(FailingStore::new(
            "full",
            StoreFlushError::StorageExhausted,
        )) as _);

        let report = completed(run_sweep(&registry, cooperative(SweepCursor::START, 10), || false));
        assert!(report.storage_exhausted);
        assert_eq!(report.failures.len(), 1);
    }

    #[test]
    fn test_sweep_reports_critical_flush_success() {
        let registry = MemoryRegistry::new();
        let critical = Arc::new(MemoryStore::new("system").critical());
        critical.mark_dirty();
        registry.load(Arc::clone(&critical) as _);

        let report = completed(run_sweep(&registry, cooperative(SweepCursor::START, 10), || false));
        assert!(report.critical_flushed);
    }

    struct RedirtyingStore {
        name: String,
        dirty: AtomicBool,
        target: Arc<MemoryStore>,
    }

    impl HiveStore for RedirtyingStore {
        fn name(&self) -> &str {
            &self.name
        }
        fn is_dirty(&self) -> bool {
            self.dirty.load(Ordering::SeqCst)
        }
        fn flush(&self) -> Result<FlushOutcome, StoreFlushError> {
            // A racing mutation path dirties a store the walk already
            // passed over.
            self.target.mark_dirty();
            self.dirty.store(false, Ordering::SeqCst);
            Ok(FlushOutcome { still_dirty: false })
        }
    }

    #[test]
    fn test_sweep_recounts_stores_redirtied_during_walk() {
        let registry = MemoryRegistry::new();
        let early = Arc::new(MemoryStore::new("early"));
        let late = Arc::new(RedirtyingStore {
            name: "late".to_string(),
            dirty: AtomicBool::new(true),
            target: Arc::clone(&early),
        });
        registry.load(Arc::clone(&early) as _);
        registry.load(Arc::clone(&late) as _);

        // "early" is clean when visited, then re-dirtied by "late"'s flush.
        let report = completed(run_sweep(&registry, cooperative(SweepCursor::START, 10), || false));
        assert_eq!(report.flushed, 1);
        assert!(!report.more_work);
        assert_eq!(report.still_dirty, 1, "re-dirtied store not recounted");
    }

    #[test]
    fn test_sweep_counts_residual_dirt_after_partial_flush() {
        struct PartialStore {
            dirty: AtomicBool,
        }
        impl HiveStore for PartialStore {
            fn name(&self) -> &str {
                "partial"
            }
            fn is_dirty(&self) -> bool {
                self.dirty.load(Ordering::SeqCst)
            }
            fn flush(&self) -> Result<FlushOutcome, StoreFlushError> {
                Ok(FlushOutcome { still_dirty: true })
            }
        }

        let registry = MemoryRegistry::new();
        registry.load(Arc::new(PartialStore {
            dirty: AtomicBool::new(true),
        }) as _);

        let report = completed(run_sweep(&registry, cooperative(SweepCursor::START, 10), || false));
        assert_eq!(report.flushed, 1);
        assert_eq!(report.still_dirty, 1);
    }

    #[test]
    fn test_sweep_defers_on_lock_contention() {
        let registry = MemoryRegistry::new();
        registry.load(Arc::new(MemoryStore::new("a")) as _);
        registry.acquire_exclusive();

        let request = SweepRequest {
            mode: LockMode::Cooperative(Duration::from_millis(20)),
            cursor: SweepCursor::START,
            budget: 10,
        };
        assert!(matches!(
            run_sweep(&registry, request, || false),
            SweepResult::Contended
        ));
        registry.release();
    }

    #[test]
    fn test_sweep_exits_on_shutdown_without_flushing() {
        let registry = MemoryRegistry::new();
        let store = Arc::new(MemoryStore::new("a"));
        store.mark_dirty();
        registry.load(Arc::clone(&store) as _);
        registry.begin_shutdown();

        assert!(matches!(
            run_sweep(&registry, cooperative(SweepCursor::START, 10), || false),
            SweepResult::ShuttingDown
        ));
        assert_eq!(store.flush_count(), 0);
    }

    #[test]
    fn test_forced_sweep_walks_whole_registry() {
        let registry = MemoryRegistry::new();
        let stores: Vec<Arc<MemoryStore>> = (0..5)
            .map(|i| Arc::new(MemoryStore::new(format!("hive-{i}"))))
            .collect();
        for store in &stores {
            store.mark_dirty();
            registry.load(Arc::clone(store) as _);
        }

        let request = SweepRequest {
            mode: LockMode::Exclusive,
            cursor: SweepCursor::START,
            budget: usize::MAX,
        };
        let report = completed(run_sweep(&registry, request, || false));
        assert_eq!(report.flushed, 5);
        assert!(!report.more_work);
        assert_eq!(report.next_cursor, SweepCursor::START);
    }
}
