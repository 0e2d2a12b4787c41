//! The lazy-flush scheduler.
//!
//! Amortizes durability cost by batching writes of dirty store state to disk
//! on a timer instead of synchronously on every mutation. The pipeline is
//! timer -> trigger -> single-flight worker:
//!
//! ```text
//! mutation path ──mark_dirty──► FlushTimer ──expiry──► trigger
//!                                                         │ (pending guard,
//!                                                         ▼  bounded(1))
//!                                                   flush worker ──► sweep
//!                                                         │
//!                            re-arm / disk-pressure ◄─────┘
//! ```
//!
//! At most one sweep is queued or running at any time: the `pending` flag is
//! the scheduling-level mutex, independent of the registry lock that
//! protects the stores themselves. Scheduler-internal state lives behind its
//! own lightweight mutex so suspend/resume callers never block behind a slow
//! sweep.

mod sweep;

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::pressure::{dispatch_notice, DiskPressure, NotificationSink};
use crate::registry::{StoreRegistry, SweepCursor};
use crate::settings::FlushSettings;
use crate::store::HiveStoreRef;
use crate::timer::FlushTimer;

use sweep::{run_sweep, LockMode, SweepRequest, SweepResult};

/// Delay for an immediate re-trigger when a sweep leaves work behind.
const RETRIGGER_DELAY: Duration = Duration::ZERO;

/// Observability counters for the scheduler.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FlushStats {
    /// Sweeps that ran to completion (contended attempts excluded).
    pub sweeps: u64,
    /// Stores flushed successfully across all sweeps.
    pub stores_flushed: u64,
    /// Individual store flush failures across all sweeps.
    pub flush_failures: u64,
    /// Disk-pressure notices dispatched.
    pub notices: u64,
    /// When the last completed sweep finished.
    pub last_sweep_at: Option<DateTime<Utc>>,
    /// When the last disk-pressure notice was dispatched.
    pub last_notice_at: Option<DateTime<Utc>>,
    /// True while critical-store durability has not succeeded since the
    /// last storage exhaustion.
    pub disk_full_unresolved: bool,
}

#[derive(Debug)]
enum Job {
    Sweep,
    Stop,
}

/// Scheduler-internal state, guarded by one mutex.
struct SchedState {
    /// Single-flight guard: a sweep is queued or running.
    pending: bool,
    /// Lazy flushing is administratively suspended.
    held: bool,
    /// An escalated flush wants the next sweep exclusive and unbatched.
    force_requested: bool,
    /// Continuation position of the batch-limited sweep.
    cursor: SweepCursor,
    /// Terminal flag; nothing is scheduled after this is set.
    shutdown: bool,
    /// `start` has been called.
    started: bool,
    /// The boot grace period has expired (at most once per lifetime).
    grace_fired: bool,
    pressure: DiskPressure,
    stats: FlushStats,
}

struct Core {
    settings: FlushSettings,
    registry: Arc<dyn StoreRegistry>,
    sink: Arc<dyn NotificationSink>,
    state: Mutex<SchedState>,
    cond: Condvar,
    job_tx: Sender<Job>,
}

impl Core {
    fn lock_state(&self) -> MutexGuard<'_, SchedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_shutdown(&self) -> bool {
        self.lock_state().shutdown
    }

    /// Trigger callback: fast, non-blocking, run on timer threads.
    ///
    /// Does nothing while held (the timer is simply not re-armed; the next
    /// mutation or `resume` re-arms it) or while a sweep is already pending.
    fn trigger(&self) {
        {
            let mut state = self.lock_state();
            if state.shutdown || state.held || state.pending {
                return;
            }
            state.pending = true;
        }

        match self.job_tx.try_send(Job::Sweep) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                // Worker gone (shutdown race) or slot unexpectedly full;
                // either way this trigger did not enqueue work.
                self.lock_state().pending = false;
                self.cond.notify_all();
            }
        }
    }

    /// Grace-period expiry: unconditionally lift the hold, once.
    fn grace_expired(&self) {
        {
            let mut state = self.lock_state();
            if state.shutdown || state.grace_fired {
                return;
            }
            state.grace_fired = true;
            if !state.held {
                return;
            }
            state.held = false;
        }
        info!("boot grace period expired, lazy flushing force-enabled");
        self.trigger();
    }

    /// Runs one scheduled (worker-thread) sweep and decides re-arming.
    fn run_scheduled_sweep(&self, timer: &FlushTimer) {
        let (mode, cursor, budget) = {
            let state = self.lock_state();
            if state.shutdown {
                drop(state);
                self.clear_pending();
                return;
            }
            if state.force_requested {
                (LockMode::Exclusive, SweepCursor::START, usize::MAX)
            } else {
                (
                    LockMode::Cooperative(self.settings.lock_timeout),
                    state.cursor,
                    self.settings.batch_size,
                )
            }
        };

        let result = run_sweep(
            self.registry.as_ref(),
            SweepRequest { mode, cursor, budget },
            || self.is_shutdown(),
        );

        match result {
            SweepResult::ShuttingDown => {
                self.clear_pending();
            }
            SweepResult::Contended => {
                // Retry, not failure: try again after a full interval.
                self.clear_pending();
                timer.arm(self.settings.interval);
            }
            SweepResult::Completed(report) => {
                let notice = {
                    let mut state = self.lock_state();
                    state.cursor = report.next_cursor;
                    state.force_requested = false;
                    state.pending = false;

                    state.stats.sweeps += 1;
                    state.stats.stores_flushed += report.flushed as u64;
                    state.stats.flush_failures += report.failures.len() as u64;
                    state.stats.last_sweep_at = Some(Utc::now());

                    let notice = state
                        .pressure
                        .record_sweep(report.storage_exhausted, report.critical_flushed);
                    if notice {
                        state.stats.notices += 1;
                        state.stats.last_notice_at = Some(Utc::now());
                    }
                    notice
                };
                self.cond.notify_all();

                if notice {
                    warn!("storage exhausted while flushing, raising one-time notice");
                    dispatch_notice(&self.sink);
                }

                if report.storage_exhausted {
                    // Keep attempting; the user may free disk space.
                    timer.arm(self.settings.interval);
                } else if report.more_work || report.still_dirty > 0 {
                    // Keep going until the whole registry is clean.
                    timer.arm(RETRIGGER_DELAY);
                }
            }
        }
    }

    fn clear_pending(&self) {
        self.lock_state().pending = false;
        self.cond.notify_all();
    }
}

fn worker_loop(core: &Core, timer: &FlushTimer, rx: &Receiver<Job>) {
    loop {
        match rx.recv() {
            Ok(Job::Sweep) => core.run_scheduled_sweep(timer),
            Ok(Job::Stop) | Err(_) => break,
        }
    }
}

/// The lazy-flush scheduler.
///
/// One instance per process, constructed explicitly with its collaborators
/// injected (store registry, notification sink) and torn down explicitly via
/// [`shutdown`](Self::shutdown) or `Drop`.
pub struct FlushScheduler {
    core: Arc<Core>,
    timer: Arc<FlushTimer>,
    grace: FlushTimer,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FlushScheduler {
    /// Creates a scheduler. Timers and the worker thread are spawned here,
    /// but nothing is armed until [`start`](Self::start).
    ///
    /// # Errors
    /// [`SchedulerError::InvalidArgument`] if the settings are invalid.
    pub fn new(
        settings: FlushSettings,
        registry: Arc<dyn StoreRegistry>,
        sink: Arc<dyn NotificationSink>,
    ) -> SchedulerResult<Self> {
        let settings = settings.validate()?;
        let start_held = settings.start_held;

        let (job_tx, job_rx) = bounded::<Job>(1);
        let core = Arc::new(Core {
            settings,
            registry,
            sink,
            state: Mutex::new(SchedState {
                pending: false,
                held: start_held,
                force_requested: false,
                cursor: SweepCursor::START,
                shutdown: false,
                started: false,
                grace_fired: false,
                pressure: DiskPressure::default(),
                stats: FlushStats::default(),
            }),
            cond: Condvar::new(),
            job_tx,
        });

        let trigger_core = Arc::clone(&core);
        let timer = Arc::new(FlushTimer::new("flush-timer", move || {
            trigger_core.trigger();
        }));

        let grace_core = Arc::clone(&core);
        let grace = FlushTimer::new("grace-timer", move || {
            grace_core.grace_expired();
        });

        let worker_core = Arc::clone(&core);
        let worker_timer = Arc::clone(&timer);
        let worker = thread::Builder::new()
            .name("hiveflush-worker".to_string())
            .spawn(move || worker_loop(&worker_core, &worker_timer, &job_rx))
            .expect("failed to spawn hiveflush worker thread");

        Ok(Self {
            core,
            timer,
            grace,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Arms the recurring sweep timer and the one-shot boot-grace timer.
    ///
    /// # Errors
    /// [`SchedulerError::AlreadyInitialized`] on a second call,
    /// [`SchedulerError::ShutDown`] after shutdown.
    pub fn start(&self) -> SchedulerResult<()> {
        {
            let mut state = self.core.lock_state();
            if state.shutdown {
                return Err(SchedulerError::ShutDown);
            }
            if state.started {
                return Err(SchedulerError::AlreadyInitialized);
            }
            state.started = true;
        }

        self.timer.arm(self.core.settings.interval);
        self.grace.arm(self.core.settings.boot_grace);
        info!(
            interval_ms = self.core.settings.interval.as_millis() as u64,
            batch_size = self.core.settings.batch_size,
            "flush scheduler started"
        );
        Ok(())
    }

    /// Called by mutation paths whenever `store` becomes dirty: arms the
    /// sweep timer unless flushing is held.
    ///
    /// The timer is armed even while a sweep is in flight: a store dirtied
    /// mid-sweep would otherwise never be revisited once that sweep ends a
    /// clean pass. Arming is earliest-deadline-wins and the trigger's
    /// single-flight guard absorbs the redundant expiry, so this cannot
    /// stack sweeps.
    ///
    /// Never blocks and never surfaces errors; transient conditions are
    /// resolved by retry scheduling.
    pub fn mark_dirty_and_maybe_schedule(&self, store: &HiveStoreRef) {
        {
            let state = self.core.lock_state();
            if state.shutdown || state.held {
                return;
            }
        }
        debug!(store = store.name(), "dirty store, arming flush timer");
        self.timer.arm(self.core.settings.interval);
    }

    /// Escalated, synchronous durability request: runs one exclusive,
    /// unbatched sweep immediately and blocks until it completes.
    ///
    /// # Errors
    /// [`SchedulerError::ShutDown`] if the scheduler is (or becomes) shut
    /// down, [`SchedulerError::ForceFlushFailed`] aggregating every store
    /// that failed; the remaining stores are still flushed.
    pub fn force_flush_all(&self) -> SchedulerResult<()> {
        {
            let mut state = self.core.lock_state();
            if state.shutdown {
                return Err(SchedulerError::ShutDown);
            }
            state.force_requested = true;
            // Wait for any in-flight sweep to finish; `pending` is the
            // scheduling-level mutex.
            while state.pending {
                state = self
                    .core
                    .cond
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
                if state.shutdown {
                    return Err(SchedulerError::ShutDown);
                }
            }
            state.pending = true;
        }

        let result = run_sweep(
            self.core.registry.as_ref(),
            SweepRequest {
                mode: LockMode::Exclusive,
                cursor: SweepCursor::START,
                budget: usize::MAX,
            },
            || self.core.is_shutdown(),
        );

        match result {
            SweepResult::ShuttingDown => {
                let mut state = self.core.lock_state();
                state.pending = false;
                state.force_requested = false;
                drop(state);
                self.core.cond.notify_all();
                Err(SchedulerError::ShutDown)
            }
            SweepResult::Contended => {
                // Exclusive acquisition never times out.
                unreachable!("forced sweep reported lock contention")
            }
            SweepResult::Completed(report) => {
                let notice = {
                    let mut state = self.core.lock_state();
                    state.pending = false;
                    state.force_requested = false;
                    state.cursor = SweepCursor::START;

                    state.stats.sweeps += 1;
                    state.stats.stores_flushed += report.flushed as u64;
                    state.stats.flush_failures += report.failures.len() as u64;
                    state.stats.last_sweep_at = Some(Utc::now());

                    let notice = state
                        .pressure
                        .record_sweep(report.storage_exhausted, report.critical_flushed);
                    if notice {
                        state.stats.notices += 1;
                        state.stats.last_notice_at = Some(Utc::now());
                    }
                    notice
                };
                self.core.cond.notify_all();

                if notice {
                    warn!("storage exhausted during forced flush, raising one-time notice");
                    dispatch_notice(&self.core.sink);
                }

                if report.failures.is_empty() {
                    Ok(())
                } else {
                    Err(SchedulerError::ForceFlushFailed {
                        failures: report.failures,
                    })
                }
            }
        }
    }

    /// Suspends lazy flushing (e.g. for a power transition). Idempotent.
    ///
    /// Does not cancel an in-flight sweep; it only prevents new ones from
    /// being scheduled.
    pub fn suspend(&self) {
        self.core.lock_state().held = true;
        debug!("lazy flushing suspended");
    }

    /// Resumes lazy flushing and immediately attempts to schedule one
    /// sweep, rather than waiting a full interval. Idempotent.
    pub fn resume(&self) {
        {
            let mut state = self.core.lock_state();
            if state.shutdown {
                return;
            }
            state.held = false;
        }
        debug!("lazy flushing resumed");
        self.core.trigger();
    }

    /// Tears the pipeline down: cancels both timers, stops the worker, and
    /// lets any in-flight sweep exit at its next shutdown check. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut state = self.core.lock_state();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
        }
        self.core.cond.notify_all();

        self.timer.cancel();
        self.grace.cancel();

        // Wake the worker; a queued sweep drains first and bails fast on
        // the shutdown flag.
        let _ = self.core.job_tx.send(Job::Stop);
        if let Ok(mut guard) = self.worker.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
        info!("flush scheduler shut down");
    }

    /// Snapshot of the scheduler's counters.
    #[must_use]
    pub fn stats(&self) -> FlushStats {
        let state = self.core.lock_state();
        let mut stats = state.stats.clone();
        stats.disk_full_unresolved = state.pressure.unresolved();
        stats
    }

    /// True while lazy flushing is administratively suspended.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.core.lock_state().held
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for FlushScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushScheduler").finish_non_exhaustive()
    }
}
