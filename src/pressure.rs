//! Disk-pressure handling.
//!
//! A flush that fails with storage exhaustion must not block the sweep, must
//! not retry in a hot loop, and must not nag: the user-visible warning is a
//! one-shot latch, re-armed only after durability of the critical store has
//! been observed to succeed again. Notification dispatch is fire-and-forget
//! on a detached thread so the flush worker never waits on a notifier.

use std::sync::Arc;
use std::thread;

use tracing::warn;

/// Receiver for storage-exhaustion warnings.
///
/// Implementations must not block: the scheduler calls this from a detached
/// notifier thread, fire-and-forget.
pub trait NotificationSink: Send + Sync + 'static {
    /// Raise a user-visible "disk full, configuration changes may be lost"
    /// warning.
    fn notify_storage_exhausted(&self);
}

/// One-shot warning latch with resolve-and-rearm semantics.
#[derive(Debug, Default)]
pub(crate) struct DiskPressure {
    /// Critical-state durability has failed at least once and has not
    /// succeeded since.
    unresolved: bool,
    /// The warning has been raised for the current episode.
    notice_shown: bool,
}

impl DiskPressure {
    /// Folds one sweep's outcome into the latch.
    ///
    /// `storage_exhausted` is true if any flush in the sweep hit a full
    /// volume; `critical_flushed` is true if a critical store was flushed
    /// successfully during the sweep. Returns true exactly when a new
    /// warning should be dispatched.
    pub(crate) fn record_sweep(&mut self, storage_exhausted: bool, critical_flushed: bool) -> bool {
        if self.unresolved && critical_flushed {
            // Problem resolved: stop warning, re-arm the latch.
            self.unresolved = false;
            self.notice_shown = false;
        }

        if storage_exhausted {
            self.unresolved = true;
            if !self.notice_shown {
                self.notice_shown = true;
                return true;
            }
        }

        false
    }

    /// True while critical-state durability has not succeeded since the
    /// last exhaustion.
    pub(crate) const fn unresolved(&self) -> bool {
        self.unresolved
    }
}

/// Dispatches the warning on a detached thread.
pub(crate) fn dispatch_notice(sink: &Arc<dyn NotificationSink>) {
    let sink = Arc::clone(sink);
    let spawned = thread::Builder::new()
        .name("hiveflush-notice".to_string())
        .spawn(move || sink.notify_storage_exhausted());

    if spawned.is_err() {
        // Out of threads is itself a resource-exhaustion condition; the
        // latch stays shown, so the warning is not retried this episode.
        warn!("failed to spawn disk-pressure notifier thread");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingSink {
        notices: AtomicU64,
    }

    impl NotificationSink for CountingSink {
        fn notify_storage_exhausted(&self) {
            self.notices.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_notice_raised_once_per_episode() {
        let mut pressure = DiskPressure::default();

        assert!(pressure.record_sweep(true, false));
        assert!(pressure.unresolved());
        for _ in 0..10 {
            assert!(!pressure.record_sweep(true, false));
        }
    }

    #[test]
    fn test_critical_success_rearms_latch() {
        let mut pressure = DiskPressure::default();

        assert!(pressure.record_sweep(true, false));
        assert!(!pressure.record_sweep(true, false));

        // Disk space freed: critical store flushes cleanly.
        assert!(!pressure.record_sweep(false, true));
        assert!(!pressure.unresolved());

        // A later exhaustion warns exactly once again.
        assert!(pressure.record_sweep(true, false));
        assert!(!pressure.record_sweep(true, false));
    }

    #[test]
    fn test_clean_sweeps_never_warn() {
        let mut pressure = DiskPressure::default();
        for _ in 0..5 {
            assert!(!pressure.record_sweep(false, true));
        }
        assert!(!pressure.unresolved());
    }

    #[test]
    fn test_dispatch_is_fire_and_forget() {
        let sink = Arc::new(CountingSink::default());
        let dyn_sink: Arc<dyn NotificationSink> = Arc::clone(&sink) as _;

        dispatch_notice(&dyn_sink);

        // Detached thread: poll briefly for the side effect.
        for _ in 0..50 {
            if sink.notices.load(Ordering::SeqCst) == 1 {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("notification was never dispatched");
    }
}
