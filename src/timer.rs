//! One-shot flush timers.
//!
//! Each timer owns a dedicated thread driven by a bounded command channel.
//! The state machine is `Idle -> Armed -> Fired -> Idle`: arming schedules a
//! single callback invocation, expiry fires it exactly once, cancellation
//! from `Armed` returns to `Idle` without firing. Re-arming while already
//! armed keeps the earliest deadline, so repeated arm requests from mutation
//! paths never push a pending expiry further out.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

/// Observable timer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// No expiry scheduled.
    Idle,
    /// An expiry is scheduled.
    Armed,
    /// The callback is currently being invoked.
    Fired,
}

#[derive(Debug)]
enum TimerCmd {
    Arm(Duration),
    Cancel,
}

/// A one-shot timer backed by a named thread.
///
/// Used twice by the scheduler: the recurring sweep timer (re-armed after
/// each sweep that leaves work behind) and the boot grace-period timer
/// (armed exactly once at start).
pub struct FlushTimer {
    tx: Sender<TimerCmd>,
    state: Arc<Mutex<TimerState>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl FlushTimer {
    /// Spawns the timer thread. `name` is a thread-name suffix; `callback`
    /// runs on the timer thread at each expiry and must be fast and
    /// non-blocking.
    pub fn new(name: &str, callback: impl Fn() + Send + 'static) -> Self {
        let (tx, rx) = bounded::<TimerCmd>(8);
        let state = Arc::new(Mutex::new(TimerState::Idle));

        let thread_state = Arc::clone(&state);
        let join = thread::Builder::new()
            .name(format!("hiveflush-{name}"))
            .spawn(move || timer_loop(&rx, &thread_state, &callback))
            .expect("failed to spawn hiveflush timer thread");

        Self {
            tx,
            state,
            join: Mutex::new(Some(join)),
        }
    }

    /// Schedules (or tightens) the next expiry.
    pub fn arm(&self, duration: Duration) {
        let _ = self.tx.send(TimerCmd::Arm(duration));
    }

    /// Cancels a pending expiry, if any. The callback is not invoked.
    pub fn cancel(&self) {
        let _ = self.tx.send(TimerCmd::Cancel);
    }

    /// Current state, as last observed by the timer thread.
    #[must_use]
    pub fn state(&self) -> TimerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for FlushTimer {
    fn drop(&mut self) {
        // Close the channel so the timer thread exits, then join it.
        let (dummy_tx, _) = bounded::<TimerCmd>(1);
        drop(std::mem::replace(&mut self.tx, dummy_tx));

        if let Ok(mut guard) = self.join.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
    }
}

fn set_state(state: &Mutex<TimerState>, value: TimerState) {
    *state.lock().unwrap_or_else(PoisonError::into_inner) = value;
}

fn fire(state: &Mutex<TimerState>, callback: &(impl Fn() + Send)) {
    set_state(state, TimerState::Fired);
    callback();
    set_state(state, TimerState::Idle);
}

fn timer_loop(
    rx: &Receiver<TimerCmd>,
    state: &Mutex<TimerState>,
    callback: &(impl Fn() + Send),
) {
    let mut deadline: Option<Instant> = None;

    loop {
        let cmd = match deadline {
            None => match rx.recv() {
                Ok(cmd) => cmd,
                Err(_) => break,
            },
            Some(at) => {
                let now = Instant::now();
                if now >= at {
                    fire(state, callback);
                    deadline = None;
                    continue;
                }
                match rx.recv_timeout(at - now) {
                    Ok(cmd) => cmd,
                    Err(RecvTimeoutError::Timeout) => {
                        fire(state, callback);
                        deadline = None;
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        };

        match cmd {
            TimerCmd::Arm(duration) => {
                let requested = Instant::now() + duration;
                deadline = Some(deadline.map_or(requested, |at| at.min(requested)));
                set_state(state, TimerState::Armed);
            }
            TimerCmd::Cancel => {
                deadline = None;
                set_state(state, TimerState::Idle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn counting_timer() -> (FlushTimer, Arc<AtomicU64>) {
        let fired = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&fired);
        let timer = FlushTimer::new("test-timer", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (timer, fired)
    }

    #[test]
    fn test_armed_timer_fires_exactly_once() {
        let (timer, fired) = counting_timer();
        timer.arm(Duration::from_millis(20));
        thread::sleep(Duration::from_millis(120));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timer.state(), TimerState::Idle);
    }

    #[test]
    fn test_cancel_prevents_firing() {
        let (timer, fired) = counting_timer();
        timer.arm(Duration::from_millis(60));
        thread::sleep(Duration::from_millis(10));
        assert_eq!(timer.state(), TimerState::Armed);

        timer.cancel();
        thread::sleep(Duration::from_millis(120));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(timer.state(), TimerState::Idle);
    }

    #[test]
    fn test_rearm_keeps_earliest_deadline() {
        let (timer, fired) = counting_timer();
        timer.arm(Duration::from_millis(30));
        timer.arm(Duration::from_secs(60));
        thread::sleep(Duration::from_millis(150));
        // The 60s re-arm must not have pushed the 30ms expiry out.
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_arm_after_fire_schedules_again() {
        let (timer, fired) = counting_timer();
        timer.arm(Duration::from_millis(10));
        thread::sleep(Duration::from_millis(80));
        timer.arm(Duration::from_millis(10));
        thread::sleep(Duration::from_millis(80));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cancel_while_idle_is_noop() {
        let (timer, fired) = counting_timer();
        timer.cancel();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(timer.state(), TimerState::Idle);
    }
}
