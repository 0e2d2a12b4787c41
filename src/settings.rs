//! Flush policy settings.
//!
//! Tunables for the lazy-flush pipeline: how often sweeps run, how many
//! stores each sweep examines, how long a cooperative lock acquisition may
//! wait, and how long after startup suspension is force-lifted.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SchedulerError, SchedulerResult};

/// Default time between sweep attempts.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of stores flushed per sweep invocation.
///
/// Sized for the handful of always-resident stores plus headroom, so one
/// quiet-system sweep usually completes a full pass.
pub const DEFAULT_BATCH_SIZE: usize = 7;

/// Default bound on a cooperative (shared) registry lock acquisition.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Default boot grace period after which suspension is unconditionally
/// lifted, exactly once per scheduler lifetime.
pub const DEFAULT_BOOT_GRACE: Duration = Duration::from_secs(600);

/// Tunables for the flush scheduler.
///
/// Construct with [`FlushSettings::default`] and adjust fields, then pass to
/// the scheduler, which validates them. Zero `interval` or `batch_size` is
/// rejected: a zero interval would spin the timer, and a zero batch would
/// make every sweep a no-op that re-arms forever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushSettings {
    /// Time between sweep attempts.
    pub interval: Duration,
    /// Maximum stores flushed per sweep invocation.
    pub batch_size: usize,
    /// Bound on cooperative registry lock acquisition.
    pub lock_timeout: Duration,
    /// Delay after `start` before suspension is force-lifted.
    pub boot_grace: Duration,
    /// Whether the scheduler starts administratively suspended.
    ///
    /// Mirrors early-boot behavior: mutations accumulate dirty state but no
    /// sweep runs until `resume` is called or the grace period expires.
    pub start_held: bool,
}

impl Default for FlushSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            boot_grace: DEFAULT_BOOT_GRACE,
            start_held: false,
        }
    }
}

impl FlushSettings {
    /// Validates the settings, consuming and returning them on success.
    ///
    /// # Errors
    /// Returns [`SchedulerError::InvalidArgument`] if `interval` or
    /// `batch_size` is zero.
    pub fn validate(self) -> SchedulerResult<Self> {
        if self.interval.is_zero() {
            return Err(SchedulerError::InvalidArgument {
                field: "interval",
                reason: "flush interval must be non-zero".to_string(),
            });
        }
        if self.batch_size == 0 {
            return Err(SchedulerError::InvalidArgument {
                field: "batch_size",
                reason: "per-sweep batch size must be non-zero".to_string(),
            });
        }
        Ok(self)
    }
}
