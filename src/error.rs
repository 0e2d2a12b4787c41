//! Error types for the lazy-flush scheduler.
//!
//! All errors are strongly typed using thiserror. This enables pattern
//! matching on specific error conditions and provides clear error messages.
//!
//! Scheduling errors are deliberately rare: the sweep converts transient
//! failures (lock contention, per-store I/O errors) into retry scheduling
//! instead of surfacing them. Only explicit caller requests (configuration,
//! lifecycle, and `force_flush_all`) return errors.

use thiserror::Error;

use crate::store::StoreFlushError;

/// A single store's flush failure, captured during a forced sweep.
#[derive(Debug, Error)]
#[error("store '{store}' failed to flush: {source}")]
pub struct StoreFailure {
    /// Name of the store that failed.
    pub store: String,
    /// The underlying flush error.
    #[source]
    pub source: StoreFlushError,
}

/// Top-level error type for scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A settings field was rejected during validation.
    #[error("invalid argument '{field}': {reason}")]
    InvalidArgument {
        /// Which settings field was invalid.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// `start` was called on a scheduler that is already running.
    #[error("scheduler is already initialized")]
    AlreadyInitialized,

    /// The scheduler has been shut down; no further scheduling is possible.
    #[error("scheduler has been shut down")]
    ShutDown,

    /// One or more stores failed to flush during `force_flush_all`.
    ///
    /// The remaining stores in the pass were still attempted; this is an
    /// aggregate of everything that went wrong.
    #[error("force flush failed for {} store(s)", failures.len())]
    ForceFlushFailed {
        /// Per-store failures, in sweep order.
        failures: Vec<StoreFailure>,
    },
}

impl SchedulerError {
    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }

    /// Returns true if this error is retryable.
    ///
    /// Lifecycle errors are terminal; a failed force flush can be retried
    /// once the underlying condition clears.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ForceFlushFailed { .. })
    }
}

/// Result type alias for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;
