//! # hiveflush - lazy-flush scheduling for hive stores
//!
//! A hive store is a hierarchical key/value namespace persisted to a backing
//! file. Writing every mutation through to disk synchronously is ruinously
//! slow, so this crate amortizes durability: mutations only set a dirty bit,
//! and a background scheduler sweeps dirty stores to disk in bounded batches
//! on a timer, with bounded staleness, an escalation path for callers that
//! need durability now, and graceful degradation when the disk fills up.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐ mark_dirty ┌────────────┐  expiry  ┌─────────────┐
//! │ mutation paths ├───────────►│ FlushTimer ├─────────►│   trigger   │
//! └────────────────┘            └────────────┘          │ (idempotent)│
//!                                     ▲                 └──────┬──────┘
//!                                     │ re-arm                 │ bounded(1)
//!                               ┌─────┴────────┐               ▼
//!                               │ flush worker │◄── single-flight sweep
//!                               └─────┬────────┘
//!                                     │ registry + load/unload locks
//!                                     ▼
//!                     ┌───────────────────────────────┐
//!                     │ store registry (dirty stores) │
//!                     └───────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hiveflush::{FlushScheduler, FlushSettings, MemoryRegistry, MemoryStore};
//!
//! let registry = Arc::new(MemoryRegistry::new());
//! let store = Arc::new(MemoryStore::new("software"));
//! registry.load(store.clone());
//!
//! let scheduler = FlushScheduler::new(FlushSettings::default(), registry, sink)?;
//! scheduler.start()?;
//!
//! store.mark_dirty();
//! scheduler.mark_dirty_and_maybe_schedule(&(store as _));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod lock;
pub mod pressure;
pub mod registry;
pub mod scheduler;
pub mod settings;
pub mod store;
pub mod timer;

// Re-export primary types at crate root for convenience
pub use error::{SchedulerError, SchedulerResult, StoreFailure};
pub use pressure::NotificationSink;
pub use registry::{MemoryRegistry, RegistryBatch, StoreRegistry, SweepCursor};
pub use scheduler::{FlushScheduler, FlushStats};
pub use settings::FlushSettings;
pub use store::{FlushOutcome, HiveStore, HiveStoreRef, MemoryStore, StoreFlushError};
pub use timer::{FlushTimer, TimerState};
