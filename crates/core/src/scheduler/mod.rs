//! Periodic search, download monitoring and post-processing.
//!
//! The [`Scheduler`] owns three independent loops:
//! - **Search**: Wanted items are searched with bounded concurrency
//! - **Download monitor**: pending dispatches are retried, downloads polled
//! - **Post-process**: the drop folder is scanned, queued files reconciled
//!
//! Each loop can also be triggered on demand through
//! [`Scheduler::force_search`] and [`Scheduler::force_postprocess`].

mod config;
mod runner;
mod types;

pub use config::SchedulerConfig;
pub use runner::Scheduler;
pub use types::{
    ItemSearchResult, MonitorSummary, SchedulerError, SchedulerStatus, SearchCycleSummary,
};
