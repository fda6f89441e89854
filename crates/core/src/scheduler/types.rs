//! Types for the scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::library::{SnatchRecord, StoreError, WantedStatus};
use crate::postprocess::ReconcileError;

/// Errors that can occur while running a cycle.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Wanted item not found.
    #[error("wanted item not found: {0}")]
    WantedNotFound(String),

    /// Item is not in a state the operation applies to.
    #[error("invalid wanted item state: expected {expected}, got {actual}")]
    InvalidState {
        expected: WantedStatus,
        actual: WantedStatus,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),
}

impl SchedulerError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SchedulerError::Store(e) => e.is_retryable(),
            SchedulerError::Reconcile(ReconcileError::Store(e)) => e.is_retryable(),
            SchedulerError::Reconcile(ReconcileError::Scan { .. }) => true,
            _ => false,
        }
    }
}

/// What one search produced for one wanted item.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemSearchResult {
    /// A result was snatched. `dispatched` is false when the download
    /// client could not take it yet; the monitor retries.
    Snatched {
        record: SnatchRecord,
        dispatched: bool,
    },
    /// No result cleared the snatch policy.
    NoMatch { results: usize },
    /// Another cycle snatched the item or completed a newer search first.
    Skipped,
}

/// Totals for one search cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCycleSummary {
    pub searched: usize,
    pub snatched: usize,
    pub no_match: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Totals for one download monitor cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSummary {
    /// Open snatches examined.
    pub checked: usize,
    /// Pending dispatches that reached their client this cycle.
    pub dispatched: usize,
    /// Completed downloads whose files were queued.
    pub completed: usize,
    /// Snatches failed terminally this cycle.
    pub failed: usize,
    /// Snatches left for the next cycle after a retryable error.
    pub deferred: usize,
}

/// Current status of the scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStatus {
    /// Whether the periodic loops are running.
    pub running: bool,
    pub wanted_count: i64,
    pub snatched_count: i64,
    pub processed_count: i64,
    pub failed_count: i64,
    /// Discovered files not yet Recorded or Unidentified.
    pub pending_files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_search_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_monitor_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_postprocess_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_status_default() {
        let status = SchedulerStatus::default();
        assert!(!status.running);
        assert_eq!(status.pending_files, 0);
        assert!(status.last_search_at.is_none());

        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("last_search_at").is_none());
    }

    #[test]
    fn test_error_display() {
        let err = SchedulerError::WantedNotFound("abc".to_string());
        assert_eq!(err.to_string(), "wanted item not found: abc");

        let err = SchedulerError::InvalidState {
            expected: WantedStatus::Wanted,
            actual: WantedStatus::Processed,
        };
        assert_eq!(
            err.to_string(),
            "invalid wanted item state: expected wanted, got processed"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_store_errors_keep_classification() {
        let err = SchedulerError::from(StoreError::Database("locked".to_string()));
        assert!(err.is_retryable());

        let err = SchedulerError::from(StoreError::Conflict("stale".to_string()));
        assert!(!err.is_retryable());
    }
}
