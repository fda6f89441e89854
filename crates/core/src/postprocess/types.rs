//! Post-process data types and errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::library::StoreError;

use super::placer::PlacerError;

/// Metadata gathered from a file. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_position: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
}

impl PartialMetadata {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.author.is_none()
            && self.isbn.is_none()
            && self.series.is_none()
            && self.series_position.is_none()
            && self.year.is_none()
    }

    /// Fill fields that are still absent from a lower priority source.
    pub fn fill_from(&mut self, other: PartialMetadata) {
        fn fill(slot: &mut Option<String>, value: Option<String>) {
            if slot.is_none() {
                *slot = value.filter(|v| !v.trim().is_empty());
            }
        }
        fill(&mut self.title, other.title);
        fill(&mut self.author, other.author);
        fill(&mut self.isbn, other.isbn);
        fill(&mut self.series, other.series);
        fill(&mut self.series_position, other.series_position);
        fill(&mut self.year, other.year);
    }
}

/// Failure of one reconcile step.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Locked file, transient I/O, busy store. The file keeps its state.
    #[error("{0}")]
    Retryable(String),

    /// The file cannot be processed; it is left where it is.
    #[error("{0}")]
    Unidentified(String),

    /// A guarded write was refused.
    #[error("{0}")]
    Rejected(String),
}

impl ProcessError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProcessError::Retryable(_))
    }
}

impl From<StoreError> for ProcessError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvariantViolation(msg) | StoreError::Conflict(msg) => {
                ProcessError::Rejected(msg)
            }
            other => ProcessError::Retryable(other.to_string()),
        }
    }
}

impl From<PlacerError> for ProcessError {
    fn from(e: PlacerError) -> Self {
        match e {
            PlacerError::SourceNotFound { path } => {
                ProcessError::Unidentified(format!("file disappeared: {}", path.display()))
            }
            other => ProcessError::Retryable(other.to_string()),
        }
    }
}

/// Failure to run reconciliation at all.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Library store error: {0}")]
    Store(#[from] StoreError),

    #[error("Scan of {path} failed: {reason}")]
    Scan { path: String, reason: String },
}

/// Counts from one reconcile pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub processed: usize,
    pub recorded: usize,
    pub unidentified: usize,
    /// Files left in a non-terminal state for a later pass.
    pub deferred: usize,
}
