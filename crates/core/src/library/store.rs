//! Library storage trait and types.

use std::collections::HashSet;
use std::path::PathBuf;

use thiserror::Error;

use super::types::{
    DiscoveredFile, ItemKind, NewSnatch, NewWantedItem, ReconcileState, SearchToken,
    SnatchOutcome, SnatchRecord, WantedItem, WantedStatus,
};

/// Error type for library store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Row not found.
    #[error("Not found: {0}")]
    NotFound(String),
    /// The row was not in the state the write expected.
    #[error("Conflicting update: {0}")]
    Conflict(String),
    /// A write would break a library invariant. Always a programming error.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
    /// Database error.
    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Database errors (busy, locked) may succeed on the next cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Database(_))
    }
}

/// Filter for querying wanted items.
#[derive(Debug, Clone, Default)]
pub struct WantedFilter {
    pub status: Option<WantedStatus>,
    pub kind: Option<ItemKind>,
    pub limit: i64,
    pub offset: i64,
}

impl WantedFilter {
    pub fn new() -> Self {
        Self {
            status: None,
            kind: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: WantedStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_kind(mut self, kind: ItemKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Evidence required to mark a wanted item Processed.
///
/// The store checks it against the discovered file row: the row must be
/// Organized, identified as this wanted item, placed at `file_path`, and
/// scored at or above `confirm_threshold`.
#[derive(Debug, Clone)]
pub struct RecordProof {
    pub discovered_id: i64,
    pub wanted_id: String,
    pub file_path: PathBuf,
    pub score: u8,
    pub confirm_threshold: u8,
}

/// Trait for library storage backends.
///
/// Every status transition is a conditional write so concurrent cycles
/// cannot both win.
pub trait LibraryStore: Send + Sync {
    /// Add a new wanted item in Wanted state.
    fn add_wanted(&self, item: NewWantedItem) -> Result<WantedItem, StoreError>;

    /// Get a wanted item by ID.
    fn get_wanted(&self, id: &str) -> Result<Option<WantedItem>, StoreError>;

    /// List wanted items, oldest first.
    fn list_wanted(&self, filter: &WantedFilter) -> Result<Vec<WantedItem>, StoreError>;

    /// Count wanted items matching the filter.
    fn count_wanted(&self, filter: &WantedFilter) -> Result<i64, StoreError>;

    /// Issue a fresh search token for an item.
    fn issue_search_token(&self, wanted_id: &str) -> Result<SearchToken, StoreError>;

    /// Mark a search cycle complete without a snatch.
    ///
    /// Returns false when a newer cycle already completed.
    fn complete_search(&self, wanted_id: &str, token: SearchToken) -> Result<bool, StoreError>;

    /// Atomically move a Wanted item to Snatched and create its record.
    fn try_snatch(
        &self,
        wanted_id: &str,
        token: SearchToken,
        snatch: NewSnatch,
    ) -> Result<SnatchOutcome, StoreError>;

    /// Get a snatch record by ID.
    fn get_snatch(&self, id: &str) -> Result<Option<SnatchRecord>, StoreError>;

    /// Snatch history for an item, newest first.
    fn snatches_for(&self, wanted_id: &str) -> Result<Vec<SnatchRecord>, StoreError>;

    /// All snatch records still in Snatched state.
    fn open_snatches(&self) -> Result<Vec<SnatchRecord>, StoreError>;

    /// Locators of results that already failed for an item.
    fn failed_locators(&self, wanted_id: &str) -> Result<HashSet<String>, StoreError>;

    /// Store the identifier assigned by the download client.
    fn set_client_id(&self, snatch_id: &str, client_id: &str) -> Result<SnatchRecord, StoreError>;

    /// Record a retryable dispatch failure; returns the attempt count.
    fn record_dispatch_failure(&self, snatch_id: &str, reason: &str) -> Result<u32, StoreError>;

    /// Terminally fail a snatch.
    ///
    /// The wanted item goes back to Wanted, or to Failed once it has used
    /// `max_attempts` snatches. Returns the item's new status.
    fn fail_snatch(
        &self,
        snatch_id: &str,
        reason: &str,
        max_attempts: u32,
    ) -> Result<WantedStatus, StoreError>;

    /// Queue a file for reconciliation. Returns `None` if the path is known.
    fn enqueue_discovered(
        &self,
        path: PathBuf,
        snatch_id: Option<&str>,
    ) -> Result<Option<DiscoveredFile>, StoreError>;

    /// Get a discovered file by ID.
    fn get_discovered(&self, id: i64) -> Result<Option<DiscoveredFile>, StoreError>;

    /// Non-terminal discovered files, oldest first.
    fn pending_discovered(&self, limit: i64) -> Result<Vec<DiscoveredFile>, StoreError>;

    /// Discovered files in a given state, newest first.
    fn list_discovered(
        &self,
        state: ReconcileState,
        limit: i64,
    ) -> Result<Vec<DiscoveredFile>, StoreError>;

    /// Persist the reconciliation progress of a discovered file.
    ///
    /// Moving a file to Recorded is only possible through
    /// [`LibraryStore::record_processed`].
    fn save_discovered(&self, file: &DiscoveredFile) -> Result<(), StoreError>;

    /// Mark a wanted item Processed with its library file.
    ///
    /// Also marks the open snatch record Processed and the discovered file
    /// Recorded, in one transaction.
    fn record_processed(&self, proof: &RecordProof) -> Result<WantedItem, StoreError>;
}
