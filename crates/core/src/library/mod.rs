//! Library persistence: wanted items, snatch history and the post-process
//! queue.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteLibraryStore;
pub use store::{LibraryStore, RecordProof, StoreError, WantedFilter};
pub use types::{
    DiscoveredFile, ItemKind, NewSnatch, NewWantedItem, ReconcileState, SearchToken,
    SnatchOutcome, SnatchRecord, SnatchStatus, WantedItem, WantedStatus, WantedSummary,
};
