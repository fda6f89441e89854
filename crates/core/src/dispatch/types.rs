//! Download client abstraction.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::library::StoreError;
use crate::provider::MediaKind;

/// Errors surfaced by download clients and the dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Network failure, timeout or rejected credentials. Retried next cycle.
    #[error("Download client unreachable: {0}")]
    ClientUnreachable(String),

    /// The client refused the payload (malformed magnet, broken NZB).
    #[error("Download client rejected the submission: {0}")]
    ClientRejected(String),

    #[error("Download not found: {0}")]
    NotFound(String),

    /// The client cannot handle this kind of payload.
    #[error("Unsupported by download client: {0}")]
    Unsupported(String),

    #[error("Library store error: {0}")]
    Store(#[from] StoreError),
}

impl DispatchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::ClientUnreachable(_) => true,
            DispatchError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Whether the failure ends the snatch for good.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DispatchError::ClientRejected(_) | DispatchError::Unsupported(_)
        )
    }
}

/// Progress of a download as reported by its client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum DownloadStatus {
    Queued,
    Downloading,
    Complete,
    Failed(String),
}

/// A download client (torrent or usenet).
#[async_trait]
pub trait DownloadClient: Send + Sync {
    /// Client name for logging and the snatch record.
    fn name(&self) -> &str;

    /// Hand a locator to the client. Returns the client's download id.
    async fn submit(
        &self,
        locator: &str,
        media_kind: MediaKind,
        title: &str,
    ) -> Result<String, DispatchError>;

    /// Current state of a download.
    async fn status(&self, download_id: &str) -> Result<DownloadStatus, DispatchError>;

    /// Files of a completed download, as absolute paths.
    async fn files(&self, download_id: &str) -> Result<Vec<PathBuf>, DispatchError>;
}

/// Map a reqwest failure to the dispatch taxonomy.
pub(crate) fn transport_error(client: &str, e: reqwest::Error) -> DispatchError {
    if e.is_timeout() {
        DispatchError::ClientUnreachable(format!("{} timed out", client))
    } else if e.is_connect() {
        DispatchError::ClientUnreachable(format!("{} connection failed: {}", client, e))
    } else {
        DispatchError::ClientUnreachable(format!("{} request failed: {}", client, e))
    }
}
