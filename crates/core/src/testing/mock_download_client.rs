//! Mock download client for testing.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::dispatch::{DispatchError, DownloadClient, DownloadStatus};
use crate::provider::MediaKind;

/// A recorded submit for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedSubmit {
    pub locator: String,
    pub media_kind: MediaKind,
    pub title: String,
    pub download_id: String,
}

/// Mock implementation of [`DownloadClient`].
///
/// Submitted downloads start Queued. Tests move them along with
/// [`MockDownloadClient::set_status`] and give them files with
/// [`MockDownloadClient::set_files`].
pub struct MockDownloadClient {
    name: String,
    submits: Arc<RwLock<Vec<RecordedSubmit>>>,
    statuses: Arc<RwLock<HashMap<String, DownloadStatus>>>,
    files: Arc<RwLock<HashMap<String, Vec<PathBuf>>>>,
    /// If set, the next call fails with this error.
    next_error: Arc<RwLock<Option<DispatchError>>>,
    counter: AtomicU64,
}

impl MockDownloadClient {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            submits: Arc::new(RwLock::new(Vec::new())),
            statuses: Arc::new(RwLock::new(HashMap::new())),
            files: Arc::new(RwLock::new(HashMap::new())),
            next_error: Arc::new(RwLock::new(None)),
            counter: AtomicU64::new(1),
        }
    }

    pub async fn set_next_error(&self, error: DispatchError) {
        *self.next_error.write().await = Some(error);
    }

    pub async fn set_status(&self, download_id: &str, status: DownloadStatus) {
        self.statuses
            .write()
            .await
            .insert(download_id.to_string(), status);
    }

    pub async fn set_files(&self, download_id: &str, files: Vec<PathBuf>) {
        self.files
            .write()
            .await
            .insert(download_id.to_string(), files);
    }

    /// Forget a download, as if it was removed in the client.
    pub async fn remove(&self, download_id: &str) {
        self.statuses.write().await.remove(download_id);
        self.files.write().await.remove(download_id);
    }

    pub async fn recorded_submits(&self) -> Vec<RecordedSubmit> {
        self.submits.read().await.clone()
    }

    async fn take_error(&self) -> Result<(), DispatchError> {
        match self.next_error.write().await.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DownloadClient for MockDownloadClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(
        &self,
        locator: &str,
        media_kind: MediaKind,
        title: &str,
    ) -> Result<String, DispatchError> {
        self.take_error().await?;

        let download_id = format!("{}-{}", self.name, self.counter.fetch_add(1, Ordering::SeqCst));
        self.submits.write().await.push(RecordedSubmit {
            locator: locator.to_string(),
            media_kind,
            title: title.to_string(),
            download_id: download_id.clone(),
        });
        self.statuses
            .write()
            .await
            .insert(download_id.clone(), DownloadStatus::Queued);
        Ok(download_id)
    }

    async fn status(&self, download_id: &str) -> Result<DownloadStatus, DispatchError> {
        self.take_error().await?;
        self.statuses
            .read()
            .await
            .get(download_id)
            .cloned()
            .ok_or_else(|| DispatchError::NotFound(download_id.to_string()))
    }

    async fn files(&self, download_id: &str) -> Result<Vec<PathBuf>, DispatchError> {
        self.take_error().await?;
        if !self.statuses.read().await.contains_key(download_id) {
            return Err(DispatchError::NotFound(download_id.to_string()));
        }
        Ok(self
            .files
            .read()
            .await
            .get(download_id)
            .cloned()
            .unwrap_or_default())
    }
}
