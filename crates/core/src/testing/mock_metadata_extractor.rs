//! Mock metadata extractor for testing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::postprocess::{MetadataExtractor, PartialMetadata};

/// Returns metadata configured per path; unknown paths have none.
pub struct MockMetadataExtractor {
    metadata: Arc<RwLock<HashMap<PathBuf, PartialMetadata>>>,
    calls: Arc<RwLock<Vec<PathBuf>>>,
}

impl Default for MockMetadataExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMetadataExtractor {
    pub fn new() -> Self {
        Self {
            metadata: Arc::new(RwLock::new(HashMap::new())),
            calls: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn set_metadata(&self, path: &Path, metadata: PartialMetadata) {
        self.metadata
            .write()
            .await
            .insert(path.to_path_buf(), metadata);
    }

    /// Paths extraction was requested for, in order.
    pub async fn recorded_calls(&self) -> Vec<PathBuf> {
        self.calls.read().await.clone()
    }
}

#[async_trait]
impl MetadataExtractor for MockMetadataExtractor {
    async fn extract(&self, path: &Path) -> PartialMetadata {
        self.calls.write().await.push(path.to_path_buf());
        self.metadata
            .read()
            .await
            .get(path)
            .cloned()
            .unwrap_or_default()
    }
}
