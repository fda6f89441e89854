//! Mock search provider for testing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::provider::{MediaKind, ProviderAdapter, ProviderError, SearchResult, SearchTerms};

/// Mock implementation of [`ProviderAdapter`].
///
/// Returns configured results, records every query and can be told to
/// fail once or to answer slowly.
///
/// ```rust,ignore
/// let provider = MockProvider::new("tracker", 1, MediaKind::Torrent);
/// provider.set_results(vec![fixtures::search_result("Dune.epub", "tracker", 1_000)]).await;
/// provider.set_delay(Duration::from_secs(5)).await;
/// ```
pub struct MockProvider {
    name: String,
    rank: u32,
    kind: MediaKind,
    results: Arc<RwLock<Vec<SearchResult>>>,
    queries: Arc<RwLock<Vec<SearchTerms>>>,
    next_error: Arc<RwLock<Option<ProviderError>>>,
    delay: Arc<RwLock<Option<Duration>>>,
}

impl MockProvider {
    pub fn new(name: &str, reliability_rank: u32, kind: MediaKind) -> Self {
        Self {
            name: name.to_string(),
            rank: reliability_rank,
            kind,
            results: Arc::new(RwLock::new(Vec::new())),
            queries: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
            delay: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn set_results(&self, results: Vec<SearchResult>) {
        *self.results.write().await = results;
    }

    /// Make every query wait this long before answering.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }

    /// Fail the next query with this error.
    pub async fn set_next_error(&self, error: ProviderError) {
        *self.next_error.write().await = Some(error);
    }

    pub async fn recorded_queries(&self) -> Vec<SearchTerms> {
        self.queries.read().await.clone()
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn reliability_rank(&self) -> u32 {
        self.rank
    }

    fn media_kind(&self) -> MediaKind {
        self.kind
    }

    async fn query(&self, terms: &SearchTerms) -> Result<Vec<SearchResult>, ProviderError> {
        self.queries.write().await.push(terms.clone());

        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }

        Ok(self.results.read().await.clone())
    }
}
