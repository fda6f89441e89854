//! Provider adapter trait.

use async_trait::async_trait;

use super::types::{MediaKind, ProviderError, SearchResult, SearchTerms};

/// A search backend (Newznab indexer, Torznab tracker proxy, ...).
///
/// Implementations return an empty list when nothing was found and only
/// error on hard transport failures. The caller bounds every query with its
/// own timeout.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider name for logging and dedup tie-breaks.
    fn name(&self) -> &str;

    /// Static reliability rank. Lower is better.
    fn reliability_rank(&self) -> u32;

    /// Transport of the results this provider returns.
    fn media_kind(&self) -> MediaKind;

    /// Run one query.
    async fn query(&self, terms: &SearchTerms) -> Result<Vec<SearchResult>, ProviderError>;
}
