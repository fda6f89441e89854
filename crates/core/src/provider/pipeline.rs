//! Fan-out search across all providers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::library::WantedItem;
use crate::matcher::MatcherConfig;
use crate::metrics;
use crate::snatch::{rank_results, SnatchPolicy};

use super::dedup::deduplicate;
use super::traits::ProviderAdapter;
use super::types::{ProviderError, SearchOutcome, SearchResult, SearchTerms};

/// Limits applied to one fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Per-provider query timeout.
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,

    /// Upper bound on providers queried at once.
    #[serde(default = "default_max_concurrent_providers")]
    pub max_concurrent_providers: usize,
}

fn default_provider_timeout_ms() -> u64 {
    30_000
}

fn default_max_concurrent_providers() -> usize {
    4
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            provider_timeout_ms: default_provider_timeout_ms(),
            max_concurrent_providers: default_max_concurrent_providers(),
        }
    }
}

/// Queries every provider for a wanted item and merges the results.
pub struct ProviderPipeline {
    providers: Vec<Arc<dyn ProviderAdapter>>,
    config: PipelineConfig,
}

impl ProviderPipeline {
    pub fn new(providers: Vec<Arc<dyn ProviderAdapter>>, config: PipelineConfig) -> Self {
        Self { providers, config }
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Search for a wanted item.
    ///
    /// Waits for every provider to answer or time out, then deduplicates
    /// and orders the results by snatch eligibility under `policy`.
    pub async fn search(
        &self,
        wanted: &WantedItem,
        policy: &SnatchPolicy,
        matcher: &MatcherConfig,
    ) -> SearchOutcome {
        let start = Instant::now();
        let terms = SearchTerms::for_item(wanted);

        debug!(wanted_id = %wanted.id, query = %terms.query, "Starting provider fan-out");

        let (results, provider_errors) = self.collect(&terms).await;
        let results = rank_results(results, wanted, policy, matcher)
            .into_iter()
            .map(|ranked| ranked.result)
            .collect::<Vec<_>>();

        let elapsed = start.elapsed();
        metrics::SEARCH_DURATION
            .with_label_values(&[])
            .observe(elapsed.as_secs_f64());
        let duration_ms = elapsed.as_millis() as u64;
        debug!(
            wanted_id = %wanted.id,
            results = results.len(),
            failed_providers = provider_errors.len(),
            duration_ms = duration_ms,
            "Provider fan-out complete"
        );

        SearchOutcome {
            wanted_id: wanted.id.clone(),
            results,
            provider_errors,
            duration_ms,
        }
    }

    /// Query all providers and deduplicate, without ranking.
    pub async fn collect(
        &self,
        terms: &SearchTerms,
    ) -> (Vec<SearchResult>, HashMap<String, String>) {
        let cap = self
            .providers
            .len()
            .min(self.config.max_concurrent_providers)
            .max(1);
        let timeout_ms = self.config.provider_timeout_ms;
        let terms = Arc::new(terms.clone());

        // Each query owns its inputs so the fan-out stays Send when spawned.
        let mut queries = Vec::with_capacity(self.providers.len());
        for (idx, provider) in self.providers.iter().cloned().enumerate() {
            let terms = Arc::clone(&terms);
            queries.push(async move {
                let result =
                    match timeout(Duration::from_millis(timeout_ms), provider.query(&terms)).await {
                        Ok(result) => result,
                        Err(_) => Err(ProviderError::Timeout(timeout_ms)),
                    };
                (idx, provider, result)
            });
        }

        let mut answers: Vec<_> = stream::iter(queries)
            .buffer_unordered(cap)
            .collect()
            .await;

        // Completion order is arbitrary; dedup ties follow provider order.
        answers.sort_by_key(|(idx, _, _)| *idx);

        let mut ranked = Vec::new();
        let mut provider_errors = HashMap::new();

        for (_, provider, result) in answers {
            match result {
                Ok(results) => {
                    metrics::PROVIDER_QUERIES
                        .with_label_values(&[provider.name(), "ok"])
                        .inc();
                    debug!(provider = %provider.name(), results = results.len(), "Provider answered");
                    let rank = provider.reliability_rank();
                    ranked.extend(results.into_iter().map(|r| (rank, r)));
                }
                Err(e) => {
                    metrics::PROVIDER_QUERIES
                        .with_label_values(&[provider.name(), e.metric_label()])
                        .inc();
                    warn!(provider = %provider.name(), error = %e, "Provider query failed");
                    provider_errors.insert(provider.name().to_string(), e.to_string());
                }
            }
        }

        (deduplicate(ranked), provider_errors)
    }
}
