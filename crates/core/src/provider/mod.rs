//! Search providers and the result pipeline.
//!
//! Providers are thin adapters behind [`ProviderAdapter`]. The
//! [`ProviderPipeline`] fans a query out to all of them with a per-provider
//! timeout, deduplicates what comes back and orders it for the snatch
//! decision.

mod dedup;
mod newznab;
mod pipeline;
mod rate_limiter;
mod traits;
mod types;

pub use dedup::{deduplicate, is_duplicate};
pub use newznab::{NewznabConfig, NewznabProvider};
pub use pipeline::{PipelineConfig, ProviderPipeline};
pub use rate_limiter::{ProviderRateLimiter, TokenBucket};
pub use traits::ProviderAdapter;
pub use types::{
    MediaKind, ProviderError, ResultMetadata, SearchOutcome, SearchResult, SearchTerms,
};
