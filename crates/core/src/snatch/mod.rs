//! Snatch decision engine.
//!
//! Filters provider results by policy (reject words, size bounds, accepted
//! formats, earlier failures), scores the survivors against the wanted item
//! and picks at most one. The choice is recorded through
//! [`SnatchEngine::snatch`], which relies on the store's compare-and-swap
//! transition so concurrent cycles never snatch the same item twice.

mod engine;
mod policy;

pub use engine::{decide, detect_format, rank_results, RankedResult, Rejection, SnatchEngine};
pub use policy::{SnatchConfig, SnatchPolicy};
