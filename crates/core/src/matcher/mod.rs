//! Fuzzy matching of free text against wanted items.
//!
//! [`score`] is the raw similarity of two strings. [`match_result`] scores a
//! release title from a provider, [`match_metadata`] scores metadata
//! extracted from a downloaded file. Both combine a title score and an
//! author score with configurable weights and return `None` below the
//! caller's threshold.

mod composite;
mod config;
mod fuzzy;
mod types;

pub use composite::{best_match, match_metadata, match_result};
pub use config::MatcherConfig;
pub use fuzzy::score;
pub use types::{MatchFields, MatchScore};
