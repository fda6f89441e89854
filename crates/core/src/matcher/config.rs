//! Configuration for the fuzzy matcher.

use serde::{Deserialize, Serialize};

/// Thresholds and weights used when scoring text against a wanted item.
///
/// The snatch threshold gates which search results may be downloaded. The
/// confirm threshold is stricter and gates post-process identification,
/// since a wrong confirmation files a book into the wrong library slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatcherConfig {
    #[serde(default = "default_snatch_threshold")]
    pub snatch_threshold: u8,

    #[serde(default = "default_confirm_threshold")]
    pub confirm_threshold: u8,

    /// Weight of the title score in the composite (percent).
    #[serde(default = "default_title_weight")]
    pub title_weight: u8,

    /// Weight of the author score in the composite (percent).
    #[serde(default = "default_author_weight")]
    pub author_weight: u8,

    /// Subtracted from title-only scores when a book's author is missing
    /// on either side.
    #[serde(default = "default_missing_author_penalty")]
    pub missing_author_penalty: u8,
}

fn default_snatch_threshold() -> u8 {
    80
}

fn default_confirm_threshold() -> u8 {
    90
}

fn default_title_weight() -> u8 {
    70
}

fn default_author_weight() -> u8 {
    30
}

fn default_missing_author_penalty() -> u8 {
    10
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            snatch_threshold: default_snatch_threshold(),
            confirm_threshold: default_confirm_threshold(),
            title_weight: default_title_weight(),
            author_weight: default_author_weight(),
            missing_author_penalty: default_missing_author_penalty(),
        }
    }
}

impl MatcherConfig {
    pub fn with_thresholds(mut self, snatch: u8, confirm: u8) -> Self {
        self.snatch_threshold = snatch;
        self.confirm_threshold = confirm;
        self
    }

    pub fn with_weights(mut self, title: u8, author: u8) -> Self {
        self.title_weight = title;
        self.author_weight = author;
        self
    }

    pub fn with_missing_author_penalty(mut self, penalty: u8) -> Self {
        self.missing_author_penalty = penalty;
        self
    }
}
