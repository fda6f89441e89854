//! Match score types.

use serde::{Deserialize, Serialize};

/// Which fields contributed to a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchFields {
    TitleOnly,
    TitleAuthor,
    TitleAuthorSeries,
}

/// A similarity score in `0..=100` and the fields it was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchScore {
    pub score: u8,
    pub fields: MatchFields,
}

impl MatchScore {
    pub fn new(score: u8, fields: MatchFields) -> Self {
        Self {
            score: score.min(100),
            fields,
        }
    }

    pub fn clears(&self, threshold: u8) -> bool {
        self.score >= threshold
    }
}
