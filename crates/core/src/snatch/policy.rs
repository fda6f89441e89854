//! Snatch policy: which results may be downloaded at all.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::matcher::MatcherConfig;

/// The `[snatch]` configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnatchConfig {
    /// Minimum result size in bytes (0 = unbounded).
    #[serde(default)]
    pub min_size: u64,

    /// Maximum result size in bytes (0 = unbounded).
    #[serde(default)]
    pub max_size: u64,

    /// Case-insensitive substrings that disqualify a release title.
    #[serde(default = "default_reject_words")]
    pub reject_words: Vec<String>,

    /// Formats in order of preference. Unlisted formats rank last.
    #[serde(default = "default_preferred_formats")]
    pub preferred_formats: Vec<String>,

    /// Snatches an item may use before it is marked Failed.
    #[serde(default = "default_max_snatch_attempts")]
    pub max_snatch_attempts: u32,
}

fn default_reject_words() -> Vec<String> {
    vec!["audiobook".to_string(), "mp3".to_string()]
}

fn default_preferred_formats() -> Vec<String> {
    vec!["epub".to_string(), "mobi".to_string(), "pdf".to_string()]
}

fn default_max_snatch_attempts() -> u32 {
    3
}

impl Default for SnatchConfig {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 0,
            reject_words: default_reject_words(),
            preferred_formats: default_preferred_formats(),
            max_snatch_attempts: default_max_snatch_attempts(),
        }
    }
}

/// Immutable per-cycle decision policy.
///
/// Built once per search cycle from configuration; failed locators are
/// added per item so a retry picks a different result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnatchPolicy {
    pub min_score: u8,
    pub min_size: u64,
    pub max_size: u64,
    /// Lower-cased reject words.
    pub reject_words: Vec<String>,
    /// Lower-cased preferred formats, best first.
    pub preferred_formats: Vec<String>,
    pub excluded_locators: HashSet<String>,
}

impl Default for SnatchPolicy {
    fn default() -> Self {
        Self::from_config(&SnatchConfig::default(), &MatcherConfig::default())
    }
}

impl SnatchPolicy {
    pub fn from_config(snatch: &SnatchConfig, matcher: &MatcherConfig) -> Self {
        Self {
            min_score: matcher.snatch_threshold,
            min_size: snatch.min_size,
            max_size: snatch.max_size,
            reject_words: lowercase_all(&snatch.reject_words),
            preferred_formats: lowercase_all(&snatch.preferred_formats),
            excluded_locators: HashSet::new(),
        }
    }

    pub fn with_reject_words(mut self, words: &[&str]) -> Self {
        self.reject_words = words.iter().map(|w| w.to_lowercase()).collect();
        self
    }

    pub fn with_size_bounds(mut self, min_size: u64, max_size: u64) -> Self {
        self.min_size = min_size;
        self.max_size = max_size;
        self
    }

    pub fn with_min_score(mut self, min_score: u8) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn with_excluded_locators(mut self, locators: HashSet<String>) -> Self {
        self.excluded_locators = locators;
        self
    }

    /// The first reject word found in a title.
    pub fn reject_word_in(&self, title: &str) -> Option<&str> {
        let lowered = title.to_lowercase();
        self.reject_words
            .iter()
            .find(|w| !w.is_empty() && lowered.contains(w.as_str()))
            .map(String::as_str)
    }

    pub fn too_small(&self, size: u64) -> bool {
        self.min_size > 0 && size < self.min_size
    }

    pub fn too_large(&self, size: u64) -> bool {
        self.max_size > 0 && size > self.max_size
    }

    /// Position of a format in the preference list; unknown formats last.
    pub fn format_rank(&self, format: Option<&str>) -> usize {
        format
            .and_then(|f| self.preferred_formats.iter().position(|p| p == f))
            .unwrap_or(self.preferred_formats.len())
    }
}

fn lowercase_all(words: &[String]) -> Vec<String> {
    words.iter().map(|w| w.trim().to_lowercase()).collect()
}
