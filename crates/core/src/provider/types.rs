//! Types shared by search providers and the result pipeline.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::library::{ItemKind, WantedItem};
use crate::normalize::{normalize, normalize_author};

/// Transport a result is downloaded over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Nzb,
    Torrent,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Nzb => "nzb",
            MediaKind::Torrent => "torrent",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nzb" => Ok(MediaKind::Nzb),
            "torrent" => Ok(MediaKind::Torrent),
            other => Err(format!("unknown media kind: {}", other)),
        }
    }
}

/// Provider-specific extras attached to a result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Lower-case hex info hash (torrents only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seeders: Option<u32>,
}

/// One candidate returned by a provider for one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Raw release title as published.
    pub title: String,
    /// Name of the provider that returned it.
    pub provider: String,
    pub media_kind: MediaKind,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_at: Option<DateTime<Utc>>,
    /// Download URL or magnet URI.
    pub locator: String,
    #[serde(default)]
    pub metadata: ResultMetadata,
}

/// What a provider is asked to search for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchTerms {
    /// Free-text query sent to the provider.
    pub query: String,
    pub kind: ItemKind,
}

impl SearchTerms {
    /// Terms for a wanted item.
    ///
    /// Books are searched as "author title". Magazines are searched by title
    /// and the year of the wanted issue; month spellings vary too much
    /// between releases to be part of the query.
    pub fn for_item(item: &WantedItem) -> Self {
        let query = match item.kind {
            ItemKind::Book => match item.author.as_deref() {
                Some(author) => {
                    format!("{} {}", normalize_author(author), normalize(&item.title))
                }
                None => normalize(&item.title),
            },
            ItemKind::Magazine => match item.year() {
                Some(year) => format!("{} {}", normalize(&item.title), year),
                None => normalize(&item.title),
            },
        };

        Self {
            query: query.trim().to_string(),
            kind: item.kind,
        }
    }
}

/// Everything one search cycle for one item produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub wanted_id: String,
    /// Deduplicated results, most eligible first.
    pub results: Vec<SearchResult>,
    /// Providers that failed or timed out (name -> error message).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub provider_errors: HashMap<String, String>,
    pub duration_ms: u64,
}

/// Errors a provider adapter can return.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Provider API error: {0}")]
    ApiError(String),

    #[error("Failed to parse provider response: {0}")]
    Parse(String),

    #[error("Rate limited for provider {provider}, retry in {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Provider timed out after {0}ms")]
    Timeout(u64),
}

impl ProviderError {
    /// Transport-level failures that may clear up by the next cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::ConnectionFailed(_)
                | ProviderError::RateLimited { .. }
                | ProviderError::Timeout(_)
        )
    }

    /// Label used for the provider query metric.
    pub fn metric_label(&self) -> &'static str {
        match self {
            ProviderError::Timeout(_) => "timeout",
            ProviderError::RateLimited { .. } => "rate_limited",
            _ => "error",
        }
    }
}
