//! Library data model: wanted items, snatch history and discovered files.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::MediaKind;

/// What kind of library entity a wanted item refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Book,
    /// A single magazine issue.
    Magazine,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Book => "book",
            ItemKind::Magazine => "magazine",
        }
    }
}

impl FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "book" => Ok(ItemKind::Book),
            "magazine" => Ok(ItemKind::Magazine),
            other => Err(format!("unknown item kind: {}", other)),
        }
    }
}

/// Lifecycle of a wanted item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WantedStatus {
    /// Actively searched for.
    Wanted,
    /// A result was chosen and handed to a download client.
    Snatched,
    /// The file is in the library; the library row is open/available.
    Processed,
    /// Permanently failed; no more automatic attempts.
    Failed,
}

impl WantedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WantedStatus::Wanted => "wanted",
            WantedStatus::Snatched => "snatched",
            WantedStatus::Processed => "processed",
            WantedStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for WantedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WantedStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wanted" => Ok(WantedStatus::Wanted),
            "snatched" => Ok(WantedStatus::Snatched),
            "processed" => Ok(WantedStatus::Processed),
            "failed" => Ok(WantedStatus::Failed),
            other => Err(format!("unknown wanted status: {}", other)),
        }
    }
}

/// A book or magazine issue currently being searched for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WantedItem {
    pub id: String,
    pub kind: ItemKind,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_position: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
    /// Issue date for magazines (`YYYY-MM` or `YYYY-MM-DD`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<String>,
    /// Accepted formats (lower-case extensions). Empty means any.
    pub formats: Vec<String>,
    pub status: WantedStatus,
    /// Library file path once processed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    pub snatch_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WantedItem {
    /// Short summary handed to notifiers.
    pub fn summary(&self) -> WantedSummary {
        WantedSummary {
            id: self.id.clone(),
            kind: self.kind,
            title: self.title.clone(),
            author: self.author.clone(),
        }
    }

    /// Publication year, taken from the issue date when present.
    pub fn year(&self) -> Option<&str> {
        self.issue_date
            .as_deref()
            .and_then(|d| d.get(..4))
            .filter(|y| y.chars().all(|c| c.is_ascii_digit()))
    }

    /// Whether a file format is acceptable for this item.
    pub fn accepts_format(&self, format: &str) -> bool {
        self.formats.is_empty() || self.formats.iter().any(|f| f.eq_ignore_ascii_case(format))
    }
}

/// Condensed view of a wanted item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WantedSummary {
    pub id: String,
    pub kind: ItemKind,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

/// Request to add a wanted item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWantedItem {
    pub kind: ItemKind,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub series: Option<String>,
    #[serde(default)]
    pub series_position: Option<String>,
    #[serde(default)]
    pub isbn: Option<String>,
    #[serde(default)]
    pub issue_date: Option<String>,
    #[serde(default)]
    pub formats: Vec<String>,
}

impl NewWantedItem {
    /// A wanted book.
    pub fn book(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            kind: ItemKind::Book,
            title: title.into(),
            author: Some(author.into()),
            series: None,
            series_position: None,
            isbn: None,
            issue_date: None,
            formats: Vec::new(),
        }
    }

    /// A wanted magazine issue.
    pub fn magazine(title: impl Into<String>, issue_date: impl Into<String>) -> Self {
        Self {
            kind: ItemKind::Magazine,
            title: title.into(),
            author: None,
            series: None,
            series_position: None,
            isbn: None,
            issue_date: Some(issue_date.into()),
            formats: Vec::new(),
        }
    }

    pub fn with_series(mut self, series: impl Into<String>, position: Option<&str>) -> Self {
        self.series = Some(series.into());
        self.series_position = position.map(str::to_string);
        self
    }

    pub fn with_isbn(mut self, isbn: impl Into<String>) -> Self {
        self.isbn = Some(isbn.into());
        self
    }

    pub fn with_formats(mut self, formats: &[&str]) -> Self {
        self.formats = formats.iter().map(|f| f.to_lowercase()).collect();
        self
    }
}

/// Status of a snatch record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnatchStatus {
    Snatched,
    Processed,
    Failed,
}

impl SnatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnatchStatus::Snatched => "snatched",
            SnatchStatus::Processed => "processed",
            SnatchStatus::Failed => "failed",
        }
    }
}

impl FromStr for SnatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "snatched" => Ok(SnatchStatus::Snatched),
            "processed" => Ok(SnatchStatus::Processed),
            "failed" => Ok(SnatchStatus::Failed),
            other => Err(format!("unknown snatch status: {}", other)),
        }
    }
}

/// History entry linking a wanted item to the result chosen for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnatchRecord {
    pub id: String,
    pub wanted_id: String,
    pub result_title: String,
    pub provider: String,
    pub locator: String,
    pub media_kind: MediaKind,
    pub size_bytes: u64,
    /// Download client the result was bound to.
    pub client: String,
    /// Identifier assigned by the download client, once dispatched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_download_id: Option<String>,
    pub status: SnatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub dispatch_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SnatchRecord {
    pub fn is_dispatched(&self) -> bool {
        self.client_download_id.is_some()
    }
}

/// Data for a new snatch record.
#[derive(Debug, Clone)]
pub struct NewSnatch {
    pub result_title: String,
    pub provider: String,
    pub locator: String,
    pub media_kind: MediaKind,
    pub size_bytes: u64,
    pub client: String,
}

/// Freshness token of a search cycle for one wanted item.
///
/// Tokens grow monotonically per item. A write carrying a token older than
/// the last completed cycle is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SearchToken(pub u64);

/// Result of the atomic snatch transition.
#[derive(Debug, Clone)]
pub enum SnatchOutcome {
    /// The item moved to Snatched and this record was created.
    Snatched(SnatchRecord),
    /// The item is no longer Wanted (another cycle snatched it first).
    AlreadySnatched,
    /// A newer search cycle for this item already completed.
    Superseded,
}

/// Reconciliation state of a discovered file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileState {
    Discovered,
    Identified,
    Organized,
    /// Terminal success.
    Recorded,
    /// Terminal failure, left for manual review.
    Unidentified,
}

impl ReconcileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileState::Discovered => "discovered",
            ReconcileState::Identified => "identified",
            ReconcileState::Organized => "organized",
            ReconcileState::Recorded => "recorded",
            ReconcileState::Unidentified => "unidentified",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReconcileState::Recorded | ReconcileState::Unidentified)
    }
}

impl fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReconcileState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discovered" => Ok(ReconcileState::Discovered),
            "identified" => Ok(ReconcileState::Identified),
            "organized" => Ok(ReconcileState::Organized),
            "recorded" => Ok(ReconcileState::Recorded),
            "unidentified" => Ok(ReconcileState::Unidentified),
            other => Err(format!("unknown reconcile state: {}", other)),
        }
    }
}

/// A file found after a download (or in the drop folder), queued for
/// reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredFile {
    pub id: i64,
    pub path: PathBuf,
    /// Snatch that produced the file, if it came from a tracked download.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snatch_id: Option<String>,
    pub state: ReconcileState,
    /// Wanted item the file was identified as.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wanted_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            WantedStatus::Wanted,
            WantedStatus::Snatched,
            WantedStatus::Processed,
            WantedStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<WantedStatus>(), Ok(status));
        }
        assert!("open".parse::<WantedStatus>().is_err());
    }

    #[test]
    fn test_new_wanted_builders() {
        let book = NewWantedItem::book("The Gunslinger", "Stephen King")
            .with_series("The Dark Tower", Some("1"))
            .with_formats(&["EPUB", "mobi"]);
        assert_eq!(book.kind, ItemKind::Book);
        assert_eq!(book.series_position.as_deref(), Some("1"));
        assert_eq!(book.formats, vec!["epub", "mobi"]);

        let mag = NewWantedItem::magazine("Wired", "2024-05");
        assert_eq!(mag.kind, ItemKind::Magazine);
        assert!(mag.author.is_none());
    }

    #[test]
    fn test_reconcile_state_terminal() {
        assert!(ReconcileState::Recorded.is_terminal());
        assert!(ReconcileState::Unidentified.is_terminal());
        assert!(!ReconcileState::Organized.is_terminal());
    }
}
