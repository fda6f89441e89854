use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::library::WantedSummary;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A wanted item was filed into the library.
    Recorded,
    /// A snatch failed terminally.
    SnatchFailed,
    /// A downloaded file could not be identified.
    Unidentified,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Recorded => "recorded",
            NotificationKind::SnatchFailed => "snatch_failed",
            NotificationKind::Unidentified => "unidentified",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wanted: Option<WantedSummary>,
    /// Human readable detail (destination path, failure reason, file path).
    pub detail: String,
    pub at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(kind: NotificationKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            wanted: None,
            detail: detail.into(),
            at: Utc::now(),
        }
    }

    pub fn with_wanted(mut self, wanted: Option<WantedSummary>) -> Self {
        self.wanted = wanted;
        self
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// A notification sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError>;
}
