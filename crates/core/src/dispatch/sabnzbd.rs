//! SABnzbd download client.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use walkdir::WalkDir;

use crate::provider::MediaKind;

use super::config::SabnzbdConfig;
use super::types::{transport_error, DispatchError, DownloadClient, DownloadStatus};

const CLIENT_NAME: &str = "sabnzbd";

/// SABnzbd JSON API client. Downloads are identified by their `nzo_id`.
pub struct SabnzbdClient {
    client: Client,
    config: SabnzbdConfig,
}

impl SabnzbdClient {
    pub fn new(config: SabnzbdConfig) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .map_err(|e| {
                DispatchError::ClientUnreachable(format!("failed to build HTTP client: {}", e))
            })?;
        Ok(Self { client, config })
    }

    fn api_url(&self, params: &[(&str, &str)]) -> String {
        let mut url = format!(
            "{}/api?output=json&apikey={}",
            self.config.url.trim_end_matches('/'),
            urlencoding::encode(&self.config.api_key)
        );
        for (key, value) in params {
            url.push('&');
            url.push_str(key);
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }

    async fn call(&self, params: &[(&str, &str)]) -> Result<String, DispatchError> {
        let response = self
            .client
            .get(self.api_url(params))
            .send()
            .await
            .map_err(|e| transport_error(CLIENT_NAME, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(CLIENT_NAME, e))?;

        if !status.is_success() {
            return Err(DispatchError::ClientUnreachable(format!("HTTP {}", status)));
        }
        Ok(body)
    }

    async fn history_slot(&self, nzo_id: &str) -> Result<Option<HistorySlot>, DispatchError> {
        let body = self.call(&[("mode", "history"), ("nzo_ids", nzo_id)]).await?;
        let history: HistoryResponse = parse(&body)?;
        Ok(history.history.slots.into_iter().find(|s| s.nzo_id == nzo_id))
    }
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(default)]
    status: bool,
    #[serde(default)]
    nzo_ids: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueueResponse {
    queue: Queue,
}

#[derive(Debug, Deserialize)]
struct Queue {
    #[serde(default)]
    slots: Vec<QueueSlot>,
}

#[derive(Debug, Deserialize)]
struct QueueSlot {
    nzo_id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    history: History,
}

#[derive(Debug, Deserialize)]
struct History {
    #[serde(default)]
    slots: Vec<HistorySlot>,
}

#[derive(Debug, Deserialize)]
struct HistorySlot {
    nzo_id: String,
    status: String,
    #[serde(default)]
    storage: Option<String>,
    #[serde(default)]
    fail_message: Option<String>,
}

fn parse<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, DispatchError> {
    serde_json::from_str(body)
        .map_err(|e| DispatchError::ClientUnreachable(format!("unparseable sabnzbd response: {}", e)))
}

/// Interpret the `mode=addurl` response.
fn parse_add_response(body: &str) -> Result<String, DispatchError> {
    let response: AddResponse = parse(body)?;

    if let Some(error) = response.error.filter(|e| !e.is_empty()) {
        // A wrong key is a configuration problem, not a bad payload.
        if error.to_lowercase().contains("api key") {
            return Err(DispatchError::ClientUnreachable(error));
        }
        return Err(DispatchError::ClientRejected(error));
    }

    match response.nzo_ids.into_iter().next() {
        Some(id) if response.status => Ok(id),
        _ => Err(DispatchError::ClientRejected(
            "sabnzbd did not accept the nzb".to_string(),
        )),
    }
}

fn queue_status(status: &str) -> DownloadStatus {
    match status {
        "Downloading" | "Fetching" | "Grabbing" => DownloadStatus::Downloading,
        _ => DownloadStatus::Queued,
    }
}

fn history_status(slot: &HistorySlot) -> DownloadStatus {
    match slot.status.as_str() {
        "Completed" => DownloadStatus::Complete,
        "Failed" => DownloadStatus::Failed(
            slot.fail_message
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "sabnzbd reported a failure".to_string()),
        ),
        // Verifying, Repairing, Extracting, Moving, Running
        _ => DownloadStatus::Downloading,
    }
}

fn list_storage(storage: &Path) -> Vec<PathBuf> {
    if storage.is_file() {
        return vec![storage.to_path_buf()];
    }
    WalkDir::new(storage)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

#[async_trait]
impl DownloadClient for SabnzbdClient {
    fn name(&self) -> &str {
        CLIENT_NAME
    }

    async fn submit(
        &self,
        locator: &str,
        media_kind: MediaKind,
        title: &str,
    ) -> Result<String, DispatchError> {
        if media_kind != MediaKind::Nzb {
            return Err(DispatchError::Unsupported(format!(
                "sabnzbd cannot download {} results",
                media_kind
            )));
        }

        let body = self
            .call(&[
                ("mode", "addurl"),
                ("name", locator),
                ("nzbname", title),
                ("cat", &self.config.category),
            ])
            .await?;

        let nzo_id = parse_add_response(&body)?;
        debug!(nzo_id = %nzo_id, "nzb added to SABnzbd");
        Ok(nzo_id)
    }

    async fn status(&self, download_id: &str) -> Result<DownloadStatus, DispatchError> {
        let body = self.call(&[("mode", "queue"), ("nzo_ids", download_id)]).await?;
        let queue: QueueResponse = parse(&body)?;
        if let Some(slot) = queue.queue.slots.iter().find(|s| s.nzo_id == download_id) {
            return Ok(queue_status(&slot.status));
        }

        match self.history_slot(download_id).await? {
            Some(slot) => Ok(history_status(&slot)),
            None => Err(DispatchError::NotFound(download_id.to_string())),
        }
    }

    async fn files(&self, download_id: &str) -> Result<Vec<PathBuf>, DispatchError> {
        let slot = self
            .history_slot(download_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(download_id.to_string()))?;

        match slot.storage.filter(|s| !s.is_empty()) {
            Some(storage) => Ok(list_storage(Path::new(&storage))),
            None => Ok(Vec::new()),
        }
    }
}
