//! qBittorrent download client.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::provider::MediaKind;

use super::config::QBittorrentConfig;
use super::types::{transport_error, DispatchError, DownloadClient, DownloadStatus};

const CLIENT_NAME: &str = "qbittorrent";

/// qBittorrent WebUI API client.
///
/// Downloads are identified by their info hash when the locator is a
/// magnet link, or by a unique tag attached at submit time otherwise.
pub struct QBittorrentClient {
    client: Client,
    config: QBittorrentConfig,
    /// Whether the cookie jar holds a live session.
    authenticated: Arc<RwLock<bool>>,
}

impl QBittorrentClient {
    pub fn new(config: QBittorrentConfig) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .cookie_store(true)
            .build()
            .map_err(|e| {
                DispatchError::ClientUnreachable(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            config,
            authenticated: Arc::new(RwLock::new(false)),
        })
    }

    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    async fn login(&self) -> Result<(), DispatchError> {
        let url = format!("{}/api/v2/auth/login", self.base_url());
        let params = [
            ("username", self.config.username.as_str()),
            ("password", self.config.password.as_str()),
        ];

        let response = self
            .client
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(|e| transport_error(CLIENT_NAME, e))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_success() && body.contains("Ok.") {
            debug!("qBittorrent login successful");
            *self.authenticated.write().await = true;
            Ok(())
        } else {
            Err(DispatchError::ClientUnreachable(format!(
                "qbittorrent authentication failed (HTTP {}): {}",
                status,
                body.chars().take(100).collect::<String>()
            )))
        }
    }

    async fn ensure_authenticated(&self) -> Result<(), DispatchError> {
        if *self.authenticated.read().await {
            return Ok(());
        }
        self.login().await
    }

    /// Send an authenticated request, logging in again once on 403.
    ///
    /// `build` is called per attempt since request bodies cannot be reused.
    async fn send<F>(&self, build: F) -> Result<String, DispatchError>
    where
        F: Fn(&Client, &str) -> RequestBuilder,
    {
        self.ensure_authenticated().await?;

        let mut response = build(&self.client, self.base_url())
            .send()
            .await
            .map_err(|e| transport_error(CLIENT_NAME, e))?;

        if response.status() == StatusCode::FORBIDDEN {
            warn!("qBittorrent session expired, re-authenticating");
            *self.authenticated.write().await = false;
            self.login().await?;
            response = build(&self.client, self.base_url())
                .send()
                .await
                .map_err(|e| transport_error(CLIENT_NAME, e))?;
        }

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(CLIENT_NAME, e))?;

        match status {
            s if s.is_success() => Ok(body),
            StatusCode::NOT_FOUND => Err(DispatchError::NotFound(body)),
            StatusCode::BAD_REQUEST | StatusCode::UNSUPPORTED_MEDIA_TYPE => {
                Err(DispatchError::ClientRejected(format!("HTTP {}: {}", status, body)))
            }
            StatusCode::FORBIDDEN => Err(DispatchError::ClientUnreachable(
                "qbittorrent refused the session".to_string(),
            )),
            s => Err(DispatchError::ClientUnreachable(format!("HTTP {}", s))),
        }
    }

    async fn lookup(&self, download_id: &str) -> Result<QbTorrent, DispatchError> {
        let query = if is_info_hash(download_id) {
            format!("hashes={}", download_id)
        } else {
            format!("tag={}", urlencoding::encode(download_id))
        };

        let body = self
            .send(|client, base| client.get(format!("{}/api/v2/torrents/info?{}", base, query)))
            .await?;
        let torrents: Vec<QbTorrent> = serde_json::from_str(&body).map_err(|e| {
            DispatchError::ClientUnreachable(format!("unparseable torrent list: {}", e))
        })?;

        torrents
            .into_iter()
            .next()
            .ok_or_else(|| DispatchError::NotFound(download_id.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct QbTorrent {
    hash: String,
    state: String,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    save_path: String,
}

#[derive(Debug, Deserialize)]
struct QbFile {
    name: String,
}

#[async_trait]
impl DownloadClient for QBittorrentClient {
    fn name(&self) -> &str {
        CLIENT_NAME
    }

    async fn submit(
        &self,
        locator: &str,
        media_kind: MediaKind,
        title: &str,
    ) -> Result<String, DispatchError> {
        if media_kind != MediaKind::Torrent {
            return Err(DispatchError::Unsupported(format!(
                "qbittorrent cannot download {} results",
                media_kind
            )));
        }

        let download_id = extract_hash_from_magnet(locator)
            .unwrap_or_else(|| format!("bookbag-{}", uuid::Uuid::new_v4().simple()));

        let body = self
            .send(|client, base| {
                let mut form = multipart::Form::new()
                    .text("urls", locator.to_string())
                    .text("category", self.config.category.clone())
                    .text("tags", download_id.clone())
                    .text("rename", title.to_string());
                if let Some(path) = &self.config.download_path {
                    form = form.text("savepath", path.clone());
                }
                client
                    .post(format!("{}/api/v2/torrents/add", base))
                    .multipart(form)
            })
            .await?;

        if body.trim() == "Fails." {
            return Err(DispatchError::ClientRejected(
                "qbittorrent refused the torrent".to_string(),
            ));
        }

        debug!(download_id = %download_id, "torrent added to qBittorrent");
        Ok(download_id)
    }

    async fn status(&self, download_id: &str) -> Result<DownloadStatus, DispatchError> {
        let torrent = self.lookup(download_id).await?;
        Ok(map_state(&torrent.state, torrent.progress))
    }

    async fn files(&self, download_id: &str) -> Result<Vec<PathBuf>, DispatchError> {
        let torrent = self.lookup(download_id).await?;
        let hash = torrent.hash.to_lowercase();

        let body = self
            .send(|client, base| {
                client.get(format!("{}/api/v2/torrents/files?hash={}", base, hash))
            })
            .await?;
        let files: Vec<QbFile> = serde_json::from_str(&body).map_err(|e| {
            DispatchError::ClientUnreachable(format!("unparseable file list: {}", e))
        })?;

        Ok(resolve_files(Path::new(&torrent.save_path), files))
    }
}

fn resolve_files(save_path: &Path, files: Vec<QbFile>) -> Vec<PathBuf> {
    files.into_iter().map(|f| save_path.join(f.name)).collect()
}

/// Map a qBittorrent state string to download progress.
fn map_state(state: &str, progress: f64) -> DownloadStatus {
    match state {
        "error" => DownloadStatus::Failed("qbittorrent reported an error".to_string()),
        "missingFiles" => DownloadStatus::Failed("download files are missing".to_string()),
        "uploading" | "forcedUP" | "stalledUP" | "pausedUP" | "stoppedUP" | "queuedUP" => {
            DownloadStatus::Complete
        }
        "queuedDL" | "pausedDL" | "stoppedDL" | "metaDL" | "checkingResumeData" => {
            DownloadStatus::Queued
        }
        _ if progress >= 1.0 && state != "checkingUP" && state != "moving" => {
            DownloadStatus::Complete
        }
        _ => DownloadStatus::Downloading,
    }
}

fn is_info_hash(id: &str) -> bool {
    id.len() == 40 && id.chars().all(|c| c.is_ascii_hexdigit())
}

/// Extract the info hash from a magnet URI.
fn extract_hash_from_magnet(magnet: &str) -> Option<String> {
    let (_, query) = magnet.split_once('?')?;
    query
        .split('&')
        .find_map(|param| param.strip_prefix("xt=urn:btih:"))
        .filter(|hash| !hash.is_empty())
        .map(|hash| hash.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_state() {
        assert_eq!(map_state("downloading", 0.3), DownloadStatus::Downloading);
        assert_eq!(map_state("stalledDL", 0.3), DownloadStatus::Downloading);
        assert_eq!(map_state("metaDL", 0.0), DownloadStatus::Queued);
        assert_eq!(map_state("queuedDL", 0.0), DownloadStatus::Queued);
        assert_eq!(map_state("uploading", 1.0), DownloadStatus::Complete);
        assert_eq!(map_state("stoppedUP", 1.0), DownloadStatus::Complete);
        assert_eq!(map_state("checkingUP", 1.0), DownloadStatus::Downloading);
        assert!(matches!(map_state("missingFiles", 1.0), DownloadStatus::Failed(_)));
        assert!(matches!(map_state("error", 0.5), DownloadStatus::Failed(_)));
    }

    #[test]
    fn test_unknown_state_uses_progress() {
        assert_eq!(map_state("somethingNew", 1.0), DownloadStatus::Complete);
        assert_eq!(map_state("somethingNew", 0.9), DownloadStatus::Downloading);
    }

    #[test]
    fn test_extract_hash_from_magnet() {
        let magnet = "magnet:?xt=urn:btih:ABC123DEF456&dn=Dune";
        assert_eq!(extract_hash_from_magnet(magnet), Some("abc123def456".to_string()));

        let later = "magnet:?dn=Dune&xt=urn:btih:abc123";
        assert_eq!(extract_hash_from_magnet(later), Some("abc123".to_string()));

        assert_eq!(extract_hash_from_magnet("http://tracker/get/1.torrent"), None);
        assert_eq!(extract_hash_from_magnet("magnet:?dn=Dune"), None);
    }

    #[test]
    fn test_is_info_hash() {
        assert!(is_info_hash("0123456789abcdef0123456789abcdef01234567"));
        assert!(!is_info_hash("bookbag-0123"));
        assert!(!is_info_hash("abc123"));
    }

    #[test]
    fn test_resolve_files() {
        let files = vec![
            QbFile { name: "Dune/Dune.epub".to_string() },
            QbFile { name: "Dune/cover.jpg".to_string() },
        ];
        let resolved = resolve_files(Path::new("/downloads/books"), files);
        assert_eq!(
            resolved,
            vec![
                PathBuf::from("/downloads/books/Dune/Dune.epub"),
                PathBuf::from("/downloads/books/Dune/cover.jpg"),
            ]
        );
    }

    #[test]
    fn test_torrent_list_parsing() {
        let body = r#"[{"hash":"ABC","name":"Dune","state":"uploading","progress":1.0,"save_path":"/dl","size":100}]"#;
        let torrents: Vec<QbTorrent> = serde_json::from_str(body).unwrap();
        assert_eq!(torrents[0].hash, "ABC");
        assert_eq!(torrents[0].save_path, "/dl");
    }

    #[tokio::test]
    async fn test_submit_rejects_nzb() {
        let client = QBittorrentClient::new(QBittorrentConfig::new("http://127.0.0.1:1")).unwrap();
        let err = client
            .submit("http://indexer/get/1.nzb", MediaKind::Nzb, "Dune")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Unsupported(_)));
    }
}
