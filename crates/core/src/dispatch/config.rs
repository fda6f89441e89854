//! Download client configuration.

use serde::{Deserialize, Serialize};

/// qBittorrent WebUI connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QBittorrentConfig {
    /// WebUI URL (e.g., "http://localhost:8080").
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Category assigned to every torrent we add.
    #[serde(default = "default_category")]
    pub category: String,
    /// Save path override. The client default is used when unset.
    #[serde(default)]
    pub download_path: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u32,
}

impl QBittorrentConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: String::new(),
            password: String::new(),
            category: default_category(),
            download_path: None,
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = username.to_string();
        self.password = password.to_string();
        self
    }
}

/// SABnzbd API connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SabnzbdConfig {
    /// Base URL (e.g., "http://localhost:8085").
    pub url: String,
    pub api_key: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u32,
}

impl SabnzbdConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            category: default_category(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// The `[download_clients]` section. Torrents go to qBittorrent, NZBs to
/// SABnzbd; a kind without a configured client cannot be dispatched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadClientsConfig {
    #[serde(default)]
    pub qbittorrent: Option<QBittorrentConfig>,
    #[serde(default)]
    pub sabnzbd: Option<SabnzbdConfig>,
}

fn default_category() -> String {
    "books".to_string()
}

fn default_timeout_secs() -> u32 {
    30
}
