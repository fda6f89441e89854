use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::dispatch::DownloadClientsConfig;
use crate::matcher::MatcherConfig;
use crate::postprocess::{LibraryConfig, PlacerConfig};
use crate::provider::{MediaKind, NewznabConfig};
use crate::scheduler::SchedulerConfig;
use crate::snatch::SnatchConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub library: LibraryConfig,
    #[serde(default)]
    pub matching: MatcherConfig,
    #[serde(default)]
    pub snatch: SnatchConfig,
    #[serde(default)]
    pub providers: Vec<NewznabConfig>,
    #[serde(default)]
    pub download_clients: DownloadClientsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub placer: PlacerConfig,
}

impl Config {
    /// Minimal configuration around a library and download folder.
    pub fn new(library: LibraryConfig) -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            library,
            matching: MatcherConfig::default(),
            snatch: SnatchConfig::default(),
            providers: Vec::new(),
            download_clients: DownloadClientsConfig::default(),
            scheduler: SchedulerConfig::default(),
            placer: PlacerConfig::default(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    5299
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("bookbag.db")
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub library: LibraryConfig,
    pub matching: MatcherConfig,
    pub snatch: SnatchConfig,
    pub providers: Vec<SanitizedProviderConfig>,
    pub download_clients: SanitizedDownloadClientsConfig,
    pub scheduler: SchedulerConfig,
}

/// Sanitized provider entry (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedProviderConfig {
    pub name: String,
    pub url: String,
    pub media_kind: MediaKind,
    pub reliability_rank: u32,
    pub enabled: bool,
    pub api_key_configured: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedDownloadClientsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qbittorrent: Option<SanitizedClientConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sabnzbd: Option<SanitizedClientConfig>,
}

/// Sanitized download client (credentials hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedClientConfig {
    pub url: String,
    pub category: String,
    pub credentials_configured: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let clients = &config.download_clients;
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            library: config.library.clone(),
            matching: config.matching.clone(),
            snatch: config.snatch.clone(),
            providers: config
                .providers
                .iter()
                .map(|p| SanitizedProviderConfig {
                    name: p.name.clone(),
                    url: p.url.clone(),
                    media_kind: p.media_kind,
                    reliability_rank: p.reliability_rank,
                    enabled: p.enabled,
                    api_key_configured: !p.api_key.is_empty(),
                })
                .collect(),
            download_clients: SanitizedDownloadClientsConfig {
                qbittorrent: clients.qbittorrent.as_ref().map(|q| SanitizedClientConfig {
                    url: q.url.clone(),
                    category: q.category.clone(),
                    credentials_configured: !q.password.is_empty(),
                }),
                sabnzbd: clients.sabnzbd.as_ref().map(|s| SanitizedClientConfig {
                    url: s.url.clone(),
                    category: s.category.clone(),
                    credentials_configured: !s.api_key.is_empty(),
                }),
            },
            scheduler: config.scheduler.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{QBittorrentConfig, SabnzbdConfig};

    const MINIMAL: &str = r#"
[library]
root = "/books"
download_dir = "/downloads"
"#;

    #[test]
    fn test_deserialize_minimal_config() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.server.port, 5299);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.database.path.to_str().unwrap(), "bookbag.db");
        assert_eq!(config.library.root, PathBuf::from("/books"));
        assert_eq!(config.matching.snatch_threshold, 80);
        assert_eq!(config.matching.confirm_threshold, 90);
        assert_eq!(config.snatch.max_snatch_attempts, 3);
        assert!(config.providers.is_empty());
        assert!(config.download_clients.qbittorrent.is_none());
    }

    #[test]
    fn test_deserialize_missing_library_fails() {
        let toml = r#"
[server]
port = 8080
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_full_config() {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 9000

[database]
path = "/data/library.sqlite"

[library]
root = "/books"
download_dir = "/downloads"
untracked_dir = "/drop"
ebook_folder_format = "$Author/$Series"

[matching]
snatch_threshold = 75

[snatch]
reject_words = ["sample"]
max_size = 50000000

[[providers]]
name = "nzbgeek"
url = "https://api.nzbgeek.info"
api_key = "secret"

[[providers]]
name = "jackett"
url = "http://localhost:9117/api/v2.0/indexers/all/results/torznab"
media_kind = "torrent"
reliability_rank = 20

[download_clients.qbittorrent]
url = "http://localhost:8080"
username = "admin"
password = "adminadmin"

[download_clients.sabnzbd]
url = "http://localhost:8085"
api_key = "sabkey"

[scheduler]
search_interval_ms = 3600000
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.library.untracked_dir, Some(PathBuf::from("/drop")));
        assert_eq!(config.library.ebook_folder_format, "$Author/$Series");
        assert_eq!(config.library.ebook_file_format, "$Title - $Author");
        assert_eq!(config.matching.snatch_threshold, 75);
        assert_eq!(config.snatch.reject_words, vec!["sample"]);
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].media_kind, MediaKind::Nzb);
        assert_eq!(config.providers[1].media_kind, MediaKind::Torrent);
        assert_eq!(
            config.download_clients.qbittorrent.as_ref().unwrap().category,
            "books"
        );
        assert_eq!(config.scheduler.search_interval_ms, 3_600_000);
    }

    #[test]
    fn test_sanitized_config_hides_secrets() {
        let mut config = Config::new(LibraryConfig::new("/books", "/downloads"));
        config.providers.push(
            NewznabConfig::new("nzbgeek", "https://api.nzbgeek.info", MediaKind::Nzb)
                .with_api_key("secret-key"),
        );
        config.download_clients.qbittorrent = Some(
            QBittorrentConfig::new("http://localhost:8080").with_credentials("admin", "hunter2"),
        );
        config.download_clients.sabnzbd =
            Some(SabnzbdConfig::new("http://localhost:8085", "sab-secret"));

        let sanitized = SanitizedConfig::from(&config);
        assert!(sanitized.providers[0].api_key_configured);
        assert!(
            sanitized
                .download_clients
                .qbittorrent
                .as_ref()
                .unwrap()
                .credentials_configured
        );

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("secret-key"));
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("sab-secret"));
    }
}
