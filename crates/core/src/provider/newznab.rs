//! Newznab (NZB indexers) and Torznab (torrent indexer proxies) adapter.
//!
//! Both speak the same RSS-based search API; Torznab adds torrent attributes
//! such as `magneturl`, `infohash` and `seeders`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::library::ItemKind;

use super::rate_limiter::ProviderRateLimiter;
use super::traits::ProviderAdapter;
use super::types::{MediaKind, ProviderError, ResultMetadata, SearchResult, SearchTerms};

/// One `[[providers]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewznabConfig {
    pub name: String,
    /// Base URL of the indexer (the `/api` suffix is optional).
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    /// `nzb` for Newznab indexers, `torrent` for Torznab.
    #[serde(default = "default_media_kind")]
    pub media_kind: MediaKind,
    /// Lower is more trusted when deduplicating.
    #[serde(default = "default_reliability_rank")]
    pub reliability_rank: u32,
    /// Query budget; 0 means unlimited.
    #[serde(default)]
    pub requests_per_minute: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_book_categories")]
    pub book_categories: Vec<u32>,
    #[serde(default = "default_magazine_categories")]
    pub magazine_categories: Vec<u32>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_media_kind() -> MediaKind {
    MediaKind::Nzb
}

fn default_reliability_rank() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

fn default_book_categories() -> Vec<u32> {
    vec![7000, 7020]
}

fn default_magazine_categories() -> Vec<u32> {
    vec![7010]
}

fn default_timeout_secs() -> u64 {
    30
}

impl NewznabConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>, media_kind: MediaKind) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            api_key: String::new(),
            media_kind,
            reliability_rank: default_reliability_rank(),
            requests_per_minute: 0,
            enabled: true,
            book_categories: default_book_categories(),
            magazine_categories: default_magazine_categories(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_reliability_rank(mut self, rank: u32) -> Self {
        self.reliability_rank = rank;
        self
    }
}

/// Newznab/Torznab search adapter.
pub struct NewznabProvider {
    client: Client,
    config: NewznabConfig,
    limiter: ProviderRateLimiter,
}

impl NewznabProvider {
    pub fn new(config: NewznabConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::ConnectionFailed(format!("HTTP client: {}", e)))?;

        let limiter = ProviderRateLimiter::new(&config.name, config.requests_per_minute);

        Ok(Self {
            client,
            config,
            limiter,
        })
    }

    fn build_search_url(&self, terms: &SearchTerms) -> String {
        let base = self.config.url.trim_end_matches('/');
        let endpoint = if base.ends_with("/api") {
            base.to_string()
        } else {
            format!("{}/api", base)
        };

        let categories = match terms.kind {
            ItemKind::Book => &self.config.book_categories,
            ItemKind::Magazine => &self.config.magazine_categories,
        };

        let mut url = format!(
            "{}?t=search&apikey={}&q={}",
            endpoint,
            urlencoding::encode(&self.config.api_key),
            urlencoding::encode(&terms.query)
        );
        if !categories.is_empty() {
            let cats: Vec<String> = categories.iter().map(u32::to_string).collect();
            url.push_str("&cat=");
            url.push_str(&cats.join(","));
        }
        url
    }
}

#[async_trait]
impl ProviderAdapter for NewznabProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn reliability_rank(&self) -> u32 {
        self.config.reliability_rank
    }

    fn media_kind(&self) -> MediaKind {
        self.config.media_kind
    }

    async fn query(&self, terms: &SearchTerms) -> Result<Vec<SearchResult>, ProviderError> {
        self.limiter.try_acquire().await?;

        debug!(provider = %self.config.name, query = %terms.query, "Querying indexer");

        let response = self
            .client
            .get(self.build_search_url(terms))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(self.config.timeout_secs * 1000)
                } else if e.is_connect() {
                    ProviderError::ConnectionFailed(e.to_string())
                } else {
                    ProviderError::ApiError(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError(format!(
                "HTTP {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::ApiError(format!("Failed to read response: {}", e)))?;

        let results = parse_feed(&body, &self.config.name, self.config.media_kind)?;
        debug!(provider = %self.config.name, results = results.len(), "Indexer answered");
        Ok(results)
    }
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Title,
    Link,
    PubDate,
    Size,
    Category,
}

#[derive(Debug, Default)]
struct ItemBuilder {
    title: Option<String>,
    link: Option<String>,
    enclosure_url: Option<String>,
    enclosure_length: Option<u64>,
    magnet: Option<String>,
    pub_date: Option<String>,
    size: Option<u64>,
    category: Option<String>,
    info_hash: Option<String>,
    seeders: Option<u32>,
}

impl ItemBuilder {
    fn set(&mut self, field: Field, text: String) {
        match field {
            Field::Title => self.title = Some(text),
            Field::Link => self.link = Some(text),
            Field::PubDate => self.pub_date = Some(text),
            Field::Size => self.size = text.trim().parse().ok(),
            Field::Category => {
                if self.category.is_none() {
                    self.category = Some(text);
                }
            }
        }
    }

    fn apply_attr(&mut self, name: &str, value: String) {
        match name {
            "size" => self.size = value.trim().parse().ok().or(self.size),
            "magneturl" => self.magnet = Some(value),
            "infohash" => self.info_hash = Some(value.to_lowercase()),
            "seeders" => self.seeders = value.trim().parse().ok(),
            "category" => {
                if self.category.is_none() {
                    self.category = Some(value);
                }
            }
            _ => {}
        }
    }

    fn build(self, provider: &str, kind: MediaKind) -> Option<SearchResult> {
        let title = self.title.filter(|t| !t.trim().is_empty())?;

        let locator = match kind {
            MediaKind::Torrent => self.magnet.or(self.link).or(self.enclosure_url),
            MediaKind::Nzb => self.link.or(self.enclosure_url),
        }?;

        Some(SearchResult {
            title,
            provider: provider.to_string(),
            media_kind: kind,
            size_bytes: self.size.or(self.enclosure_length).unwrap_or(0),
            posted_at: self.pub_date.as_deref().and_then(parse_pub_date),
            locator,
            metadata: ResultMetadata {
                category: self.category,
                info_hash: self.info_hash,
                seeders: self.seeders,
            },
        })
    }
}

fn attribute(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Parse a Newznab/Torznab RSS response.
///
/// Items without a title or a usable locator are skipped. An `<error>`
/// document is reported as [`ProviderError::ApiError`].
pub(crate) fn parse_feed(
    xml: &str,
    provider: &str,
    kind: MediaKind,
) -> Result<Vec<SearchResult>, ProviderError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut results = Vec::new();
    let mut item: Option<ItemBuilder> = None;
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"item" => item = Some(ItemBuilder::default()),
                b"title" => field = Some(Field::Title),
                b"link" => field = Some(Field::Link),
                b"pubDate" => field = Some(Field::PubDate),
                b"size" => field = Some(Field::Size),
                b"category" => field = Some(Field::Category),
                b"error" => return Err(api_error(&e)),
                _ => field = None,
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"enclosure" => {
                    if let Some(current) = item.as_mut() {
                        current.enclosure_url = attribute(&e, b"url");
                        current.enclosure_length =
                            attribute(&e, b"length").and_then(|l| l.parse().ok());
                    }
                }
                b"attr" => {
                    if let (Some(current), Some(name), Some(value)) =
                        (item.as_mut(), attribute(&e, b"name"), attribute(&e, b"value"))
                    {
                        current.apply_attr(&name, value);
                    }
                }
                b"error" => return Err(api_error(&e)),
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if let (Some(current), Some(f)) = (item.as_mut(), field) {
                    let text = t
                        .unescape()
                        .map_err(|e| ProviderError::Parse(e.to_string()))?
                        .into_owned();
                    current.set(f, text);
                }
            }
            Ok(Event::CData(c)) => {
                if let (Some(current), Some(f)) = (item.as_mut(), field) {
                    current.set(f, String::from_utf8_lossy(&c.into_inner()).into_owned());
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"item" {
                    if let Some(done) = item.take() {
                        match done.build(provider, kind) {
                            Some(result) => results.push(result),
                            None => debug!(provider = %provider, "Skipping item without title or link"),
                        }
                    }
                }
                field = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ProviderError::Parse(format!(
                    "at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    Ok(results)
}

fn api_error(e: &BytesStart) -> ProviderError {
    let code = attribute(e, b"code").unwrap_or_default();
    let description = attribute(e, b"description").unwrap_or_else(|| "unknown error".to_string());
    ProviderError::ApiError(format!("indexer error {}: {}", code, description))
}

fn parse_pub_date(date: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(date.trim())
        .or_else(|_| DateTime::parse_from_rfc3339(date.trim()))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
