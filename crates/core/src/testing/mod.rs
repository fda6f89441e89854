//! Testing utilities and mock implementations.
//!
//! Mocks for every external collaborator so search, dispatch and
//! post-processing can be exercised without indexers, download clients or
//! real book files.
//!
//! # Example
//!
//! ```rust,ignore
//! use bookbag_core::testing::{fixtures, MockDownloadClient, MockProvider};
//!
//! let provider = MockProvider::new("tracker", 1, MediaKind::Torrent);
//! provider.set_results(vec![fixtures::search_result("Frank Herbert - Dune.epub", "tracker", 2_000_000)]).await;
//!
//! let client = MockDownloadClient::new("qbittorrent");
//! client.set_status("qbittorrent-1", DownloadStatus::Complete).await;
//! ```

mod mock_download_client;
mod mock_metadata_extractor;
mod mock_provider;

pub use mock_download_client::{MockDownloadClient, RecordedSubmit};
pub use mock_metadata_extractor::MockMetadataExtractor;
pub use mock_provider::MockProvider;

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::fs::File;
    use std::io::Write;
    use std::path::Path;

    use chrono::Utc;
    use sha2::{Digest, Sha256};

    use crate::library::{ItemKind, WantedItem, WantedStatus};
    use crate::provider::{MediaKind, ResultMetadata, SearchResult};

    /// A torrent result whose magnet is unique per title and provider.
    pub fn search_result(title: &str, provider: &str, size_bytes: u64) -> SearchResult {
        let digest = Sha256::digest(format!("{}|{}", title, provider).as_bytes());
        let hash: String = format!("{:x}", digest).chars().take(40).collect();
        SearchResult {
            title: title.to_string(),
            provider: provider.to_string(),
            media_kind: MediaKind::Torrent,
            size_bytes,
            posted_at: None,
            locator: format!(
                "magnet:?xt=urn:btih:{}&dn={}",
                hash,
                urlencoding::encode(title)
            ),
            metadata: ResultMetadata {
                info_hash: Some(hash),
                seeders: Some(10),
                ..Default::default()
            },
        }
    }

    /// An NZB result.
    pub fn nzb_result(title: &str, provider: &str, size_bytes: u64) -> SearchResult {
        let mut result = search_result(title, provider, size_bytes);
        result.media_kind = MediaKind::Nzb;
        result.locator = format!(
            "https://{}/getnzb/{}.nzb",
            provider,
            result.metadata.info_hash.take().unwrap_or_default()
        );
        result.metadata.seeders = None;
        result
    }

    /// A Wanted book that is not stored anywhere.
    pub fn wanted_book(title: &str, author: &str) -> WantedItem {
        let now = Utc::now();
        WantedItem {
            id: uuid::Uuid::new_v4().to_string(),
            kind: ItemKind::Book,
            title: title.to_string(),
            author: Some(author.to_string()),
            series: None,
            series_position: None,
            isbn: None,
            issue_date: None,
            formats: Vec::new(),
            status: WantedStatus::Wanted,
            file_path: None,
            snatch_attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// A Wanted magazine issue that is not stored anywhere.
    pub fn wanted_magazine(title: &str, issue_date: &str) -> WantedItem {
        let mut item = wanted_book(title, "");
        item.kind = ItemKind::Magazine;
        item.author = None;
        item.issue_date = Some(issue_date.to_string());
        item
    }

    /// Write a minimal EPUB with a package document carrying the given
    /// metadata.
    pub fn write_epub(path: &Path, title: &str, author: &str, isbn: Option<&str>) {
        let identifier = isbn
            .map(|i| format!(r#"<dc:identifier opf:scheme="ISBN">{}</dc:identifier>"#, i))
            .unwrap_or_default();
        let opf = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
    <dc:title>{}</dc:title>
    <dc:creator opf:role="aut">{}</dc:creator>
    {}
  </metadata>
</package>"#,
            title, author, identifier
        );
        let container = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles><rootfile full-path="content.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#;

        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        zip.start_file("mimetype", options).unwrap();
        zip.write_all(b"application/epub+zip").unwrap();
        zip.start_file("META-INF/container.xml", options).unwrap();
        zip.write_all(container.as_bytes()).unwrap();
        zip.start_file("content.opf", options).unwrap();
        zip.write_all(opf.as_bytes()).unwrap();
        zip.finish().unwrap();
    }

    /// Write a zip archive holding `entries` as `(name, contents)` pairs.
    pub fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        for (name, contents) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(contents.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
}
