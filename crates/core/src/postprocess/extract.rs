//! Metadata extraction from downloaded files.
//!
//! Sources in priority order: the EPUB package document, ID3 tags, a
//! sidecar `.opf` file, the filename. A higher priority source wins per
//! field; lower ones only fill gaps.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use id3::TagLike;
use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex_lite::Regex;
use tracing::{debug, warn};

use crate::normalize::normalize_isbn;

use super::detect::extension;
use super::types::PartialMetadata;

/// Reads whatever metadata a file carries.
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    /// Never fails: unreadable sources are skipped and an empty
    /// [`PartialMetadata`] is a valid answer.
    async fn extract(&self, path: &Path) -> PartialMetadata;
}

/// Extractor backed by the file itself and its neighbours.
#[derive(Debug, Clone, Default)]
pub struct FileMetadataExtractor;

impl FileMetadataExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Blocking extraction.
    pub fn extract_blocking(path: &Path) -> PartialMetadata {
        let ext = extension(path).unwrap_or_default();
        let mut meta = PartialMetadata::default();

        if ext == "epub" {
            match read_epub(path) {
                Ok(found) => meta.fill_from(found),
                Err(e) => debug!(path = %path.display(), error = %e, "No EPUB metadata"),
            }
        }

        if matches!(ext.as_str(), "mp3" | "m4b" | "m4a" | "flac") {
            if let Some(found) = read_tag(path) {
                meta.fill_from(found);
            }
        }

        for sidecar in sidecar_candidates(path) {
            if let Ok(xml) = std::fs::read_to_string(&sidecar) {
                meta.fill_from(parse_opf(&xml));
                break;
            }
        }

        meta.fill_from(parse_filename(path));
        meta
    }
}

#[async_trait]
impl MetadataExtractor for FileMetadataExtractor {
    async fn extract(&self, path: &Path) -> PartialMetadata {
        let owned = path.to_path_buf();
        match tokio::task::spawn_blocking(move || Self::extract_blocking(&owned)).await {
            Ok(meta) => meta,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Metadata extraction task failed");
                parse_filename(path)
            }
        }
    }
}

fn read_epub(path: &Path) -> Result<PartialMetadata, String> {
    let file = File::open(path).map_err(|e| e.to_string())?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| e.to_string())?;

    let container = read_entry(&mut archive, "META-INF/container.xml")?;
    let rootfile = container_rootfile(&container).ok_or("container.xml has no rootfile")?;
    let opf = read_entry(&mut archive, &rootfile)?;

    Ok(parse_opf(&opf))
}

fn read_entry(archive: &mut zip::ZipArchive<File>, name: &str) -> Result<String, String> {
    let mut entry = archive.by_name(name).map_err(|e| format!("{}: {}", name, e))?;
    let mut contents = String::new();
    entry
        .read_to_string(&mut contents)
        .map_err(|e| format!("{}: {}", name, e))?;
    Ok(contents)
}

fn read_tag(path: &Path) -> Option<PartialMetadata> {
    let tag = id3::Tag::read_from_path(path)
        .map_err(|e| debug!(path = %path.display(), error = %e, "No ID3 tag"))
        .ok()?;

    // Audiobooks carry the book title in the album and a chapter in the title.
    let title = tag.album().or_else(|| tag.title()).map(str::to_string);
    Some(PartialMetadata {
        title,
        author: tag.artist().map(str::to_string),
        year: tag.year().map(|y| y.to_string()),
        ..Default::default()
    })
}

fn sidecar_candidates(path: &Path) -> Vec<PathBuf> {
    let Some(dir) = path.parent() else {
        return Vec::new();
    };
    let mut candidates = Vec::new();
    if let Some(stem) = path.file_stem() {
        candidates.push(dir.join(stem).with_extension("opf"));
    }
    candidates.push(dir.join("metadata.opf"));
    candidates
}

fn attribute(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// `full-path` of the first rootfile in `META-INF/container.xml`.
fn container_rootfile(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"rootfile" => {
                return attribute(&e, b"full-path");
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

#[derive(Clone, Copy)]
enum OpfField {
    Title,
    Creator,
    Identifier { isbn_scheme: bool },
    Date,
}

/// Read Dublin Core and calibre metadata from an OPF package document.
///
/// Malformed documents yield whatever was read before the error.
pub(crate) fn parse_opf(xml: &str) -> PartialMetadata {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut meta = PartialMetadata::default();
    let mut field: Option<OpfField> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                field = match e.local_name().as_ref() {
                    b"title" => Some(OpfField::Title),
                    b"creator" => Some(OpfField::Creator),
                    b"identifier" => Some(OpfField::Identifier {
                        isbn_scheme: attribute(&e, b"scheme")
                            .map(|s| s.eq_ignore_ascii_case("isbn"))
                            .unwrap_or(false),
                    }),
                    b"date" => Some(OpfField::Date),
                    b"meta" => {
                        apply_meta(&mut meta, &e);
                        None
                    }
                    _ => None,
                };
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"meta" {
                    apply_meta(&mut meta, &e);
                }
            }
            Ok(Event::Text(t)) => {
                if let (Some(f), Ok(text)) = (field, t.unescape()) {
                    apply_text(&mut meta, f, text.trim());
                }
            }
            Ok(Event::End(_)) => field = None,
            Ok(Event::Eof) => break,
            Err(e) => {
                debug!(error = %e, "Malformed OPF document");
                break;
            }
            _ => {}
        }
    }

    meta
}

fn apply_text(meta: &mut PartialMetadata, field: OpfField, text: &str) {
    if text.is_empty() {
        return;
    }
    match field {
        OpfField::Title if meta.title.is_none() => meta.title = Some(text.to_string()),
        OpfField::Creator if meta.author.is_none() => meta.author = Some(text.to_string()),
        OpfField::Identifier { isbn_scheme } if meta.isbn.is_none() => {
            if let Some(isbn) = normalize_isbn(text) {
                meta.isbn = Some(isbn);
            } else if isbn_scheme {
                debug!(identifier = %text, "Unparseable ISBN identifier");
            }
        }
        OpfField::Date if meta.year.is_none() => {
            let year: String = text.chars().take(4).collect();
            if year.len() == 4 && year.chars().all(|c| c.is_ascii_digit()) {
                meta.year = Some(year);
            }
        }
        _ => {}
    }
}

fn apply_meta(meta: &mut PartialMetadata, e: &BytesStart) {
    let (Some(name), Some(content)) = (attribute(e, b"name"), attribute(e, b"content")) else {
        return;
    };
    match name.as_str() {
        "calibre:series" if !content.trim().is_empty() => {
            meta.series = Some(content.trim().to_string())
        }
        "calibre:series_index" => meta.series_position = Some(series_index(&content)),
        _ => {}
    }
}

/// calibre writes "1.0" for the first volume.
fn series_index(raw: &str) -> String {
    let raw = raw.trim();
    raw.strip_suffix(".0").unwrap_or(raw).to_string()
}

static YEAR_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\(\[]((?:18|19|20)\d{2})[\)\]]").unwrap());

static TRAILING_PAREN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+?)\s*\(([^()]+)\)$").unwrap());

static BY_AUTHOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(.+)\s+by\s+(.+)$").unwrap());

/// Guess title and author from a file name.
///
/// Recognises "Author - Title", "Title (Author)" and "Title by Author";
/// anything else is taken as the title.
pub(crate) fn parse_filename(path: &Path) -> PartialMetadata {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned = stem.replace('_', " ");

    let mut meta = PartialMetadata::default();
    let mut rest = cleaned.clone();
    if let Some(caps) = YEAR_TAG.captures(&cleaned) {
        meta.year = caps.get(1).map(|m| m.as_str().to_string());
        rest = YEAR_TAG.replace(&cleaned, "").into_owned();
    }
    let rest = rest.split_whitespace().collect::<Vec<_>>().join(" ");
    if rest.is_empty() {
        return meta;
    }

    let (title, author) = if let Some((author, title)) = rest.split_once(" - ") {
        (title.trim(), Some(author.trim()))
    } else if let Some(caps) = TRAILING_PAREN.captures(&rest) {
        (
            caps.get(1).map_or("", |m| m.as_str()),
            caps.get(2).map(|m| m.as_str()),
        )
    } else if let Some(caps) = BY_AUTHOR.captures(&rest) {
        (
            caps.get(1).map_or("", |m| m.as_str()),
            caps.get(2).map(|m| m.as_str()),
        )
    } else {
        (rest.as_str(), None)
    };

    meta.title = Some(title.to_string()).filter(|t| !t.is_empty());
    meta.author = author.map(str::to_string).filter(|a| !a.is_empty());
    meta
}
