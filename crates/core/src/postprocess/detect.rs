//! File type detection by extension.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::config::LibraryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Ebook,
    Magazine,
    Audio,
    Archive,
    Image,
    Metadata,
    Unknown,
}

impl FileKind {
    /// Whether files of this kind are filed into the library.
    pub fn is_processable(&self) -> bool {
        matches!(self, FileKind::Ebook | FileKind::Magazine | FileKind::Audio)
    }
}

const ARCHIVE_TYPES: &[&str] = &["zip", "rar", "7z", "tar", "gz"];
const IMAGE_TYPES: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];
const METADATA_TYPES: &[&str] = &["opf", "nfo", "txt", "nzb", "sfv", "torrent", "json", "xml"];

/// Lower-case extension of a path.
pub fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Classify a file. Configured library types take precedence; an extension
/// listed as both ebook and magazine type (pdf) counts as ebook.
pub fn detect(path: &Path, library: &LibraryConfig) -> FileKind {
    let Some(ext) = extension(path) else {
        return FileKind::Unknown;
    };
    let listed = |types: &[String]| types.iter().any(|t| t.eq_ignore_ascii_case(&ext));

    if listed(&library.ebook_types) {
        FileKind::Ebook
    } else if listed(&library.magazine_types) {
        FileKind::Magazine
    } else if listed(&library.audio_types) {
        FileKind::Audio
    } else if ARCHIVE_TYPES.contains(&ext.as_str()) {
        FileKind::Archive
    } else if IMAGE_TYPES.contains(&ext.as_str()) {
        FileKind::Image
    } else if METADATA_TYPES.contains(&ext.as_str()) {
        FileKind::Metadata
    } else {
        FileKind::Unknown
    }
}
