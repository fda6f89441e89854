//! Library layout and reconcile configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The `[library]` section: where files live and how they are named.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Root of the organized library.
    pub root: PathBuf,

    /// Where download clients put completed downloads.
    pub download_dir: PathBuf,

    /// Drop folder scanned for files nobody snatched.
    #[serde(default)]
    pub untracked_dir: Option<PathBuf>,

    #[serde(default = "default_ebook_folder")]
    pub ebook_folder_format: String,
    #[serde(default = "default_ebook_file")]
    pub ebook_file_format: String,

    #[serde(default = "default_magazine_folder")]
    pub magazine_folder_format: String,
    #[serde(default = "default_magazine_file")]
    pub magazine_file_format: String,

    #[serde(default = "default_ebook_folder")]
    pub audio_folder_format: String,
    #[serde(default = "default_ebook_file")]
    pub audio_file_format: String,

    #[serde(default = "default_ebook_types")]
    pub ebook_types: Vec<String>,
    #[serde(default = "default_magazine_types")]
    pub magazine_types: Vec<String>,
    #[serde(default = "default_audio_types")]
    pub audio_types: Vec<String>,
}

fn default_ebook_folder() -> String {
    "$Author/$Title".to_string()
}

fn default_ebook_file() -> String {
    "$Title - $Author".to_string()
}

fn default_magazine_folder() -> String {
    "$Title".to_string()
}

fn default_magazine_file() -> String {
    "$Title - $IssueDate".to_string()
}

fn default_ebook_types() -> Vec<String> {
    ["epub", "mobi", "azw3", "pdf"].iter().map(|s| s.to_string()).collect()
}

fn default_magazine_types() -> Vec<String> {
    ["pdf", "cbz", "cbr"].iter().map(|s| s.to_string()).collect()
}

fn default_audio_types() -> Vec<String> {
    ["mp3", "m4b", "m4a", "flac", "ogg"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl LibraryConfig {
    pub fn new(root: impl Into<PathBuf>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            download_dir: download_dir.into(),
            untracked_dir: None,
            ebook_folder_format: default_ebook_folder(),
            ebook_file_format: default_ebook_file(),
            magazine_folder_format: default_magazine_folder(),
            magazine_file_format: default_magazine_file(),
            audio_folder_format: default_ebook_folder(),
            audio_file_format: default_ebook_file(),
            ebook_types: default_ebook_types(),
            magazine_types: default_magazine_types(),
            audio_types: default_audio_types(),
        }
    }

    pub fn with_untracked_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.untracked_dir = Some(dir.into());
        self
    }

    /// All naming templates, for validation.
    pub fn templates(&self) -> [(&'static str, &str); 6] {
        [
            ("ebook_folder_format", &self.ebook_folder_format),
            ("ebook_file_format", &self.ebook_file_format),
            ("magazine_folder_format", &self.magazine_folder_format),
            ("magazine_file_format", &self.magazine_file_format),
            ("audio_folder_format", &self.audio_folder_format),
            ("audio_file_format", &self.audio_file_format),
        ]
    }
}

/// Limits for one reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Files processed at once.
    pub max_parallel_reconciles: usize,
    /// Retryable failures tolerated before a file is given up on.
    pub max_process_retries: u32,
    /// Files picked up per pass.
    pub batch_size: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_parallel_reconciles: 4,
            max_process_retries: 3,
            batch_size: 100,
        }
    }
}
