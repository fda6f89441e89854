//! Moves identified files into the library.
//!
//! Placement never overwrites: an identical file already at the destination
//! counts as placed, a different one makes the new file take a " (n)"
//! suffix. A destination is only ever claimed by creating it, a hard link
//! on one filesystem or an exclusive create for copies, so a file that
//! appears concurrently is never replaced. Copies are synced and re-read
//! before the source is deleted.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, warn};

/// The `[placer]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacerConfig {
    /// Buffer size for file copies in bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Hard link when source and destination share a filesystem.
    #[serde(default = "default_true")]
    pub prefer_atomic_moves: bool,

    /// Re-read the copy and compare checksums before deleting the source.
    #[serde(default = "default_true")]
    pub verify_checksums: bool,

    #[serde(default)]
    pub checksum_type: ChecksumType,
}

/// Hash used for copy verification and duplicate detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumType {
    #[default]
    Sha256,
    Md5,
}

enum Hasher {
    Sha256(Sha256),
    Md5(md5::Context),
}

impl Hasher {
    fn new(kind: ChecksumType) -> Self {
        match kind {
            ChecksumType::Sha256 => Hasher::Sha256(Sha256::new()),
            ChecksumType::Md5 => Hasher::Md5(md5::Context::new()),
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        match self {
            Hasher::Sha256(h) => h.update(bytes),
            Hasher::Md5(c) => c.consume(bytes),
        }
    }

    fn finish(self) -> String {
        match self {
            Hasher::Sha256(h) => format!("{:x}", h.finalize()),
            Hasher::Md5(c) => format!("{:x}", c.compute()),
        }
    }
}

fn default_buffer_size() -> usize {
    1024 * 1024
}

fn default_true() -> bool {
    true
}

impl Default for PlacerConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            prefer_atomic_moves: true,
            verify_checksums: true,
            checksum_type: ChecksumType::Sha256,
        }
    }
}

#[derive(Debug, Error)]
pub enum PlacerError {
    #[error("Source file not found: {path}")]
    SourceNotFound { path: PathBuf },

    #[error("Failed to create directory: {path}")]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to copy file from {source} to {destination}")]
    CopyFailed {
        source: PathBuf,
        destination: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Failed to calculate checksum for {path}")]
    ChecksumCalculationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No free destination name for {path}")]
    NoFreeName { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlacerError {
    fn copy_failed(source: &Path, destination: &Path, error: std::io::Error) -> Self {
        Self::CopyFailed {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            error,
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::SourceNotFound { .. } | Self::NoFreeName { .. })
    }
}

/// Where a file ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub destination: PathBuf,
    pub size_bytes: u64,
    /// An identical file was already there; the source was discarded.
    pub already_present: bool,
}

const MAX_SUFFIX: u32 = 999;

pub struct FilePlacer {
    config: PlacerConfig,
}

impl FilePlacer {
    pub fn new(config: PlacerConfig) -> Self {
        Self { config }
    }

    /// Move `source` to `destination` or the first free " (n)" variant.
    pub async fn place(&self, source: &Path, destination: &Path) -> Result<Placement, PlacerError> {
        if !fs::try_exists(source).await.unwrap_or(false) {
            return Err(PlacerError::SourceNotFound {
                path: source.to_path_buf(),
            });
        }
        if source == destination {
            let meta = fs::metadata(source).await?;
            return Ok(Placement {
                destination: destination.to_path_buf(),
                size_bytes: meta.len(),
                already_present: true,
            });
        }

        let source_size = fs::metadata(source).await?.len();
        let created = self.ensure_parent_dirs(destination).await?;
        let mut candidate = destination.to_path_buf();
        let mut n = 0;

        loop {
            if fs::try_exists(&candidate).await? {
                if self.same_content(source, source_size, &candidate).await? {
                    debug!(
                        source = %source.display(),
                        destination = %candidate.display(),
                        "Identical file already in library"
                    );
                    fs::remove_file(source).await?;
                    return Ok(Placement {
                        destination: candidate,
                        size_bytes: source_size,
                        already_present: true,
                    });
                }
            } else {
                match self.move_file(source, &candidate).await {
                    Ok(Some(size_bytes)) => {
                        return Ok(Placement {
                            destination: candidate,
                            size_bytes,
                            already_present: false,
                        })
                    }
                    // Someone else created it first; look at what they wrote.
                    Ok(None) => {
                        debug!(destination = %candidate.display(), "Destination taken concurrently");
                        continue;
                    }
                    Err(e) => {
                        for dir in created.iter().rev() {
                            let _ = fs::remove_dir(dir).await;
                        }
                        return Err(e);
                    }
                }
            }

            n += 1;
            if n > MAX_SUFFIX {
                return Err(PlacerError::NoFreeName {
                    path: destination.to_path_buf(),
                });
            }
            candidate = numbered(destination, n);
        }
    }

    async fn same_content(
        &self,
        source: &Path,
        source_size: u64,
        existing: &Path,
    ) -> Result<bool, PlacerError> {
        let existing_size = match fs::metadata(existing).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Ok(false),
        };
        if existing_size != source_size {
            return Ok(false);
        }
        Ok(self.checksum(source).await? == self.checksum(existing).await?)
    }

    /// Move `source` to `destination`, which must not exist yet.
    ///
    /// Returns `None` and leaves `source` alone when `destination` was
    /// created by someone else in the meantime.
    async fn move_file(&self, source: &Path, destination: &Path) -> Result<Option<u64>, PlacerError> {
        if self.config.prefer_atomic_moves {
            match fs::hard_link(source, destination).await {
                Ok(()) => {
                    if let Err(e) = fs::remove_file(source).await {
                        warn!(source = %source.display(), error = %e, "Linked file but could not remove source");
                    }
                    return Ok(Some(fs::metadata(destination).await?.len()));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(None),
                Err(e) => {
                    debug!(source = %source.display(), error = %e, "Hard link unavailable, copying");
                }
            }
        }

        let Some((size, source_checksum)) = self.copy_file(source, destination).await? else {
            return Ok(None);
        };
        if self.config.verify_checksums {
            self.verify_copy(destination, &source_checksum).await?;
        }

        if let Err(e) = fs::remove_file(source).await {
            warn!(source = %source.display(), error = %e, "Copied file but could not remove source");
        }
        Ok(Some(size))
    }

    /// Copy into a newly created `destination`, hashing the source bytes.
    ///
    /// Returns the size and the source checksum, or `None` when
    /// `destination` already exists. A failed copy removes its partial file.
    async fn copy_file(
        &self,
        source: &Path,
        destination: &Path,
    ) -> Result<Option<(u64, String)>, PlacerError> {
        let source_file = File::open(source).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PlacerError::SourceNotFound {
                    path: source.to_path_buf(),
                }
            } else {
                PlacerError::Io(e)
            }
        })?;
        let dest_file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(destination)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(PlacerError::copy_failed(source, destination, e)),
        };

        match self.write_copy(source_file, dest_file).await {
            Ok(copied) => Ok(Some(copied)),
            Err(e) => {
                let _ = fs::remove_file(destination).await;
                Err(PlacerError::copy_failed(source, destination, e))
            }
        }
    }

    async fn write_copy(&self, source: File, destination: File) -> std::io::Result<(u64, String)> {
        let mut reader = BufReader::with_capacity(self.config.buffer_size, source);
        let mut writer = BufWriter::with_capacity(self.config.buffer_size, destination);
        let mut hasher = Hasher::new(self.config.checksum_type);
        let mut buffer = vec![0u8; self.config.buffer_size.max(4096)];
        let mut total = 0u64;

        loop {
            let read = reader.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            writer.write_all(&buffer[..read]).await?;
            total += read as u64;
        }
        writer.flush().await?;
        writer.into_inner().sync_all().await?;

        Ok((total, hasher.finish()))
    }

    /// Compare what landed on disk with the source checksum. A mismatching
    /// copy is removed.
    async fn verify_copy(&self, destination: &Path, expected: &str) -> Result<(), PlacerError> {
        let actual = self.checksum(destination).await?;
        if actual != expected {
            let _ = fs::remove_file(destination).await;
            return Err(PlacerError::ChecksumMismatch {
                path: destination.to_path_buf(),
                expected: expected.to_string(),
                actual,
            });
        }
        Ok(())
    }

    pub async fn checksum(&self, path: &Path) -> Result<String, PlacerError> {
        let checksum_error = |e: std::io::Error| PlacerError::ChecksumCalculationFailed {
            path: path.to_path_buf(),
            source: e,
        };
        let file = File::open(path).await.map_err(checksum_error)?;
        let mut reader = BufReader::with_capacity(self.config.buffer_size, file);
        let mut buffer = vec![0u8; self.config.buffer_size.max(4096)];
        let mut hasher = Hasher::new(self.config.checksum_type);

        loop {
            let read = reader.read(&mut buffer).await.map_err(checksum_error)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(hasher.finish())
    }

    /// Create missing parents. Returns the directories created, outermost first.
    async fn ensure_parent_dirs(&self, path: &Path) -> Result<Vec<PathBuf>, PlacerError> {
        let Some(parent) = path.parent() else {
            return Ok(Vec::new());
        };

        let mut missing = Vec::new();
        let mut current = Some(parent);
        while let Some(dir) = current {
            if fs::try_exists(dir).await.unwrap_or(false) {
                break;
            }
            missing.push(dir.to_path_buf());
            current = dir.parent();
        }

        if !missing.is_empty() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PlacerError::DirectoryCreationFailed {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        missing.reverse();
        Ok(missing)
    }
}

/// `dir/name (n).ext`
fn numbered(path: &Path, n: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{} ({}).{}", stem, n, ext.to_string_lossy()),
        None => format!("{} ({})", stem, n),
    };
    path.with_file_name(name)
}
