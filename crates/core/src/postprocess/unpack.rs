//! Extraction of zip archives found in completed downloads.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use super::detect::extension;

const UNPACKABLE_TYPES: &[&str] = &["zip"];

#[derive(Debug, Error)]
pub enum UnpackError {
    #[error("Failed to read archive {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("Failed to extract {entry} from {path}")]
    ExtractFailed {
        path: PathBuf,
        entry: String,
        #[source]
        source: io::Error,
    },
}

/// Whether `path` is an archive this module can extract.
pub fn can_unpack(path: &Path) -> bool {
    extension(path).is_some_and(|ext| UNPACKABLE_TYPES.contains(&ext.as_str()))
}

/// `dir/name.zip` extracts into `dir/name/`.
pub fn unpack_dir(archive: &Path) -> PathBuf {
    match archive.file_stem() {
        Some(stem) => archive.with_file_name(stem),
        None => archive.with_extension("unpacked"),
    }
}

/// Extract every file of a zip archive into [`unpack_dir`].
///
/// Entries that would land outside that directory are skipped. Files that
/// already exist are left as they are and still reported, so unpacking the
/// same archive twice yields the same list.
pub fn unpack_zip(archive: &Path) -> Result<Vec<PathBuf>, UnpackError> {
    let unreadable = |reason: String| UnpackError::Unreadable {
        path: archive.to_path_buf(),
        reason,
    };
    let file = File::open(archive).map_err(|e| unreadable(e.to_string()))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| unreadable(e.to_string()))?;
    let dest = unpack_dir(archive);
    let mut extracted = Vec::new();

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| unreadable(e.to_string()))?;
        let name = entry.name().to_string();
        if entry.is_dir() {
            continue;
        }
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            warn!(archive = %archive.display(), entry = %name, "Skipping archive entry outside the archive root");
            continue;
        };

        let target = dest.join(relative);
        let failed = |source: io::Error| UnpackError::ExtractFailed {
            path: archive.to_path_buf(),
            entry: name.clone(),
            source,
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(failed)?;
        }

        match OpenOptions::new().write(true).create_new(true).open(&target) {
            Ok(mut out) => {
                if let Err(e) = io::copy(&mut entry, &mut out) {
                    let _ = fs::remove_file(&target);
                    return Err(failed(e));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(path = %target.display(), "Archive entry already extracted");
            }
            Err(e) => return Err(failed(e)),
        }
        extracted.push(target);
    }

    debug!(archive = %archive.display(), files = extracted.len(), "Unpacked archive");
    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use tempfile::TempDir;

    #[test]
    fn test_can_unpack() {
        assert!(can_unpack(Path::new("/d/Dune.zip")));
        assert!(can_unpack(Path::new("/d/Dune.ZIP")));
        assert!(!can_unpack(Path::new("/d/Dune.rar")));
        assert!(!can_unpack(Path::new("/d/Wired.cbz")));
        assert!(!can_unpack(Path::new("/d/README")));
    }

    #[test]
    fn test_unpack_next_to_archive() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("Dune [retail].zip");
        fixtures::write_zip(
            &archive,
            &[
                ("Dune.epub", "epub"),
                ("extras/cover.jpg", "jpg"),
                ("../escaped.epub", "nope"),
            ],
        );

        let mut files = unpack_zip(&archive).unwrap();
        files.sort();

        let root = dir.path().join("Dune [retail]");
        assert_eq!(files, vec![root.join("Dune.epub"), root.join("extras/cover.jpg")]);
        assert_eq!(std::fs::read(root.join("Dune.epub")).unwrap(), b"epub");
        assert!(!dir.path().join("escaped.epub").exists());

        // A second run keeps what is there.
        std::fs::write(root.join("Dune.epub"), b"edited").unwrap();
        let mut again = unpack_zip(&archive).unwrap();
        again.sort();
        assert_eq!(again, files);
        assert_eq!(std::fs::read(root.join("Dune.epub")).unwrap(), b"edited");
    }

    #[test]
    fn test_corrupt_archive() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("broken.zip");
        std::fs::write(&archive, b"not a zip").unwrap();

        let err = unpack_zip(&archive).unwrap_err();
        assert!(matches!(err, UnpackError::Unreadable { .. }));
    }
}
