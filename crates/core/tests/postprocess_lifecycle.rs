//! Post-process lifecycle integration tests.
//!
//! These tests run the reconciler with the real metadata extractor and file
//! placer against the SQLite store:
//! - Identify, organize and record a downloaded EPUB
//! - Unmatched files are left untouched
//! - Drop folder scanning
//! - Organized files re-identify as the same item

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use bookbag_core::{
    library::{LibraryStore, NewWantedItem, ReconcileState, SqliteLibraryStore},
    matcher::{match_metadata, MatcherConfig},
    notify::{create_notifier, NotificationKind, NotifierHandle},
    postprocess::{FileMetadataExtractor, LibraryConfig, Reconciler},
    testing::fixtures,
    WantedStatus,
};

struct TestHarness {
    reconciler: Reconciler,
    store: Arc<SqliteLibraryStore>,
    downloads: PathBuf,
    library: PathBuf,
    drop_dir: PathBuf,
    _temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_notifier(NotifierHandle::disabled())
    }

    fn with_notifier(notifier: NotifierHandle) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let downloads = temp_dir.path().join("downloads");
        let library = temp_dir.path().join("library");
        let drop_dir = temp_dir.path().join("drop");
        for dir in [&downloads, &library, &drop_dir] {
            std::fs::create_dir_all(dir).expect("Failed to create dir");
        }

        let store = Arc::new(
            SqliteLibraryStore::new(&temp_dir.path().join("bookbag.db"))
                .expect("Failed to create library store"),
        );
        let reconciler = Reconciler::new(
            store.clone(),
            Arc::new(FileMetadataExtractor::new()),
            LibraryConfig::new(&library, &downloads).with_untracked_dir(&drop_dir),
            notifier,
        );

        Self {
            reconciler,
            store,
            downloads,
            library,
            drop_dir,
            _temp_dir: temp_dir,
        }
    }

    fn add_book(&self, title: &str, author: &str) -> String {
        self.store
            .add_wanted(NewWantedItem::book(title, author))
            .expect("Failed to add wanted item")
            .id
    }

    fn queue(&self, path: &Path) -> i64 {
        self.store
            .enqueue_discovered(path.to_path_buf(), None)
            .unwrap()
            .expect("path already queued")
            .id
    }
}

#[tokio::test]
async fn test_downloaded_epub_is_organized_and_recorded() {
    let harness = TestHarness::new();
    let id = harness.add_book("The Gunslinger", "Stephen King");
    let source = harness.downloads.join("dt1-gunslinger.epub");
    fixtures::write_epub(&source, "The Gunslinger", "Stephen King", None);
    let file_id = harness.queue(&source);

    let summary = harness.reconciler.run_pending().await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.recorded, 1);

    let expected = harness
        .library
        .join("Stephen King")
        .join("The Gunslinger")
        .join("The Gunslinger - Stephen King.epub");
    assert!(expected.exists());
    assert!(!source.exists());

    let item = harness.store.get_wanted(&id).unwrap().unwrap();
    assert_eq!(item.status, WantedStatus::Processed);
    assert_eq!(item.file_path.as_deref(), Some(expected.as_path()));

    let file = harness.store.get_discovered(file_id).unwrap().unwrap();
    assert_eq!(file.state, ReconcileState::Recorded);
    assert_eq!(file.wanted_id.as_deref(), Some(id.as_str()));
    assert!(file.score.unwrap() >= 90);
}

#[tokio::test]
async fn test_organized_file_reidentifies_as_same_item() {
    let harness = TestHarness::new();
    let id = harness.add_book("Les Misérables", "Victor Hugo");
    let source = harness.downloads.join("book.epub");
    fixtures::write_epub(&source, "Les Misérables", "Victor Hugo", Some("978-0-451-41943-9"));
    harness.queue(&source);

    harness.reconciler.run_pending().await.unwrap();

    let item = harness.store.get_wanted(&id).unwrap().unwrap();
    let organized = item.file_path.clone().expect("item has no file");

    let reread = FileMetadataExtractor::extract_blocking(&organized);
    assert_eq!(reread.title.as_deref(), Some("Les Misérables"));
    assert_eq!(reread.author.as_deref(), Some("Victor Hugo"));
    assert_eq!(reread.isbn.as_deref(), Some("9780451419439"));

    let cfg = MatcherConfig::default();
    let score = match_metadata(&reread, &item, &cfg, cfg.confirm_threshold)
        .expect("organized file no longer matches its item");
    assert!(score.score >= cfg.confirm_threshold);
}

#[tokio::test]
async fn test_unmatched_file_is_left_untouched() {
    let (notifier, mut rx) = {
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        (NotifierHandle::new(tx), rx)
    };
    let harness = TestHarness::with_notifier(notifier);
    let id = harness.add_book("The Gunslinger", "Stephen King");
    let source = harness.downloads.join("mystery.epub");
    fixtures::write_epub(&source, "A Completely Different Book", "Someone Else", None);
    let before = std::fs::read(&source).unwrap();
    let file_id = harness.queue(&source);

    let summary = harness.reconciler.run_pending().await.unwrap();
    assert_eq!(summary.unidentified, 1);
    assert_eq!(summary.recorded, 0);

    assert_eq!(std::fs::read(&source).unwrap(), before);
    let file = harness.store.get_discovered(file_id).unwrap().unwrap();
    assert_eq!(file.state, ReconcileState::Unidentified);
    assert!(file.destination.is_none());

    let item = harness.store.get_wanted(&id).unwrap().unwrap();
    assert_eq!(item.status, WantedStatus::Wanted);
    assert!(item.file_path.is_none());

    let event = rx.recv().await.expect("no notification");
    assert_eq!(event.kind, NotificationKind::Unidentified);

    // Terminal files are not picked up again.
    let summary = harness.reconciler.run_pending().await.unwrap();
    assert_eq!(summary.processed, 0);
}

#[tokio::test]
async fn test_drop_folder_files_are_identified_by_filename() {
    let harness = TestHarness::new();
    let id = harness.add_book("Carrie", "Stephen King");
    let nested = harness.drop_dir.join("incoming");
    std::fs::create_dir_all(&nested).unwrap();
    // Not a valid EPUB: only the filename identifies it.
    std::fs::write(nested.join("Stephen King - Carrie (1974).epub"), b"not a zip").unwrap();
    std::fs::write(nested.join("cover.jpg"), b"jpg").unwrap();

    assert_eq!(harness.reconciler.scan_untracked().unwrap(), 1);
    // Already queued paths are not queued twice.
    assert_eq!(harness.reconciler.scan_untracked().unwrap(), 0);

    let summary = harness.reconciler.run_pending().await.unwrap();
    assert_eq!(summary.recorded, 1);

    let item = harness.store.get_wanted(&id).unwrap().unwrap();
    assert_eq!(item.status, WantedStatus::Processed);
    assert!(item
        .file_path
        .unwrap()
        .ends_with("Stephen King/Carrie/Carrie - Stephen King.epub"));
    assert!(nested.join("cover.jpg").exists());
}

#[tokio::test]
async fn test_closed_notifier_does_not_fail_reconcile() {
    let (notifier, worker) = create_notifier(Vec::new(), 8);
    drop(worker);
    let harness = TestHarness::with_notifier(notifier);
    harness.add_book("The Gunslinger", "Stephen King");
    let source = harness.downloads.join("Stephen King - The Gunslinger.epub");
    fixtures::write_epub(&source, "The Gunslinger", "Stephen King", None);
    harness.queue(&source);

    // A closed channel never fails the reconcile.
    let summary = harness.reconciler.run_pending().await.unwrap();
    assert_eq!(summary.recorded, 1);
}
