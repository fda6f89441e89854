//! Reconciliation of downloaded files with wanted items.
//!
//! Each discovered file moves `Discovered → Identified → Organized →
//! Recorded`, or ends `Unidentified`. Every transition is persisted before
//! the next step runs so an interrupted pass resumes where it stopped.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::library::{
    DiscoveredFile, ItemKind, LibraryStore, RecordProof, ReconcileState, SnatchRecord,
    WantedFilter, WantedItem, WantedStatus,
};
use crate::matcher::{best_match, match_metadata, MatcherConfig};
use crate::metrics;
use crate::notify::{NotificationEvent, NotificationKind, NotifierHandle};

use super::config::{LibraryConfig, ReconcilerConfig};
use super::detect::{detect, extension, FileKind};
use super::extract::MetadataExtractor;
use super::placer::{FilePlacer, PlacerConfig};
use super::template::{render_path, TemplateValues};
use super::types::{ProcessError, ReconcileError, ReconcileSummary};
use super::unpack::{can_unpack, unpack_zip};

pub struct Reconciler {
    store: Arc<dyn LibraryStore>,
    extractor: Arc<dyn MetadataExtractor>,
    placer: FilePlacer,
    library: LibraryConfig,
    matcher: MatcherConfig,
    config: ReconcilerConfig,
    notifier: NotifierHandle,
    /// Files currently being processed by some pass.
    in_flight: Mutex<HashSet<i64>>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn LibraryStore>,
        extractor: Arc<dyn MetadataExtractor>,
        library: LibraryConfig,
        notifier: NotifierHandle,
    ) -> Self {
        Self {
            store,
            extractor,
            placer: FilePlacer::new(PlacerConfig::default()),
            library,
            matcher: MatcherConfig::default(),
            config: ReconcilerConfig::default(),
            notifier,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_matcher(mut self, matcher: MatcherConfig) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_placer(mut self, config: PlacerConfig) -> Self {
        self.placer = FilePlacer::new(config);
        self
    }

    pub fn library(&self) -> &LibraryConfig {
        &self.library
    }

    /// Queue the book files of a completed download.
    ///
    /// Zip archives are unpacked next to themselves and their contents
    /// take their place. Returns how many book files were found; files
    /// queued by an earlier call are counted but not queued again.
    pub async fn enqueue_download(
        &self,
        record: &SnatchRecord,
        files: &[PathBuf],
    ) -> Result<usize, ReconcileError> {
        let mut candidates = Vec::with_capacity(files.len());
        for path in files {
            if detect(path, &self.library) == FileKind::Archive && can_unpack(path) {
                candidates.extend(self.unpack(path).await);
            } else {
                candidates.push(path.clone());
            }
        }

        let mut books = 0;
        for path in &candidates {
            if !detect(path, &self.library).is_processable() {
                debug!(path = %path.display(), "Skipping non-book file");
                continue;
            }
            books += 1;
            if let Some(file) = self
                .store
                .enqueue_discovered(path.clone(), Some(&record.id))?
            {
                debug!(discovered_id = file.id, snatch_id = %record.id, path = %path.display(), "Queued downloaded file");
            }
        }
        Ok(books)
    }

    /// Files extracted from an archive; none when it cannot be read.
    async fn unpack(&self, archive: &Path) -> Vec<PathBuf> {
        let owned = archive.to_path_buf();
        match tokio::task::spawn_blocking(move || unpack_zip(&owned)).await {
            Ok(Ok(files)) => {
                info!(archive = %archive.display(), files = files.len(), "Unpacked downloaded archive");
                files
            }
            Ok(Err(e)) => {
                warn!(archive = %archive.display(), error = %e, "Could not unpack archive");
                Vec::new()
            }
            Err(e) => {
                warn!(archive = %archive.display(), error = %e, "Unpack task failed");
                Vec::new()
            }
        }
    }

    /// Queue new book files found in the drop folder. Returns the number
    /// of newly queued files.
    pub fn scan_untracked(&self) -> Result<usize, ReconcileError> {
        let Some(dir) = self.library.untracked_dir.as_deref() else {
            return Ok(0);
        };
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "Untracked directory does not exist");
            return Ok(0);
        }

        let mut queued = 0;
        for entry in WalkDir::new(dir).follow_links(false) {
            let entry = entry.map_err(|e| ReconcileError::Scan {
                path: dir.display().to_string(),
                reason: e.to_string(),
            })?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.starts_with(&self.library.root)
                || !detect(path, &self.library).is_processable()
            {
                continue;
            }
            if self.store.enqueue_discovered(path.to_path_buf(), None)?.is_some() {
                queued += 1;
            }
        }

        if queued > 0 {
            info!(dir = %dir.display(), queued = queued, "Queued untracked files");
        }
        Ok(queued)
    }

    /// Process every pending file, a bounded number at a time.
    pub async fn run_pending(&self) -> Result<ReconcileSummary, ReconcileError> {
        let pending = self.store.pending_discovered(self.config.batch_size)?;
        let mut summary = ReconcileSummary::default();
        if pending.is_empty() {
            return Ok(summary);
        }

        let passes: Vec<_> = pending
            .into_iter()
            .map(|file| self.process_claimed(file))
            .collect();
        let outcomes: Vec<_> = stream::iter(passes)
            .buffer_unordered(self.config.max_parallel_reconciles.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                None => {}
                Some(Ok(state)) => {
                    summary.processed += 1;
                    match state {
                        ReconcileState::Recorded => summary.recorded += 1,
                        ReconcileState::Unidentified => summary.unidentified += 1,
                        _ => summary.deferred += 1,
                    }
                }
                Some(Err(e)) => {
                    summary.processed += 1;
                    summary.deferred += 1;
                    warn!(error = %e, "Reconcile failed, file stays pending");
                }
            }
        }

        info!(
            processed = summary.processed,
            recorded = summary.recorded,
            unidentified = summary.unidentified,
            deferred = summary.deferred,
            "Post-process pass complete"
        );
        Ok(summary)
    }

    /// Skip files another pass is already working on or has moved on.
    ///
    /// `snapshot` is the row as listed at the start of the pass; once the
    /// file is claimed it is read again so a pass that finished in between
    /// is never undone.
    async fn process_claimed(
        &self,
        snapshot: DiscoveredFile,
    ) -> Option<Result<ReconcileState, ReconcileError>> {
        let id = snapshot.id;
        if !self.claim(id) {
            debug!(discovered_id = id, "File already being processed");
            return None;
        }
        let result = match self.store.get_discovered(id) {
            Ok(Some(file)) if file.state.is_terminal() || file.state != snapshot.state => {
                debug!(
                    discovered_id = id,
                    listed = %snapshot.state,
                    current = %file.state,
                    "File changed since it was listed"
                );
                None
            }
            Ok(Some(file)) => Some(self.process(file).await),
            Ok(None) => None,
            Err(e) => Some(Err(e.into())),
        };
        self.release(id);
        result
    }

    fn claim(&self, id: i64) -> bool {
        match self.in_flight.lock() {
            Ok(mut set) => set.insert(id),
            Err(poisoned) => poisoned.into_inner().insert(id),
        }
    }

    fn release(&self, id: i64) {
        match self.in_flight.lock() {
            Ok(mut set) => set.remove(&id),
            Err(poisoned) => poisoned.into_inner().remove(&id),
        };
    }

    /// Run a file through its remaining transitions.
    ///
    /// Returns the state the file was left in. Errors only when its progress
    /// could not be persisted.
    pub async fn process(&self, mut file: DiscoveredFile) -> Result<ReconcileState, ReconcileError> {
        loop {
            let step = match file.state {
                ReconcileState::Discovered => self.identify(&mut file).await,
                ReconcileState::Identified => self.organize(&mut file).await,
                ReconcileState::Organized => self.record(&mut file).await,
                ReconcileState::Recorded | ReconcileState::Unidentified => {
                    return Ok(file.state)
                }
            };

            match step {
                Ok(()) => {
                    metrics::RECONCILE_TRANSITIONS
                        .with_label_values(&[file.state.as_str()])
                        .inc();
                    // Recorded is written by the store together with the item.
                    if file.state != ReconcileState::Recorded {
                        self.store.save_discovered(&file)?;
                    }
                }
                Err(ProcessError::Retryable(reason)) => {
                    file.retry_count += 1;
                    file.last_error = Some(reason.clone());
                    if file.retry_count >= self.config.max_process_retries {
                        return self.give_up(file, reason);
                    }
                    warn!(
                        discovered_id = file.id,
                        path = %file.path.display(),
                        state = %file.state,
                        retry = file.retry_count,
                        error = %reason,
                        "Post-process step failed, will retry"
                    );
                    self.store.save_discovered(&file)?;
                    return Ok(file.state);
                }
                Err(ProcessError::Unidentified(reason)) => return self.give_up(file, reason),
                Err(ProcessError::Rejected(reason)) => {
                    error!(
                        discovered_id = file.id,
                        path = %file.path.display(),
                        wanted_id = file.wanted_id.as_deref().unwrap_or("-"),
                        reason = %reason,
                        "Library write rejected, aborting"
                    );
                    return self.give_up(file, reason);
                }
            }
        }
    }

    async fn identify(&self, file: &mut DiscoveredFile) -> Result<(), ProcessError> {
        let kind = detect(&file.path, &self.library);
        if !kind.is_processable() {
            return Err(ProcessError::Unidentified(format!(
                "{:?} files are not filed into the library",
                kind
            )));
        }
        if !file.path.is_file() {
            return Err(ProcessError::Unidentified(format!(
                "file no longer exists: {}",
                file.path.display()
            )));
        }

        let meta = self.extractor.extract(&file.path).await;
        let threshold = self.matcher.confirm_threshold;

        let matched = match self.originating_item(file)? {
            Some(item) => match_metadata(&meta, &item, &self.matcher, threshold)
                .map(|score| (item.id.clone(), score)),
            None => {
                let wanted = self.store.list_wanted(
                    &WantedFilter::new()
                        .with_status(WantedStatus::Wanted)
                        .with_limit(-1),
                )?;
                best_match(&meta, &wanted, &self.matcher, threshold)
                    .map(|(item, score)| (item.id.clone(), score))
            }
        };

        let Some((wanted_id, score)) = matched else {
            return Err(ProcessError::Unidentified(format!(
                "no wanted item matches (title: {}, author: {})",
                meta.title.as_deref().unwrap_or("?"),
                meta.author.as_deref().unwrap_or("?")
            )));
        };

        info!(
            discovered_id = file.id,
            path = %file.path.display(),
            wanted_id = %wanted_id,
            score = score.score,
            fields = ?score.fields,
            "Identified file"
        );
        file.wanted_id = Some(wanted_id);
        file.score = Some(score.score);
        file.state = ReconcileState::Identified;
        Ok(())
    }

    /// The wanted item behind the file's snatch, if it is still open.
    fn originating_item(&self, file: &DiscoveredFile) -> Result<Option<WantedItem>, ProcessError> {
        let Some(snatch_id) = file.snatch_id.as_deref() else {
            return Ok(None);
        };
        let Some(record) = self.store.get_snatch(snatch_id)? else {
            return Ok(None);
        };
        Ok(self
            .store
            .get_wanted(&record.wanted_id)?
            .filter(|item| matches!(item.status, WantedStatus::Wanted | WantedStatus::Snatched)))
    }

    async fn organize(&self, file: &mut DiscoveredFile) -> Result<(), ProcessError> {
        let wanted_id = file
            .wanted_id
            .clone()
            .ok_or_else(|| ProcessError::Rejected("identified file has no wanted item".into()))?;
        let item = self.store.get_wanted(&wanted_id)?.ok_or_else(|| {
            ProcessError::Unidentified(format!("wanted item {} no longer exists", wanted_id))
        })?;

        let destination = self.destination_for(&item, &file.path);

        // A previous pass moved the file but did not get to persist it.
        if !file.path.exists() && destination.is_file() {
            debug!(discovered_id = file.id, destination = %destination.display(), "File already organized");
            file.destination = Some(destination);
            file.state = ReconcileState::Organized;
            return Ok(());
        }

        let placement = self.placer.place(&file.path, &destination).await?;
        info!(
            discovered_id = file.id,
            wanted_id = %wanted_id,
            destination = %placement.destination.display(),
            already_present = placement.already_present,
            "Organized file"
        );
        file.destination = Some(placement.destination);
        file.state = ReconcileState::Organized;
        Ok(())
    }

    /// Library path for a file identified as `item`.
    pub fn destination_for(&self, item: &WantedItem, source: &Path) -> PathBuf {
        let (folder, name) = match (item.kind, detect(source, &self.library)) {
            (ItemKind::Magazine, _) => (
                &self.library.magazine_folder_format,
                &self.library.magazine_file_format,
            ),
            (ItemKind::Book, FileKind::Audio) => (
                &self.library.audio_folder_format,
                &self.library.audio_file_format,
            ),
            (ItemKind::Book, _) => (
                &self.library.ebook_folder_format,
                &self.library.ebook_file_format,
            ),
        };
        let ext = extension(source).unwrap_or_default();
        self.library
            .root
            .join(render_path(folder, name, &TemplateValues::from_wanted(item), &ext))
    }

    async fn record(&self, file: &mut DiscoveredFile) -> Result<(), ProcessError> {
        let (Some(wanted_id), Some(destination), Some(score)) =
            (file.wanted_id.clone(), file.destination.clone(), file.score)
        else {
            return Err(ProcessError::Rejected(
                "organized file is missing its match or destination".into(),
            ));
        };

        let proof = RecordProof {
            discovered_id: file.id,
            wanted_id,
            file_path: destination.clone(),
            score,
            confirm_threshold: self.matcher.confirm_threshold,
        };
        let item = self.store.record_processed(&proof)?;

        file.state = ReconcileState::Recorded;
        info!(
            discovered_id = file.id,
            wanted_id = %item.id,
            title = %item.title,
            path = %destination.display(),
            "Recorded wanted item as processed"
        );
        self.notifier.try_emit(
            NotificationEvent::new(NotificationKind::Recorded, destination.display().to_string())
                .with_wanted(Some(item.summary())),
        );
        Ok(())
    }

    fn give_up(
        &self,
        mut file: DiscoveredFile,
        reason: String,
    ) -> Result<ReconcileState, ReconcileError> {
        file.state = ReconcileState::Unidentified;
        file.last_error = Some(reason.clone());
        self.store.save_discovered(&file)?;

        metrics::RECONCILE_TRANSITIONS
            .with_label_values(&[ReconcileState::Unidentified.as_str()])
            .inc();
        warn!(
            discovered_id = file.id,
            path = %file.path.display(),
            reason = %reason,
            "File left unidentified"
        );

        let wanted = file
            .wanted_id
            .as_deref()
            .and_then(|id| self.store.get_wanted(id).ok().flatten())
            .map(|item| item.summary());
        self.notifier.try_emit(
            NotificationEvent::new(
                NotificationKind::Unidentified,
                format!("{}: {}", file.path.display(), reason),
            )
            .with_wanted(wanted),
        );
        Ok(ReconcileState::Unidentified)
    }
}
