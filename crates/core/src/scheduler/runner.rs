//! Scheduler implementation.
//!
//! Three independent loops drive items through their lifecycle:
//! - Search: every Wanted item is searched and at most one result snatched
//! - Download monitor: pending dispatches are retried and downloads polled
//! - Post-process: the drop folder is scanned and queued files reconciled
//!
//! The loops never talk to each other; every hand-off goes through the
//! library store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::dispatch::{DispatchError, Dispatcher, DownloadStatus};
use crate::library::{
    LibraryStore, SnatchOutcome, SnatchRecord, WantedFilter, WantedItem, WantedStatus,
};
use crate::matcher::MatcherConfig;
use crate::metrics;
use crate::postprocess::{ReconcileSummary, Reconciler};
use crate::provider::ProviderPipeline;
use crate::snatch::{decide, SnatchConfig, SnatchEngine, SnatchPolicy};

use super::config::SchedulerConfig;
use super::types::{
    ItemSearchResult, MonitorSummary, SchedulerError, SchedulerStatus, SearchCycleSummary,
};

#[derive(Debug, Default)]
struct LastRuns {
    search: Option<DateTime<Utc>>,
    monitor: Option<DateTime<Utc>>,
    postprocess: Option<DateTime<Utc>>,
}

/// What the monitor did with one open snatch.
enum MonitorStep {
    Dispatched,
    Waiting,
    Completed,
    Failed,
    Deferred,
}

/// Everything a cycle needs, shared with the spawned loops.
struct SchedulerCore {
    store: Arc<dyn LibraryStore>,
    pipeline: ProviderPipeline,
    engine: SnatchEngine,
    dispatcher: Dispatcher,
    reconciler: Reconciler,
    snatch: SnatchConfig,
    matcher: MatcherConfig,
    max_concurrent_searches: usize,
    last_runs: RwLock<LastRuns>,
}

/// Runs the search, download monitor and post-process cycles.
pub struct Scheduler {
    config: SchedulerConfig,
    core: Arc<SchedulerCore>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn LibraryStore>,
        pipeline: ProviderPipeline,
        dispatcher: Dispatcher,
        reconciler: Reconciler,
        snatch: SnatchConfig,
        matcher: MatcherConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let core = SchedulerCore {
            engine: SnatchEngine::new(Arc::clone(&store)),
            store,
            pipeline,
            dispatcher,
            reconciler,
            snatch,
            matcher,
            max_concurrent_searches: config.max_concurrent_searches.max(1),
            last_runs: RwLock::new(LastRuns::default()),
        };

        Self {
            config,
            core: Arc::new(core),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Start the periodic loops.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return;
        }

        info!(
            search_interval_ms = self.config.search_interval_ms,
            monitor_interval_ms = self.config.monitor_interval_ms,
            postprocess_interval_ms = self.config.postprocess_interval_ms,
            "Starting scheduler"
        );

        self.spawn_search_loop();
        self.spawn_monitor_loop();
        self.spawn_postprocess_loop();
    }

    /// Signal every loop to stop after its current cycle.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Scheduler not running");
            return;
        }

        info!("Stopping scheduler");
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Item counts and last cycle times.
    pub async fn status(&self) -> Result<SchedulerStatus, SchedulerError> {
        let store = &self.core.store;
        let count = |status: WantedStatus| store.count_wanted(&WantedFilter::new().with_status(status));
        let last_runs = self.core.last_runs.read().await;

        Ok(SchedulerStatus {
            running: self.is_running(),
            wanted_count: count(WantedStatus::Wanted)?,
            snatched_count: count(WantedStatus::Snatched)?,
            processed_count: count(WantedStatus::Processed)?,
            failed_count: count(WantedStatus::Failed)?,
            pending_files: store.pending_discovered(-1)?.len(),
            last_search_at: last_runs.search,
            last_monitor_at: last_runs.monitor,
            last_postprocess_at: last_runs.postprocess,
        })
    }

    /// Search every Wanted item once.
    pub async fn search_cycle(&self) -> Result<SearchCycleSummary, SchedulerError> {
        self.core.search_cycle().await
    }

    /// Search one item now, with a fresh token.
    ///
    /// A scheduled cycle that overlaps this one can no longer snatch the
    /// item with its older token.
    pub async fn force_search(&self, wanted_id: &str) -> Result<ItemSearchResult, SchedulerError> {
        let item = self
            .core
            .store
            .get_wanted(wanted_id)?
            .ok_or_else(|| SchedulerError::WantedNotFound(wanted_id.to_string()))?;

        if item.status != WantedStatus::Wanted {
            return Err(SchedulerError::InvalidState {
                expected: WantedStatus::Wanted,
                actual: item.status,
            });
        }

        info!(wanted_id = %item.id, title = %item.title, "Forced search");
        let policy = SnatchPolicy::from_config(&self.core.snatch, &self.core.matcher);
        self.core.search_item(&item, &policy).await
    }

    /// Retry pending dispatches and poll every dispatched download once.
    pub async fn monitor_cycle(&self) -> Result<MonitorSummary, SchedulerError> {
        self.core.monitor_cycle().await
    }

    /// Run one post-process pass now.
    pub async fn force_postprocess(&self) -> Result<ReconcileSummary, SchedulerError> {
        info!("Forced post-process");
        self.core.postprocess_cycle().await
    }

    fn spawn_search_loop(&self) {
        let core = Arc::clone(&self.core);
        let running = Arc::clone(&self.running);
        let interval = Duration::from_millis(self.config.search_interval_ms);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Search loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Search loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        if let Err(e) = core.search_cycle().await {
                            warn!(error = %e, "Search cycle failed");
                        }
                    }
                }
            }
            info!("Search loop stopped");
        });
    }

    fn spawn_monitor_loop(&self) {
        let core = Arc::clone(&self.core);
        let running = Arc::clone(&self.running);
        let interval = Duration::from_millis(self.config.monitor_interval_ms);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Download monitor started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Download monitor received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        if let Err(e) = core.monitor_cycle().await {
                            warn!(error = %e, "Download monitor cycle failed");
                        }
                    }
                }
            }
            info!("Download monitor stopped");
        });
    }

    fn spawn_postprocess_loop(&self) {
        let core = Arc::clone(&self.core);
        let running = Arc::clone(&self.running);
        let interval = Duration::from_millis(self.config.postprocess_interval_ms);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Post-process loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Post-process loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        if let Err(e) = core.postprocess_cycle().await {
                            warn!(error = %e, "Post-process cycle failed");
                        }
                    }
                }
            }
            info!("Post-process loop stopped");
        });
    }
}

impl SchedulerCore {
    async fn search_cycle(&self) -> Result<SearchCycleSummary, SchedulerError> {
        let items = self.store.list_wanted(
            &WantedFilter::new()
                .with_status(WantedStatus::Wanted)
                .with_limit(-1),
        )?;
        // One policy snapshot for the whole cycle.
        let policy = SnatchPolicy::from_config(&self.snatch, &self.matcher);

        debug!(items = items.len(), "Starting search cycle");

        let mut searches = Vec::with_capacity(items.len());
        for item in items {
            let policy = policy.clone();
            searches.push(async move {
                let outcome = self.search_item(&item, &policy).await;
                (item, outcome)
            });
        }

        let outcomes: Vec<_> = stream::iter(searches)
            .buffer_unordered(self.max_concurrent_searches.max(1))
            .collect()
            .await;

        let mut summary = SearchCycleSummary {
            searched: outcomes.len(),
            ..Default::default()
        };
        for (item, outcome) in outcomes {
            match outcome {
                Ok(ItemSearchResult::Snatched { .. }) => summary.snatched += 1,
                Ok(ItemSearchResult::NoMatch { .. }) => summary.no_match += 1,
                Ok(ItemSearchResult::Skipped) => summary.skipped += 1,
                Err(e) => {
                    summary.errors += 1;
                    warn!(wanted_id = %item.id, error = %e, "Search failed");
                }
            }
        }

        self.last_runs.write().await.search = Some(Utc::now());
        info!(
            searched = summary.searched,
            snatched = summary.snatched,
            no_match = summary.no_match,
            errors = summary.errors,
            "Search cycle complete"
        );
        Ok(summary)
    }

    async fn search_item(
        &self,
        item: &WantedItem,
        policy: &SnatchPolicy,
    ) -> Result<ItemSearchResult, SchedulerError> {
        let token = self.store.issue_search_token(&item.id)?;
        let policy = policy
            .clone()
            .with_excluded_locators(self.store.failed_locators(&item.id)?);

        let outcome = self.pipeline.search(item, &policy, &self.matcher).await;
        let found = outcome.results.len();

        let Some(chosen) = decide(outcome.results, item, &policy, &self.matcher) else {
            metrics::SNATCH_DECISIONS.with_label_values(&["no_match"]).inc();
            if !self.store.complete_search(&item.id, token)? {
                debug!(wanted_id = %item.id, token = token.0, "Newer search already completed");
            }
            return Ok(ItemSearchResult::NoMatch { results: found });
        };

        let client = self.dispatcher.client_name_for(chosen.media_kind).to_string();
        let record = match self.engine.snatch(item, token, &chosen, &client)? {
            SnatchOutcome::Snatched(record) => record,
            SnatchOutcome::AlreadySnatched | SnatchOutcome::Superseded => {
                return Ok(ItemSearchResult::Skipped)
            }
        };

        // Failures are logged by the dispatcher; the monitor retries or the
        // snatch is already failed.
        let dispatched = self.dispatcher.dispatch(&record).await.is_ok();
        let record = self.store.get_snatch(&record.id)?.unwrap_or(record);

        Ok(ItemSearchResult::Snatched { record, dispatched })
    }

    async fn monitor_cycle(&self) -> Result<MonitorSummary, SchedulerError> {
        let open = self.store.open_snatches()?;
        let mut summary = MonitorSummary {
            checked: open.len(),
            ..Default::default()
        };

        for record in &open {
            match self.monitor_one(record).await {
                Ok(MonitorStep::Dispatched) => summary.dispatched += 1,
                Ok(MonitorStep::Waiting) => {}
                Ok(MonitorStep::Completed) => summary.completed += 1,
                Ok(MonitorStep::Failed) => summary.failed += 1,
                Ok(MonitorStep::Deferred) => summary.deferred += 1,
                Err(e) => {
                    summary.deferred += 1;
                    warn!(snatch_id = %record.id, error = %e, "Monitoring snatch failed");
                }
            }
        }

        self.last_runs.write().await.monitor = Some(Utc::now());
        if summary.checked > 0 {
            info!(
                checked = summary.checked,
                dispatched = summary.dispatched,
                completed = summary.completed,
                failed = summary.failed,
                deferred = summary.deferred,
                "Download monitor cycle complete"
            );
        }
        Ok(summary)
    }

    async fn monitor_one(&self, record: &SnatchRecord) -> Result<MonitorStep, SchedulerError> {
        if !record.is_dispatched() {
            return Ok(match self.dispatcher.dispatch(record).await {
                Ok(_) => MonitorStep::Dispatched,
                Err(e) if e.is_terminal() => MonitorStep::Failed,
                Err(DispatchError::Store(e)) => return Err(e.into()),
                Err(_) => MonitorStep::Deferred,
            });
        }

        match self.dispatcher.status(record).await {
            Ok(DownloadStatus::Queued) | Ok(DownloadStatus::Downloading) => Ok(MonitorStep::Waiting),
            Ok(DownloadStatus::Complete) => self.collect_download(record).await,
            Ok(DownloadStatus::Failed(reason)) => {
                self.fail(record, &format!("download failed: {}", reason))
                    .await
            }
            Err(DispatchError::NotFound(_)) => {
                self.fail(record, "download disappeared from client").await
            }
            Err(e) => {
                warn!(snatch_id = %record.id, client = %record.client, error = %e, "Download status unavailable");
                Ok(MonitorStep::Deferred)
            }
        }
    }

    /// Queue the files of a completed download for post-processing.
    async fn collect_download(&self, record: &SnatchRecord) -> Result<MonitorStep, SchedulerError> {
        let files = match self.dispatcher.files(record).await {
            Ok(files) => files,
            Err(DispatchError::NotFound(_)) => {
                return self.fail(record, "download disappeared from client").await
            }
            Err(e) => {
                warn!(snatch_id = %record.id, error = %e, "Download files unavailable");
                return Ok(MonitorStep::Deferred);
            }
        };

        let books = self.reconciler.enqueue_download(record, &files).await?;
        if books == 0 {
            return self
                .fail(record, "download contained no book files")
                .await;
        }

        debug!(snatch_id = %record.id, files = books, "Completed download queued for post-processing");
        Ok(MonitorStep::Completed)
    }

    async fn fail(&self, record: &SnatchRecord, reason: &str) -> Result<MonitorStep, SchedulerError> {
        match self.dispatcher.fail(record, reason).await {
            Ok(_) => Ok(MonitorStep::Failed),
            Err(DispatchError::Store(e)) => Err(e.into()),
            Err(e) => {
                warn!(snatch_id = %record.id, error = %e, "Failing snatch deferred");
                Ok(MonitorStep::Deferred)
            }
        }
    }

    async fn postprocess_cycle(&self) -> Result<ReconcileSummary, SchedulerError> {
        if let Err(e) = self.reconciler.scan_untracked() {
            warn!(error = %e, "Scanning the untracked folder failed");
        }

        let summary = self.reconciler.run_pending().await?;
        self.last_runs.write().await.postprocess = Some(Utc::now());
        Ok(summary)
    }
}
