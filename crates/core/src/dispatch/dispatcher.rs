//! Routes snatch records to download clients.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::library::{LibraryStore, SnatchRecord, WantedStatus};
use crate::metrics;
use crate::notify::{NotificationEvent, NotificationKind, NotifierHandle};
use crate::provider::MediaKind;

use super::types::{DispatchError, DownloadClient, DownloadStatus};

/// Client name stored on records whose media kind has no bound client.
pub const UNASSIGNED_CLIENT: &str = "unassigned";

/// Hands open snatches to the download client bound to their media kind.
pub struct Dispatcher {
    clients: HashMap<MediaKind, Arc<dyn DownloadClient>>,
    store: Arc<dyn LibraryStore>,
    notifier: NotifierHandle,
    max_snatch_attempts: u32,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn LibraryStore>,
        notifier: NotifierHandle,
        max_snatch_attempts: u32,
    ) -> Self {
        Self {
            clients: HashMap::new(),
            store,
            notifier,
            max_snatch_attempts,
        }
    }

    /// Bind a client to a media kind, replacing any previous binding.
    pub fn with_client(mut self, kind: MediaKind, client: Arc<dyn DownloadClient>) -> Self {
        self.clients.insert(kind, client);
        self
    }

    pub fn client_for(&self, kind: MediaKind) -> Option<&Arc<dyn DownloadClient>> {
        self.clients.get(&kind)
    }

    /// Name recorded on a snatch of this media kind.
    pub fn client_name_for(&self, kind: MediaKind) -> &str {
        self.client_for(kind)
            .map(|c| c.name())
            .unwrap_or(UNASSIGNED_CLIENT)
    }

    /// `(media kind, client name)` for every binding.
    pub fn bindings(&self) -> Vec<(MediaKind, String)> {
        let mut bindings: Vec<_> = self
            .clients
            .iter()
            .map(|(kind, client)| (*kind, client.name().to_string()))
            .collect();
        bindings.sort_by_key(|(kind, _)| kind.as_str());
        bindings
    }

    fn bound_client(&self, kind: MediaKind) -> Result<&Arc<dyn DownloadClient>, DispatchError> {
        self.client_for(kind).ok_or_else(|| {
            DispatchError::ClientUnreachable(format!("no download client configured for {}", kind))
        })
    }

    /// Submit a snatched result to its download client.
    ///
    /// A rejection fails the snatch terminally. An unreachable client leaves
    /// the record open without a client id so the next monitor cycle retries.
    pub async fn dispatch(&self, record: &SnatchRecord) -> Result<String, DispatchError> {
        let submitted = match self.bound_client(record.media_kind) {
            Ok(client) => {
                client
                    .submit(&record.locator, record.media_kind, &record.result_title)
                    .await
            }
            Err(e) => Err(e),
        };
        let client_name = self.client_name_for(record.media_kind).to_string();

        match submitted {
            Ok(download_id) => {
                self.store.set_client_id(&record.id, &download_id)?;
                metrics::DISPATCHES
                    .with_label_values(&[&client_name, "ok"])
                    .inc();
                info!(
                    snatch_id = %record.id,
                    wanted_id = %record.wanted_id,
                    client = %client_name,
                    download_id = %download_id,
                    "Dispatched snatch to download client"
                );
                Ok(download_id)
            }
            Err(e) if e.is_terminal() => {
                metrics::DISPATCHES
                    .with_label_values(&[&client_name, "rejected"])
                    .inc();
                self.fail(record, &e.to_string()).await?;
                Err(e)
            }
            Err(e) => {
                metrics::DISPATCHES
                    .with_label_values(&[&client_name, "unreachable"])
                    .inc();
                let attempts = self.store.record_dispatch_failure(&record.id, &e.to_string())?;
                warn!(
                    snatch_id = %record.id,
                    client = %client_name,
                    attempts = attempts,
                    error = %e,
                    "Dispatch failed, will retry next cycle"
                );
                Err(e)
            }
        }
    }

    /// Ask the bound client where a dispatched download stands.
    pub async fn status(&self, record: &SnatchRecord) -> Result<DownloadStatus, DispatchError> {
        let download_id = dispatched_id(record)?;
        self.bound_client(record.media_kind)?
            .status(download_id)
            .await
    }

    /// Files of a completed download.
    pub async fn files(&self, record: &SnatchRecord) -> Result<Vec<PathBuf>, DispatchError> {
        let download_id = dispatched_id(record)?;
        self.bound_client(record.media_kind)?
            .files(download_id)
            .await
    }

    /// Terminally fail a snatch and tell the operator.
    ///
    /// Returns the wanted item's new status.
    pub async fn fail(
        &self,
        record: &SnatchRecord,
        reason: &str,
    ) -> Result<WantedStatus, DispatchError> {
        let status = self
            .store
            .fail_snatch(&record.id, reason, self.max_snatch_attempts)?;

        error!(
            snatch_id = %record.id,
            wanted_id = %record.wanted_id,
            title = %record.result_title,
            provider = %record.provider,
            reason = %reason,
            wanted_status = %status,
            "Snatch failed"
        );

        let wanted = self
            .store
            .get_wanted(&record.wanted_id)
            .ok()
            .flatten()
            .map(|w| w.summary());
        self.notifier.try_emit(
            NotificationEvent::new(
                NotificationKind::SnatchFailed,
                format!("{}: {}", record.result_title, reason),
            )
            .with_wanted(wanted),
        );

        Ok(status)
    }
}

fn dispatched_id(record: &SnatchRecord) -> Result<&str, DispatchError> {
    record
        .client_download_id
        .as_deref()
        .ok_or_else(|| DispatchError::NotFound(format!("snatch {} was never dispatched", record.id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{
        NewSnatch, NewWantedItem, SnatchOutcome, SnatchStatus, SqliteLibraryStore,
    };
    use crate::notify::NotificationEvent;
    use crate::testing::MockDownloadClient;
    use tokio::sync::mpsc;

    fn snatched(store: &SqliteLibraryStore, kind: MediaKind, client: &str) -> SnatchRecord {
        let wanted = store
            .add_wanted(NewWantedItem::book("Dune", "Frank Herbert"))
            .unwrap();
        let token = store.issue_search_token(&wanted.id).unwrap();
        match store
            .try_snatch(
                &wanted.id,
                token,
                NewSnatch {
                    result_title: "Frank Herbert - Dune (epub)".to_string(),
                    provider: "tracker".to_string(),
                    locator: "magnet:?xt=urn:btih:abc".to_string(),
                    media_kind: kind,
                    size_bytes: 2_000_000,
                    client: client.to_string(),
                },
            )
            .unwrap()
        {
            SnatchOutcome::Snatched(record) => record,
            other => panic!("expected snatch, got {:?}", other),
        }
    }

    fn setup(
        max_attempts: u32,
    ) -> (
        Arc<SqliteLibraryStore>,
        Arc<MockDownloadClient>,
        Dispatcher,
        mpsc::Receiver<NotificationEvent>,
    ) {
        let store = Arc::new(SqliteLibraryStore::in_memory().unwrap());
        let client = Arc::new(MockDownloadClient::new("qbittorrent"));
        let (tx, rx) = mpsc::channel(8);
        let dispatcher = Dispatcher::new(store.clone(), NotifierHandle::new(tx), max_attempts)
            .with_client(MediaKind::Torrent, client.clone());
        (store, client, dispatcher, rx)
    }

    #[tokio::test]
    async fn test_dispatch_success_stores_client_id() {
        let (store, client, dispatcher, _rx) = setup(3);
        let record = snatched(&store, MediaKind::Torrent, "qbittorrent");

        let id = dispatcher.dispatch(&record).await.unwrap();

        let stored = store.get_snatch(&record.id).unwrap().unwrap();
        assert_eq!(stored.client_download_id.as_deref(), Some(id.as_str()));
        assert_eq!(client.recorded_submits().await.len(), 1);
    }

    #[tokio::test]
    async fn test_rejection_fails_snatch_and_notifies() {
        let (store, client, dispatcher, mut rx) = setup(3);
        let record = snatched(&store, MediaKind::Torrent, "qbittorrent");
        client
            .set_next_error(DispatchError::ClientRejected("bad magnet".into()))
            .await;

        let err = dispatcher.dispatch(&record).await.unwrap_err();
        assert!(matches!(err, DispatchError::ClientRejected(_)));

        let stored = store.get_snatch(&record.id).unwrap().unwrap();
        assert_eq!(stored.status, SnatchStatus::Failed);
        let wanted = store.get_wanted(&record.wanted_id).unwrap().unwrap();
        assert_eq!(wanted.status, WantedStatus::Wanted);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, NotificationKind::SnatchFailed);
        assert_eq!(event.wanted.unwrap().id, record.wanted_id);
    }

    #[tokio::test]
    async fn test_rejection_at_attempt_bound_fails_item() {
        let (store, client, dispatcher, _rx) = setup(1);
        let record = snatched(&store, MediaKind::Torrent, "qbittorrent");
        client
            .set_next_error(DispatchError::ClientRejected("broken".into()))
            .await;

        let _ = dispatcher.dispatch(&record).await;

        let wanted = store.get_wanted(&record.wanted_id).unwrap().unwrap();
        assert_eq!(wanted.status, WantedStatus::Failed);
    }

    #[tokio::test]
    async fn test_unreachable_keeps_record_open() {
        let (store, client, dispatcher, mut rx) = setup(3);
        let record = snatched(&store, MediaKind::Torrent, "qbittorrent");
        client
            .set_next_error(DispatchError::ClientUnreachable("connection refused".into()))
            .await;

        let err = dispatcher.dispatch(&record).await.unwrap_err();
        assert!(err.is_retryable());

        let stored = store.get_snatch(&record.id).unwrap().unwrap();
        assert_eq!(stored.status, SnatchStatus::Snatched);
        assert!(stored.client_download_id.is_none());
        assert_eq!(stored.dispatch_attempts, 1);
        assert!(rx.try_recv().is_err());

        // Next cycle succeeds.
        dispatcher.dispatch(&record).await.unwrap();
        assert!(store.get_snatch(&record.id).unwrap().unwrap().is_dispatched());
    }

    #[tokio::test]
    async fn test_missing_binding_is_unreachable() {
        let (store, _client, dispatcher, _rx) = setup(3);
        let record = snatched(&store, MediaKind::Nzb, UNASSIGNED_CLIENT);

        let err = dispatcher.dispatch(&record).await.unwrap_err();
        assert!(matches!(err, DispatchError::ClientUnreachable(_)));
        let stored = store.get_snatch(&record.id).unwrap().unwrap();
        assert_eq!(stored.status, SnatchStatus::Snatched);
    }

    #[tokio::test]
    async fn test_status_requires_dispatch() {
        let (store, client, dispatcher, _rx) = setup(3);
        let record = snatched(&store, MediaKind::Torrent, "qbittorrent");
        assert!(matches!(
            dispatcher.status(&record).await,
            Err(DispatchError::NotFound(_))
        ));

        let id = dispatcher.dispatch(&record).await.unwrap();
        client.set_status(&id, DownloadStatus::Complete).await;
        let record = store.get_snatch(&record.id).unwrap().unwrap();
        assert_eq!(dispatcher.status(&record).await.unwrap(), DownloadStatus::Complete);
    }

    #[test]
    fn test_client_names() {
        let (_store, _client, dispatcher, _rx) = setup(3);
        assert_eq!(dispatcher.client_name_for(MediaKind::Torrent), "qbittorrent");
        assert_eq!(dispatcher.client_name_for(MediaKind::Nzb), UNASSIGNED_CLIENT);
        assert_eq!(
            dispatcher.bindings(),
            vec![(MediaKind::Torrent, "qbittorrent".to_string())]
        );
    }
}
