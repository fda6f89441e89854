use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{NotificationEvent, Notifier, NotifierHandle, NotifyError};

/// Writes every notification to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        let wanted_id = event.wanted.as_ref().map(|w| w.id.as_str()).unwrap_or("-");
        let title = event.wanted.as_ref().map(|w| w.title.as_str()).unwrap_or("-");
        info!(
            kind = %event.kind,
            wanted_id = %wanted_id,
            title = %title,
            detail = %event.detail,
            "Notification"
        );
        Ok(())
    }
}

/// Background task that drains the notification channel and fans events out
/// to every registered notifier.
pub struct NotifierWorker {
    rx: mpsc::Receiver<NotificationEvent>,
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotifierWorker {
    pub fn new(rx: mpsc::Receiver<NotificationEvent>, notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { rx, notifiers }
    }

    /// Run until every handle is dropped.
    pub async fn run(mut self) {
        info!(notifiers = self.notifiers.len(), "Notifier worker started");

        while let Some(event) = self.rx.recv().await {
            for notifier in &self.notifiers {
                if let Err(e) = notifier.notify(&event).await {
                    warn!(notifier = %notifier.name(), kind = %event.kind, error = %e, "Notifier failed");
                }
            }
        }

        info!("Notifier worker shutting down");
    }
}

/// Create the notification channel.
///
/// Spawn the returned worker with `tokio::spawn(worker.run())`.
pub fn create_notifier(
    notifiers: Vec<Arc<dyn Notifier>>,
    buffer_size: usize,
) -> (NotifierHandle, NotifierWorker) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    (NotifierHandle::new(tx), NotifierWorker::new(rx, notifiers))
}
