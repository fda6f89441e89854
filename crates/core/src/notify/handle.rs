use tokio::sync::mpsc;
use tracing::warn;

use crate::metrics;

use super::NotificationEvent;

/// Handle for emitting notifications.
///
/// Cheap to clone. Delivery is fire-and-forget: a full or closed channel is
/// logged and counted, never reported to the caller.
#[derive(Clone)]
pub struct NotifierHandle {
    tx: mpsc::Sender<NotificationEvent>,
}

impl NotifierHandle {
    pub fn new(tx: mpsc::Sender<NotificationEvent>) -> Self {
        Self { tx }
    }

    /// A handle whose events go nowhere.
    pub fn disabled() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }

    pub async fn emit(&self, event: NotificationEvent) {
        let kind = event.kind;
        if let Err(e) = self.tx.send(event).await {
            metrics::NOTIFICATIONS_DROPPED
                .with_label_values(&[kind.as_str()])
                .inc();
            warn!(kind = %kind, error = %e, "Failed to emit notification");
        }
    }

    /// Emit without waiting. Returns whether the event was queued.
    pub fn try_emit(&self, event: NotificationEvent) -> bool {
        let kind = event.kind;
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                metrics::NOTIFICATIONS_DROPPED
                    .with_label_values(&[kind.as_str()])
                    .inc();
                warn!(kind = %kind, error = %e, "Failed to emit notification");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotificationKind;

    #[tokio::test]
    async fn test_emit() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = NotifierHandle::new(tx);

        handle
            .emit(NotificationEvent::new(NotificationKind::Recorded, "/library/Dune.epub"))
            .await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, NotificationKind::Recorded);
        assert_eq!(event.detail, "/library/Dune.epub");
    }

    #[test]
    fn test_try_emit_full_channel() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = NotifierHandle::new(tx);

        assert!(handle.try_emit(NotificationEvent::new(NotificationKind::SnatchFailed, "a")));
        assert!(!handle.try_emit(NotificationEvent::new(NotificationKind::SnatchFailed, "b")));
    }

    #[tokio::test]
    async fn test_disabled_handle_swallows() {
        let handle = NotifierHandle::disabled();
        handle
            .emit(NotificationEvent::new(NotificationKind::Unidentified, "x"))
            .await;
        assert!(!handle.try_emit(NotificationEvent::new(NotificationKind::Unidentified, "y")));
    }
}
