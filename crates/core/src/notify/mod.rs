//! Operator notifications.
//!
//! Components emit [`NotificationEvent`]s through a [`NotifierHandle`]; a
//! [`NotifierWorker`] delivers them to the configured [`Notifier`]s. Delivery
//! never blocks or fails the emitting operation.

mod handle;
mod types;
mod worker;

pub use handle::NotifierHandle;
pub use types::{NotificationEvent, NotificationKind, Notifier, NotifyError};
pub use worker::{create_notifier, LogNotifier, NotifierWorker};
