//! Download dispatch.
//!
//! A [`Dispatcher`] hands snatched results to the [`DownloadClient`] bound
//! to their media kind and tracks them through completion. Torrents go to
//! [`QBittorrentClient`], NZBs to [`SabnzbdClient`].

mod config;
mod dispatcher;
mod qbittorrent;
mod sabnzbd;
mod types;

pub use config::{DownloadClientsConfig, QBittorrentConfig, SabnzbdConfig};
pub use dispatcher::{Dispatcher, UNASSIGNED_CLIENT};
pub use qbittorrent::QBittorrentClient;
pub use sabnzbd::SabnzbdClient;
pub use types::{DispatchError, DownloadClient, DownloadStatus};
