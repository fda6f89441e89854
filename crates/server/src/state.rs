use std::sync::Arc;

use bookbag_core::{Config, LibraryStore, SanitizedConfig, Scheduler};

/// Shared application state
pub struct AppState {
    config: Config,
    store: Arc<dyn LibraryStore>,
    scheduler: Arc<Scheduler>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn LibraryStore>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            config,
            store,
            scheduler,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn store(&self) -> &dyn LibraryStore {
        self.store.as_ref()
    }

    pub fn scheduler(&self) -> &Scheduler {
        self.scheduler.as_ref()
    }
}
