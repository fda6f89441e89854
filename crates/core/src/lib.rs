pub mod config;
pub mod dispatch;
pub mod library;
pub mod matcher;
pub mod metrics;
pub mod normalize;
pub mod notify;
pub mod postprocess;
pub mod provider;
pub mod scheduler;
pub mod snatch;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use library::{LibraryStore, SqliteLibraryStore, StoreError, WantedItem, WantedStatus};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerError, SchedulerStatus};
