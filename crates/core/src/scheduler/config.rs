//! Scheduler configuration.

use serde::{Deserialize, Serialize};

use crate::postprocess::ReconcilerConfig;
use crate::provider::PipelineConfig;

/// The `[scheduler]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Start the periodic loops with the server.
    /// When disabled, cycles only run through the force endpoints.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How often every Wanted item is searched (milliseconds).
    #[serde(default = "default_search_interval")]
    pub search_interval_ms: u64,

    /// How often pending dispatches are retried and downloads polled.
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_ms: u64,

    /// How often the untracked folder is scanned and queued files reconciled.
    #[serde(default = "default_postprocess_interval")]
    pub postprocess_interval_ms: u64,

    /// Wanted items searched at once within one cycle.
    #[serde(default = "default_max_concurrent_searches")]
    pub max_concurrent_searches: usize,

    /// Per-provider query timeout (milliseconds).
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_ms: u64,

    /// Providers queried at once for one item.
    #[serde(default = "default_max_concurrent_providers")]
    pub max_concurrent_providers: usize,

    /// Files reconciled at once.
    #[serde(default = "default_max_parallel_reconciles")]
    pub max_parallel_reconciles: usize,

    /// Retryable failures tolerated before a file is marked Unidentified.
    #[serde(default = "default_max_process_retries")]
    pub max_process_retries: u32,
}

fn default_true() -> bool {
    true
}

fn default_search_interval() -> u64 {
    6 * 60 * 60 * 1000 // 6 hours
}

fn default_monitor_interval() -> u64 {
    60_000
}

fn default_postprocess_interval() -> u64 {
    10 * 60 * 1000
}

fn default_max_concurrent_searches() -> usize {
    2
}

fn default_provider_timeout() -> u64 {
    30_000
}

fn default_max_concurrent_providers() -> usize {
    4
}

fn default_max_parallel_reconciles() -> usize {
    4
}

fn default_max_process_retries() -> u32 {
    3
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            search_interval_ms: default_search_interval(),
            monitor_interval_ms: default_monitor_interval(),
            postprocess_interval_ms: default_postprocess_interval(),
            max_concurrent_searches: default_max_concurrent_searches(),
            provider_timeout_ms: default_provider_timeout(),
            max_concurrent_providers: default_max_concurrent_providers(),
            max_parallel_reconciles: default_max_parallel_reconciles(),
            max_process_retries: default_max_process_retries(),
        }
    }
}

impl SchedulerConfig {
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            provider_timeout_ms: self.provider_timeout_ms,
            max_concurrent_providers: self.max_concurrent_providers,
        }
    }

    pub fn reconciler(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            max_parallel_reconciles: self.max_parallel_reconciles,
            max_process_retries: self.max_process_retries,
            ..ReconcilerConfig::default()
        }
    }
}
