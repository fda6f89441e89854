//! Prometheus metrics for core components.
//!
//! - Provider queries and search cycles
//! - Snatch decisions and dispatches
//! - Post-process reconciliation
//! - Notifications

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts};

// =============================================================================
// Search
// =============================================================================

/// Provider queries by provider and result.
pub static PROVIDER_QUERIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("bookbag_provider_queries_total", "Total provider queries"),
        &["provider", "result"], // "ok", "timeout", "rate_limited", "error"
    )
    .unwrap()
});

/// Duration of a search for one wanted item.
pub static SEARCH_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "bookbag_search_duration_seconds",
            "Duration of a search across all providers",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &[],
    )
    .unwrap()
});

// =============================================================================
// Snatch / dispatch
// =============================================================================

/// Snatch decisions by outcome.
pub static SNATCH_DECISIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("bookbag_snatch_decisions_total", "Total snatch decisions"),
        &["outcome"], // "snatched", "already_snatched", "superseded", "no_match"
    )
    .unwrap()
});

/// Dispatches to download clients by client and outcome.
pub static DISPATCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("bookbag_dispatches_total", "Total dispatch attempts"),
        &["client", "outcome"], // "ok", "rejected", "unreachable"
    )
    .unwrap()
});

// =============================================================================
// Post-process
// =============================================================================

/// Reconcile transitions by target state.
pub static RECONCILE_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "bookbag_reconcile_transitions_total",
            "Discovered file state transitions",
        ),
        &["state"],
    )
    .unwrap()
});

// =============================================================================
// Notifications
// =============================================================================

/// Notifications that could not be queued.
pub static NOTIFICATIONS_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "bookbag_notifications_dropped_total",
            "Notifications dropped because the channel was full or closed",
        ),
        &["kind"],
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(PROVIDER_QUERIES.clone()),
        Box::new(SEARCH_DURATION.clone()),
        Box::new(SNATCH_DECISIONS.clone()),
        Box::new(DISPATCHES.clone()),
        Box::new(RECONCILE_TRANSITIONS.clone()),
        Box::new(NOTIFICATIONS_DROPPED.clone()),
    ]
}
