//! Self-metrics for controller operations

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the router and worker
///
/// Shared between concurrently running reconciliations, so every counter is
/// atomic. Use [`ControllerMetrics::snapshot`] to read a consistent-enough
/// copy for reporting.
#[derive(Debug, Default)]
pub struct ControllerMetrics {
    observed: AtomicU64,
    upserts: AtomicU64,
    removals: AtomicU64,
    discarded: AtomicU64,
    malformed: AtomicU64,
    transient_failures: AtomicU64,
    retries: AtomicU64,
    resyncs: AtomicU64,
}

/// Plain copy of [`ControllerMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Observe signals processed
    pub observed: u64,
    /// Records written
    pub upserts: u64,
    /// Removal signals applied
    pub removals: u64,
    /// Stale signals discarded
    pub discarded: u64,
    /// Entities skipped as malformed
    pub malformed: u64,
    /// Source calls that failed or timed out
    pub transient_failures: u64,
    /// Reconcile retries scheduled
    pub retries: u64,
    /// Resync cycles completed
    pub resyncs: u64,
}

impl ControllerMetrics {
    /// Create new zeroed metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observe signal
    pub fn record_observed(&self) {
        self.observed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a store upsert
    pub fn record_upsert(&self) {
        self.upserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an applied removal
    pub fn record_removal(&self) {
        self.removals.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a discarded stale signal
    pub fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a skipped malformed entity
    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed or timed-out source call
    pub fn record_transient_failure(&self) {
        self.transient_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a scheduled retry
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed resync cycle
    pub fn record_resync(&self) {
        self.resyncs.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            observed: self.observed.load(Ordering::Relaxed),
            upserts: self.upserts.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            transient_failures: self.transient_failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    /// Generate a summary report of metrics
    pub fn summary(&self) -> String {
        let lines = [
            "Controller Metrics Summary".to_string(),
            "==========================".to_string(),
            format!("Resync cycles: {}", self.resyncs),
            format!("Observed: {}", self.observed),
            format!("Upserts: {}", self.upserts),
            format!("Removals: {}", self.removals),
            format!("Discarded (stale): {}", self.discarded),
            format!("Malformed skipped: {}", self.malformed),
            format!("Transient failures: {}", self.transient_failures),
            format!("Retries: {}", self.retries),
        ];
        lines.join("\n")
    }
}
