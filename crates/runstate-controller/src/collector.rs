//! Pull-mode collector
//!
//! Classifies the full entity listing on demand instead of keeping a store.
//! A listing may be reused for up to `cache_max_age`; a failed or timed-out
//! listing is an error for that collection and never falls back to an older
//! one.

use crate::decode::decode_pipeline_run;
use crate::metrics::ControllerMetrics;
use crate::source::EntitySource;
use crate::{CollectorConfig, ControllerError};
use runstate_domain::Classifier;
use runstate_store::MetricRecord;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};

#[derive(Debug)]
struct CachedCollection {
    records: Arc<Vec<MetricRecord>>,
    at: Instant,
}

/// Builds metric records straight from a listing at scrape time
#[derive(Debug)]
pub struct PullCollector<S: EntitySource> {
    source: Arc<S>,
    classifier: Classifier,
    config: CollectorConfig,
    metrics: Arc<ControllerMetrics>,
    cache: Mutex<Option<CachedCollection>>,
}

impl<S: EntitySource> PullCollector<S> {
    /// Create a collector over `source`
    ///
    /// # Errors
    /// Returns [`ControllerError::Config`] if the configuration is invalid
    pub fn new(
        source: Arc<S>,
        classifier: Classifier,
        config: CollectorConfig,
    ) -> Result<Self, ControllerError> {
        config.validate()?;
        Ok(Self {
            source,
            classifier,
            config,
            metrics: Arc::new(ControllerMetrics::new()),
            cache: Mutex::new(None),
        })
    }

    /// Collector self-metrics
    pub fn metrics(&self) -> &Arc<ControllerMetrics> {
        &self.metrics
    }

    /// Records for every listed, non-terminating, well-formed entity
    ///
    /// Sorted by identity. Concurrent callers share one listing: the cache
    /// lock is held across the source call.
    ///
    /// # Errors
    /// Returns a transient error if the listing fails or times out
    pub async fn collect(&self) -> Result<Arc<Vec<MetricRecord>>, ControllerError> {
        let mut cache = self.cache.lock().await;

        if let Some(cached) = cache.as_ref() {
            if cached.at.elapsed() < self.config.cache_max_age() {
                return Ok(Arc::clone(&cached.records));
            }
        }

        // Drop the old collection first so a failure cannot serve it later.
        *cache = None;

        let call_timeout = self.config.source_timeout();
        let values = match timeout(call_timeout, self.source.list()).await {
            Ok(Ok(values)) => values,
            Ok(Err(e)) => {
                self.metrics.record_transient_failure();
                return Err(e.into());
            }
            Err(_) => {
                self.metrics.record_transient_failure();
                return Err(ControllerError::Timeout(call_timeout));
            }
        };

        let mut records = Vec::with_capacity(values.len());
        for value in &values {
            let snapshot = match decode_pipeline_run(value) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    self.metrics.record_malformed();
                    tracing::warn!("Skipping entity during collection: {}", e);
                    continue;
                }
            };
            self.metrics.record_observed();
            if snapshot.is_terminating() {
                continue;
            }
            let classification = self.classifier.classify(&snapshot);
            records.push(MetricRecord::from_classification(snapshot.id, classification));
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));

        tracing::debug!("Collected {} records from {} entities", records.len(), values.len());

        let records = Arc::new(records);
        *cache = Some(CachedCollection {
            records: Arc::clone(&records),
            at: Instant::now(),
        });
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use runstate_domain::{EntityId, StatusLabel};
    use serde_json::{json, Value};
    use std::time::Duration;

    fn pipeline_run(name: &str, reason: &str) -> Value {
        json!({
            "metadata": { "namespace": "ci", "name": name },
            "status": { "conditions": [ { "type": "Succeeded", "status": "Unknown", "reason": reason } ] }
        })
    }

    fn collector(source: Arc<MemorySource>, cache_max_age_secs: u64) -> PullCollector<MemorySource> {
        let config = CollectorConfig {
            cache_max_age_secs,
            source_timeout_secs: 1,
        };
        PullCollector::new(source, Classifier::default(), config).unwrap()
    }

    #[tokio::test]
    async fn test_collect_reflects_current_listing() {
        let source = Arc::new(MemorySource::new());
        source.apply(pipeline_run("e1", "Running")).unwrap();
        source.apply(pipeline_run("e2", "Started")).unwrap();
        let collector = collector(Arc::clone(&source), 0);

        let first = collector.collect().await.unwrap();
        let ids: Vec<_> = first.iter().map(|r| r.id.name().to_string()).collect();
        assert_eq!(ids, vec!["e1", "e2"]);

        source.delete(&EntityId::new("ci", "e2"));
        source.apply(pipeline_run("e3", "Failed")).unwrap();

        let second = collector.collect().await.unwrap();
        let ids: Vec<_> = second.iter().map(|r| r.id.name().to_string()).collect();
        assert_eq!(ids, vec!["e1", "e3"]);
        assert_eq!(second[1].status, StatusLabel::Failed);
    }

    #[tokio::test]
    async fn test_collect_failure_is_not_stale_data() {
        let source = Arc::new(MemorySource::new());
        source.apply(pipeline_run("e1", "Running")).unwrap();
        let collector = collector(Arc::clone(&source), 0);
        collector.collect().await.unwrap();

        source.set_failing(true);
        assert!(collector.collect().await.unwrap_err().is_transient());
        assert_eq!(collector.metrics().snapshot().transient_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_reused_within_max_age() {
        let source = Arc::new(MemorySource::new());
        source.apply(pipeline_run("e1", "Running")).unwrap();
        let collector = collector(Arc::clone(&source), 5);

        let first = collector.collect().await.unwrap();
        source.apply(pipeline_run("e2", "Running")).unwrap();
        let cached = collector.collect().await.unwrap();
        assert!(Arc::ptr_eq(&first, &cached));

        tokio::time::advance(Duration::from_secs(6)).await;
        let fresh = collector.collect().await.unwrap();
        assert_eq!(fresh.len(), 2);
    }

    #[tokio::test]
    async fn test_collect_skips_terminating_and_malformed() {
        let source = Arc::new(MemorySource::new());
        source.apply(pipeline_run("ok", "Running")).unwrap();
        source
            .apply(json!({
                "metadata": { "namespace": "ci", "name": "leaving", "deletionTimestamp": "2024-01-01T00:00:00Z" }
            }))
            .unwrap();
        source
            .apply(json!({
                "metadata": { "namespace": "ci", "name": "broken" },
                "status": { "conditions": "nope" }
            }))
            .unwrap();
        let collector = collector(Arc::clone(&source), 0);

        let records = collector.collect().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, EntityId::new("ci", "ok"));
        assert_eq!(collector.metrics().snapshot().malformed, 1);
    }
}
