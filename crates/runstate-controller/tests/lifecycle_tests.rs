//! End-to-end lifecycle tests for the router, worker and collector

use proptest::prelude::*;
use runstate_controller::{
    CollectorConfig, ControllerConfig, ControllerError, ControllerWorker, EntityPhase,
    EntitySource, LifecycleRouter, MemorySource, Outcome, PullCollector, SourceError, WatchEvent,
};
use runstate_domain::{
    Classifier, Condition, ConditionStatus, EntityId, PipelineRunSnapshot, StatusLabel,
};
use runstate_store::MetricStateStore;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn router() -> LifecycleRouter {
    LifecycleRouter::new(
        Arc::new(MetricStateStore::new()),
        Classifier::default(),
        Duration::from_secs(300),
    )
}

fn running(id: &EntityId, reason: &str) -> PipelineRunSnapshot {
    PipelineRunSnapshot::new(id.clone()).with_condition(Condition::new(
        "Succeeded",
        ConditionStatus::Unknown,
        reason,
    ))
}

fn pipeline_run(name: &str, reason: &str) -> Value {
    json!({
        "metadata": { "namespace": "ci", "name": name },
        "status": { "conditions": [ { "type": "Succeeded", "status": "Unknown", "reason": reason } ] }
    })
}

/// Source whose calls never complete
struct HangingSource;

impl EntitySource for HangingSource {
    async fn list(&self) -> Result<Vec<Value>, SourceError> {
        std::future::pending().await
    }

    async fn get(&self, _id: &EntityId) -> Result<Option<Value>, SourceError> {
        std::future::pending().await
    }
}

#[derive(Debug, Clone)]
enum Step {
    Observe(&'static str),
    SoftDelete,
    HardDelete,
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        prop::sample::select(vec!["Started", "Running", "Failed", "Succeeded", "Cancelled"])
            .prop_map(Step::Observe),
        Just(Step::SoftDelete),
        Just(Step::HardDelete),
    ]
}

proptest! {
    #[test]
    fn prop_store_follows_last_signal(steps in prop::collection::vec(step_strategy(), 1..24)) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let router = router();
            let id = EntityId::new("ci", "prop");

            for step in &steps {
                let seq = router.next_seq();
                match step {
                    Step::Observe(reason) => {
                        router.observe(running(&id, reason), seq).await.unwrap();
                    }
                    Step::SoftDelete => {
                        let snapshot = running(&id, "Running").terminating("2024-01-01T00:00:00Z");
                        router.observe(snapshot, seq).await.unwrap();
                    }
                    Step::HardDelete => {
                        router.not_found(&id, seq).await;
                    }
                }
            }

            let record = router.store().get(&id);
            match steps.last() {
                Some(Step::Observe(reason)) => {
                    let record = record.expect("record after final observe");
                    prop_assert_eq!(record.status, StatusLabel::from_reason(reason));
                }
                _ => prop_assert!(record.is_none()),
            }
            Ok(())
        })?;
    }
}

#[tokio::test]
async fn test_repeated_removals_are_idempotent() {
    let router = router();
    let id = EntityId::new("ci", "a");
    router.observe(running(&id, "Running"), router.next_seq()).await.unwrap();

    let terminating = running(&id, "Running").terminating("2024-01-01T00:00:00Z");
    assert_eq!(
        router.observe(terminating.clone(), router.next_seq()).await.unwrap(),
        Outcome::Removed
    );
    assert_eq!(
        router.observe(terminating, router.next_seq()).await.unwrap(),
        Outcome::AlreadyAbsent
    );
    assert_eq!(router.not_found(&id, router.next_seq()).await, Outcome::AlreadyAbsent);
    assert_eq!(router.not_found(&id, router.next_seq()).await, Outcome::AlreadyAbsent);

    assert!(router.store().is_empty());
    assert_eq!(router.phase(&id), Some(EntityPhase::Gone));
}

#[tokio::test]
async fn test_entity_c_running_then_terminating() {
    let router = router();
    let id = EntityId::new("ci", "c");
    router.observe(running(&id, "Running"), router.next_seq()).await.unwrap();
    assert!(router.store().contains(&id));

    let terminating = running(&id, "Running").terminating("2024-01-01T00:00:00Z");
    router.observe(terminating, router.next_seq()).await.unwrap();
    assert!(!router.store().contains(&id));
}

#[tokio::test]
async fn test_entity_d_not_found_never_seen() {
    let router = router();
    let id = EntityId::new("ci", "d");
    let outcome = router.not_found(&id, router.next_seq()).await;

    assert_eq!(outcome, Outcome::AlreadyAbsent);
    assert!(router.store().is_empty());
}

#[tokio::test]
async fn test_delete_wins_over_racing_update() {
    let router = Arc::new(router());
    let id = EntityId::new("ci", "race");

    // Update dispatched first, delete second; the update lands last.
    let update_seq = router.next_seq();
    let delete_seq = router.next_seq();
    router.not_found(&id, delete_seq).await;
    let outcome = router.observe(running(&id, "Running"), update_seq).await.unwrap();

    assert_eq!(outcome, Outcome::Discarded);
    assert!(router.store().is_empty());
}

#[tokio::test]
async fn test_concurrent_identities_proceed_independently() {
    let router = Arc::new(router());
    let mut handles = Vec::new();

    for i in 0..32 {
        let router = Arc::clone(&router);
        handles.push(tokio::spawn(async move {
            let id = EntityId::new("ci", format!("pr-{}", i));
            router.observe(running(&id, "Running"), router.next_seq()).await.unwrap();
            if i % 2 == 0 {
                router.not_found(&id, router.next_seq()).await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(router.store().len(), 16);
    assert_eq!(router.lock_count(), 0);
}

#[tokio::test]
async fn test_pull_listing_replaces_previous_scrape() {
    let source = Arc::new(MemorySource::new());
    source.apply(pipeline_run("e1", "Running")).unwrap();
    source.apply(pipeline_run("e3", "Running")).unwrap();
    let config = CollectorConfig {
        cache_max_age_secs: 0,
        ..Default::default()
    };
    let collector = PullCollector::new(Arc::clone(&source), Classifier::default(), config).unwrap();
    assert_eq!(collector.collect().await.unwrap().len(), 2);

    source.delete(&EntityId::new("ci", "e3"));
    source.apply(pipeline_run("e2", "Started")).unwrap();

    let names: Vec<String> = collector
        .collect()
        .await
        .unwrap()
        .iter()
        .map(|r| r.id.name().to_string())
        .collect();
    assert_eq!(names, vec!["e1", "e2"]);
}

#[tokio::test(start_paused = true)]
async fn test_pull_list_timeout_fails_scrape() {
    let collector = PullCollector::new(
        Arc::new(HangingSource),
        Classifier::default(),
        CollectorConfig::default(),
    )
    .unwrap();

    let err = collector.collect().await.unwrap_err();
    assert!(matches!(err, ControllerError::Timeout(_)));
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_timeout_keeps_store() {
    let router = router();
    let id = EntityId::new("ci", "slow");
    router.observe(running(&id, "Running"), router.next_seq()).await.unwrap();

    let err = router
        .reconcile(&HangingSource, &id, Duration::from_secs(2))
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert!(router.store().contains(&id));
}

#[tokio::test(start_paused = true)]
async fn test_resync_timeout_keeps_store() {
    let store = Arc::new(MetricStateStore::new());
    let id = EntityId::new("ci", "a");
    let worker = ControllerWorker::new(
        ControllerConfig::default(),
        Arc::new(HangingSource),
        Arc::clone(&store),
    )
    .unwrap();
    worker
        .router()
        .observe(running(&id, "Running"), worker.router().next_seq())
        .await
        .unwrap();

    assert!(worker.resync().await.is_err());
    assert!(store.contains(&id));
}

#[tokio::test]
async fn test_worker_watch_stream_end_to_end() {
    let (source, events) = MemorySource::with_watch(64);
    let source = Arc::new(source);
    let store = Arc::new(MetricStateStore::new());
    let config = ControllerConfig {
        reconcile_interval_secs: 60,
        ..Default::default()
    };
    let worker = ControllerWorker::new(config, Arc::clone(&source), Arc::clone(&store)).unwrap();

    let a = source.apply(pipeline_run("a", "Running")).unwrap();
    let c = source.apply(pipeline_run("c", "Running")).unwrap();
    source
        .apply(json!({
            "metadata": { "namespace": "ci", "name": "c", "deletionTimestamp": "2024-01-01T00:00:00Z" }
        }))
        .unwrap();
    source.apply(pipeline_run("a", "Succeeded")).unwrap();

    worker
        .run_until(events, tokio::time::sleep(Duration::from_millis(200)))
        .await
        .unwrap();

    assert_eq!(store.get(&a).unwrap().status, StatusLabel::Succeeded);
    assert!(!store.contains(&c));
}

#[tokio::test]
async fn test_reconcile_event_after_missed_delete() {
    let source = Arc::new(MemorySource::new());
    let store = Arc::new(MetricStateStore::new());
    let worker = ControllerWorker::new(
        ControllerConfig::default(),
        Arc::clone(&source),
        Arc::clone(&store),
    )
    .unwrap();
    let id = source.apply(pipeline_run("a", "Running")).unwrap();
    worker.resync().await.unwrap();
    assert!(store.contains(&id));

    // Deleted without a watch delivery; an explicit reconcile cleans up.
    source.delete(&id);
    let (tx, rx) = tokio::sync::mpsc::channel(4);
    tx.send(WatchEvent::Reconcile(id.clone())).await.unwrap();
    drop(tx);

    worker
        .run_until(rx, tokio::time::sleep(Duration::from_millis(200)))
        .await
        .unwrap();
    assert!(!store.contains(&id));
}
