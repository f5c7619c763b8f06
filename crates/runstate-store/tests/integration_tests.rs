//! Integration tests for runstate-store
//!
//! These tests exercise the store under concurrent writers and readers.

use runstate_domain::{AuxLabels, EntityId, StatusLabel};
use runstate_store::{MetricRecord, MetricStateStore};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

fn record(name: &str, status: StatusLabel) -> MetricRecord {
    MetricRecord::new(EntityId::new("ci", name), status, AuxLabels::default())
}

#[test]
fn test_concurrent_writers_distinct_identities() {
    let store = Arc::new(MetricStateStore::new());

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..100 {
                    let r = record(&format!("pr-{}-{}", t, i), StatusLabel::Running);
                    store.upsert(&r.id.clone(), r).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.len(), 800);
}

#[test]
fn test_readers_see_one_record_per_identity() {
    let store = Arc::new(MetricStateStore::new());
    let id = EntityId::new("ci", "flapping");

    let writer = {
        let store = Arc::clone(&store);
        let id = id.clone();
        thread::spawn(move || {
            let statuses = [StatusLabel::Pending, StatusLabel::Running, StatusLabel::Failed];
            for i in 0..1_000 {
                if i % 7 == 0 {
                    store.remove(&id);
                } else {
                    let r = MetricRecord::new(
                        id.clone(),
                        statuses[i % statuses.len()].clone(),
                        AuxLabels::default(),
                    );
                    store.upsert(&id, r).unwrap();
                }
            }
        })
    };

    let reader = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for _ in 0..1_000 {
                let snapshot = store.snapshot();
                let unique: HashSet<_> = snapshot.iter().map(|r| r.id.clone()).collect();
                assert_eq!(unique.len(), snapshot.len());
                assert!(snapshot.len() <= 1);
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();
}

#[test]
fn test_remove_commutes_with_itself() {
    let a = MetricStateStore::new();
    let b = MetricStateStore::new();
    let r = record("pr", StatusLabel::Succeeded);
    let id = r.id.clone();

    a.upsert(&id, r.clone()).unwrap();
    b.upsert(&id, r).unwrap();

    a.remove(&id);
    b.remove(&id);
    b.remove(&id);

    assert_eq!(a.snapshot(), b.snapshot());
}
