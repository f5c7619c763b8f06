//! Lifecycle event router - reconciles observe and deletion signals into the store
//!
//! The router is the only writer of the [`MetricStateStore`]. It owns the
//! per-identity phase table (see [`crate::phase`]) and serializes all work
//! for one identity behind an async lock, so an older signal can never
//! overwrite the result of a newer one. Different identities proceed
//! concurrently.

use crate::decode::decode_pipeline_run;
use crate::metrics::ControllerMetrics;
use crate::phase::{transition, Action, EntityPhase, PhaseState, Signal};
use crate::source::EntitySource;
use crate::ControllerError;
use runstate_domain::{Classifier, EntityId, PipelineRunSnapshot, StatusLabel};
use runstate_store::{MetricRecord, MetricStateStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{timeout, Instant};

/// Result of applying one signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Record written with a new or changed label
    Updated(StatusLabel),

    /// Record rewritten with the label it already had
    Unchanged,

    /// Record removed
    Removed,

    /// Record removed by a removal older than the observe that wrote it.
    /// The identity should be fetched again to restore its record.
    Superseded,

    /// Removal applied but there was no record
    AlreadyAbsent,

    /// Signal was older than the last one applied; ignored
    Discarded,
}

#[derive(Debug, Clone, Copy)]
struct PhaseEntry {
    state: PhaseState,
    since: Instant,
}

/// Async lock per identity, dropped from the table once nobody holds it
#[derive(Debug, Default)]
struct IdentityLocks {
    locks: Mutex<HashMap<EntityId, Arc<tokio::sync::Mutex<()>>>>,
}

impl IdentityLocks {
    fn table(&self) -> MutexGuard<'_, HashMap<EntityId, Arc<tokio::sync::Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire(&self, id: &EntityId) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.table().entry(id.clone()).or_default())
    }

    fn release(&self, id: &EntityId, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut table = self.table();
        // Table entry plus ours: nobody else is waiting.
        if Arc::strong_count(&lock) == 2 {
            table.remove(id);
        }
    }

    fn len(&self) -> usize {
        self.table().len()
    }
}

/// Drives store updates and removals from lifecycle signals
#[derive(Debug)]
pub struct LifecycleRouter {
    store: Arc<MetricStateStore>,
    classifier: Classifier,
    metrics: Arc<ControllerMetrics>,
    phases: Mutex<HashMap<EntityId, PhaseEntry>>,
    locks: IdentityLocks,
    seq: AtomicU64,
    synced: AtomicBool,
    tombstone_ttl: Duration,
}

impl LifecycleRouter {
    /// Create a router writing into `store`
    pub fn new(store: Arc<MetricStateStore>, classifier: Classifier, tombstone_ttl: Duration) -> Self {
        Self {
            store,
            classifier,
            metrics: Arc::new(ControllerMetrics::new()),
            phases: Mutex::new(HashMap::new()),
            locks: IdentityLocks::default(),
            seq: AtomicU64::new(0),
            synced: AtomicBool::new(false),
            tombstone_ttl,
        }
    }

    /// The store this router writes to
    pub fn store(&self) -> &Arc<MetricStateStore> {
        &self.store
    }

    /// Controller self-metrics
    pub fn metrics(&self) -> &Arc<ControllerMetrics> {
        &self.metrics
    }

    /// Allocate the next dispatch sequence number
    ///
    /// Call this when a signal is received, before any asynchronous work, so
    /// sequence order matches arrival order.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Mark that a full listing has been applied
    pub fn mark_synced(&self) {
        if !self.synced.swap(true, Ordering::AcqRel) {
            tracing::info!("Initial sync complete, store is authoritative");
        }
    }

    /// Whether the store reflects at least one complete listing
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    fn phase_table(&self) -> MutexGuard<'_, HashMap<EntityId, PhaseEntry>> {
        self.phases.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current phase of an identity (`None` = absent)
    pub fn phase(&self, id: &EntityId) -> Option<EntityPhase> {
        self.phase_table().get(id).map(|e| e.state.phase)
    }

    /// Identities that exist as far as the router knows (active or terminating)
    pub fn tracked(&self) -> Vec<EntityId> {
        self.phase_table()
            .iter()
            .filter(|(_, e)| e.state.phase != EntityPhase::Gone)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Number of identities with an entry in the phase table
    pub fn phase_count(&self) -> usize {
        self.phase_table().len()
    }

    /// Number of identity locks currently allocated
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Drop tombstones and terminating markers older than the TTL
    ///
    /// Returns how many entries were pruned. Terminating entries that expire
    /// are forgotten; if the entity still exists, the next observe recreates
    /// it as usual.
    pub fn prune(&self, now: Instant) -> usize {
        let ttl = self.tombstone_ttl;
        let mut phases = self.phase_table();
        let before = phases.len();
        phases.retain(|_, e| {
            e.state.phase == EntityPhase::Active || now.saturating_duration_since(e.since) < ttl
        });
        before - phases.len()
    }

    /// Apply an observed snapshot dispatched at `seq`
    ///
    /// A snapshot with a deletion timestamp is a soft delete. Anything else
    /// is reclassified in full and replaces the stored record.
    ///
    /// # Errors
    /// Returns [`ControllerError::Store`] if the store rejects the record
    pub async fn observe(
        &self,
        snapshot: PipelineRunSnapshot,
        seq: u64,
    ) -> Result<Outcome, ControllerError> {
        let id = snapshot.id.clone();
        let lock = self.locks.acquire(&id);
        let result = {
            let _guard = lock.lock().await;
            self.apply_observe(snapshot, seq)
        };
        self.locks.release(&id, lock);
        result
    }

    /// Apply a not-found signal dispatched at `seq`
    ///
    /// Keyed by identity only. Tolerates an identity that was never seen.
    pub async fn not_found(&self, id: &EntityId, seq: u64) -> Outcome {
        let lock = self.locks.acquire(id);
        let outcome = {
            let _guard = lock.lock().await;
            self.apply_removal(id, Signal::HardDelete, seq)
        };
        self.locks.release(id, lock);
        outcome
    }

    /// Decode a raw payload and apply it as an observe
    ///
    /// # Errors
    /// Returns [`ControllerError::MalformedSnapshot`] without touching the
    /// store if the payload cannot be decoded
    pub async fn observe_raw(
        &self,
        value: &serde_json::Value,
        seq: u64,
    ) -> Result<Outcome, ControllerError> {
        let snapshot = decode_pipeline_run(value).inspect_err(|e| {
            self.metrics.record_malformed();
            tracing::warn!("Skipping entity: {}", e);
        })?;
        self.observe(snapshot, seq).await
    }

    /// Reconcile one identity by fetching its current state
    ///
    /// Holds the identity lock across the fetch, so at most one
    /// reconciliation per identity is in flight. The sequence number is
    /// taken once the lock is held: the fetched state is newer than any
    /// signal dispatched before.
    ///
    /// # Errors
    /// A failed or timed-out fetch returns a transient error and leaves the
    /// store untouched. A malformed body returns
    /// [`ControllerError::MalformedSnapshot`], also without touching the store.
    pub async fn reconcile<S: EntitySource>(
        &self,
        source: &S,
        id: &EntityId,
        call_timeout: Duration,
    ) -> Result<Outcome, ControllerError> {
        let lock = self.locks.acquire(id);
        let result = {
            let _guard = lock.lock().await;
            let seq = self.next_seq();
            self.fetch_and_apply(source, id, seq, call_timeout).await
        };
        self.locks.release(id, lock);
        result
    }

    async fn fetch_and_apply<S: EntitySource>(
        &self,
        source: &S,
        id: &EntityId,
        seq: u64,
        call_timeout: Duration,
    ) -> Result<Outcome, ControllerError> {
        let fetched = match timeout(call_timeout, source.get(id)).await {
            Ok(Ok(fetched)) => fetched,
            Ok(Err(e)) => {
                self.metrics.record_transient_failure();
                return Err(e.into());
            }
            Err(_) => {
                self.metrics.record_transient_failure();
                return Err(ControllerError::Timeout(call_timeout));
            }
        };

        match fetched {
            None => {
                tracing::info!(entity = %id, "PipelineRun not found, deleting metrics");
                Ok(self.apply_removal(id, Signal::HardDelete, seq))
            }
            Some(value) => {
                let snapshot = decode_pipeline_run(&value).inspect_err(|e| {
                    self.metrics.record_malformed();
                    tracing::warn!("Skipping entity: {}", e);
                })?;
                if snapshot.id != *id {
                    self.metrics.record_malformed();
                    return Err(ControllerError::MalformedSnapshot {
                        entity: Some(id.to_string()),
                        reason: format!("source returned {} for {}", snapshot.id, id),
                    });
                }
                self.apply_observe(snapshot, seq)
            }
        }
    }

    // Caller holds the identity lock.
    fn apply_observe(
        &self,
        snapshot: PipelineRunSnapshot,
        seq: u64,
    ) -> Result<Outcome, ControllerError> {
        self.metrics.record_observed();

        if snapshot.is_terminating() {
            tracing::info!(entity = %snapshot.id, "PipelineRun is deleting, removing metrics");
            return Ok(self.apply_removal(&snapshot.id, Signal::SoftDelete, seq));
        }

        let id = snapshot.id.clone();
        let mut phases = self.phase_table();
        let current = phases.get(&id).map(|e| e.state);
        let step = transition(current, Signal::Observe, seq);

        if step.action == Action::Discard {
            self.metrics.record_discarded();
            tracing::debug!(entity = %id, seq, "Discarding stale observe");
            return Ok(Outcome::Discarded);
        }

        let classification = self.classifier.classify(&snapshot);
        let status = classification.status.clone();
        let previous = self
            .store
            .upsert(&id, MetricRecord::from_classification(id.clone(), classification))?;
        self.metrics.record_upsert();

        phases.insert(
            id.clone(),
            PhaseEntry {
                state: step.next,
                since: Instant::now(),
            },
        );

        let outcome = match previous {
            Some(prev) if prev.status == status => Outcome::Unchanged,
            _ => {
                tracing::debug!(entity = %id, status = %status, "Updated status metric");
                Outcome::Updated(status)
            }
        };
        Ok(outcome)
    }

    // Caller holds the identity lock.
    fn apply_removal(&self, id: &EntityId, signal: Signal, seq: u64) -> Outcome {
        let mut phases = self.phase_table();
        let current = phases.get(id).map(|e| e.state);
        let step = transition(current, signal, seq);
        let superseded =
            current.is_some_and(|c| seq < c.seq && c.phase == EntityPhase::Active);

        let removed = self.store.remove(id).is_some();
        self.metrics.record_removal();

        if current != Some(step.next) {
            phases.insert(
                id.clone(),
                PhaseEntry {
                    state: step.next,
                    since: Instant::now(),
                },
            );
        }

        match (removed, superseded) {
            (true, true) => {
                tracing::debug!(entity = %id, seq, "Stale removal cleared a newer record");
                Outcome::Superseded
            }
            (true, false) => Outcome::Removed,
            (false, _) => Outcome::AlreadyAbsent,
        }
    }
}
