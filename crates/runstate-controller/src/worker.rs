//! Background worker for continuous reactive operation

use crate::decode::{decode_pipeline_run, identity_of};
use crate::metrics::MetricsSnapshot;
use crate::router::{LifecycleRouter, Outcome};
use crate::source::{EntitySource, WatchEvent};
use crate::{ControllerConfig, ControllerError};
use runstate_domain::{Classifier, EntityId};
use runstate_store::MetricStateStore;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};

/// Summary of one resync cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResyncReport {
    /// Entities returned by the listing
    pub listed: usize,

    /// Entities applied as observes
    pub observed: usize,

    /// Entities skipped as malformed
    pub malformed: usize,

    /// Tracked identities missing from the listing, reconciled by lookup
    pub missing: usize,

    /// Phase-table entries pruned
    pub pruned: usize,
}

/// Background worker that keeps the metric state store in sync with the source
///
/// Consumes the watch stream as it arrives and runs a full resync at every
/// reconcile interval. Resync is the backstop that catches missed watch
/// deliveries, including deletions that happened while the worker was down.
///
/// # Examples
///
/// ```no_run
/// use runstate_controller::{ControllerConfig, ControllerWorker, MemorySource};
/// use runstate_store::MetricStateStore;
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let (source, events) = MemorySource::with_watch(64);
///     let store = Arc::new(MetricStateStore::new());
///     let worker = ControllerWorker::new(ControllerConfig::default(), Arc::new(source), store)?;
///
///     // Run indefinitely (until Ctrl+C)
///     worker.run(events).await?;
///     Ok(())
/// }
/// ```
pub struct ControllerWorker<S: EntitySource> {
    router: Arc<LifecycleRouter>,
    source: Arc<S>,
    config: ControllerConfig,
    reconciling: Arc<Mutex<HashSet<EntityId>>>,
}

impl<S: EntitySource> ControllerWorker<S> {
    /// Create a worker with the default classifier
    ///
    /// # Errors
    /// Returns [`ControllerError::Config`] if the configuration is invalid
    pub fn new(
        config: ControllerConfig,
        source: Arc<S>,
        store: Arc<MetricStateStore>,
    ) -> Result<Self, ControllerError> {
        Self::with_classifier(config, source, store, Classifier::default())
    }

    /// Create a worker with a custom classifier
    ///
    /// # Errors
    /// Returns [`ControllerError::Config`] if the configuration is invalid
    pub fn with_classifier(
        config: ControllerConfig,
        source: Arc<S>,
        store: Arc<MetricStateStore>,
        classifier: Classifier,
    ) -> Result<Self, ControllerError> {
        config.validate()?;
        let router = LifecycleRouter::new(store, classifier, config.tombstone_ttl());
        Ok(Self {
            router: Arc::new(router),
            source,
            config,
            reconciling: Arc::default(),
        })
    }

    /// The router driven by this worker
    pub fn router(&self) -> &Arc<LifecycleRouter> {
        &self.router
    }

    /// Current self-metrics
    pub fn metrics(&self) -> MetricsSnapshot {
        self.router.metrics().snapshot()
    }

    /// List every entity once and bring the store in line with it
    ///
    /// Listed entities are applied as observes. Tracked identities missing
    /// from the listing get one lookup each, run concurrently and bounded by
    /// the source timeout, which ends in not-found cleanup when they are gone.
    /// Inside [`run_until`](Self::run_until) those lookups are spawned with
    /// retries instead, so the event loop never waits on them.
    ///
    /// # Errors
    /// If the listing fails or times out the cycle aborts and the store is
    /// left exactly as it was.
    pub async fn resync(&self) -> Result<ResyncReport, ControllerError> {
        let (mut report, missing) = self.list_and_observe().await?;

        let mut lookups = JoinSet::new();
        for id in missing {
            let router = Arc::clone(&self.router);
            let source = Arc::clone(&self.source);
            let call_timeout = self.config.source_timeout();
            lookups.spawn(async move {
                if let Err(e) = router.reconcile(&*source, &id, call_timeout).await {
                    tracing::warn!(entity = %id, "Reconcile of missing entity failed: {}", e);
                }
            });
        }
        while lookups.join_next().await.is_some() {}

        report.pruned = self.finish_resync();
        Ok(report)
    }

    /// Resync with the missing-identity lookups spawned onto `tasks`
    async fn resync_into(&self, tasks: &mut JoinSet<()>) -> Result<ResyncReport, ControllerError> {
        let (mut report, missing) = self.list_and_observe().await?;
        for id in missing {
            self.spawn_reconcile(id, tasks);
        }
        report.pruned = self.finish_resync();
        Ok(report)
    }

    /// List, apply every listed entity, and return the tracked identities the
    /// listing no longer contains
    async fn list_and_observe(&self) -> Result<(ResyncReport, Vec<EntityId>), ControllerError> {
        let call_timeout = self.config.source_timeout();
        let values = match timeout(call_timeout, self.source.list()).await {
            Ok(Ok(values)) => values,
            Ok(Err(e)) => {
                self.router.metrics().record_transient_failure();
                return Err(e.into());
            }
            Err(_) => {
                self.router.metrics().record_transient_failure();
                return Err(ControllerError::Timeout(call_timeout));
            }
        };

        let mut report = ResyncReport {
            listed: values.len(),
            ..Default::default()
        };
        let mut listed: HashSet<EntityId> = HashSet::with_capacity(values.len());

        for value in &values {
            match decode_pipeline_run(value) {
                Ok(snapshot) => {
                    listed.insert(snapshot.id.clone());
                    let seq = self.router.next_seq();
                    self.router.observe(snapshot, seq).await?;
                    report.observed += 1;
                }
                Err(e) => {
                    // Still present in the source, just unreadable: keep its
                    // current record rather than treating it as missing.
                    if let Some(id) = identity_of(value) {
                        listed.insert(id);
                    }
                    self.router.metrics().record_malformed();
                    report.malformed += 1;
                    tracing::warn!("Skipping entity during resync: {}", e);
                }
            }
        }

        let missing: Vec<EntityId> = self
            .router
            .tracked()
            .into_iter()
            .filter(|id| !listed.contains(id))
            .collect();
        report.missing = missing.len();
        Ok((report, missing))
    }

    fn finish_resync(&self) -> usize {
        let pruned = self.router.prune(Instant::now());
        self.router.mark_synced();
        self.router.metrics().record_resync();
        pruned
    }

    /// Spawn a retrying reconcile for `id` unless one is already in flight
    fn spawn_reconcile(&self, id: EntityId, tasks: &mut JoinSet<()>) {
        if !self.reconciling().insert(id.clone()) {
            tracing::debug!(entity = %id, "Reconcile already in flight");
            return;
        }
        let router = Arc::clone(&self.router);
        let source = Arc::clone(&self.source);
        let config = self.config.clone();
        let reconciling = Arc::clone(&self.reconciling);
        tasks.spawn(async move {
            if let Err(e) = reconcile_with_retry(&router, &*source, &id, &config).await {
                tracing::error!(entity = %id, "Reconcile failed: {}", e);
            }
            reconciling
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
        });
    }

    fn reconciling(&self) -> MutexGuard<'_, HashSet<EntityId>> {
        self.reconciling.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Dispatch one watch event onto the task set
    ///
    /// The sequence number is taken here, at arrival, so a later event for the
    /// same identity always wins over an earlier one still in flight.
    fn dispatch(&self, event: WatchEvent, tasks: &mut JoinSet<()>) {
        let seq = self.router.next_seq();
        let router = Arc::clone(&self.router);
        let source = Arc::clone(&self.source);
        let config = self.config.clone();

        match event {
            WatchEvent::Applied(value) => {
                let snapshot = match decode_pipeline_run(&value) {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        router.metrics().record_malformed();
                        tracing::warn!("Skipping watch event: {}", e);
                        return;
                    }
                };
                let id = snapshot.id.clone();
                tasks.spawn(async move {
                    match router.observe(snapshot, seq).await {
                        Ok(Outcome::Superseded) => {
                            refetch_superseded(&router, &*source, &id, &config).await
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!("Observe failed: {}", e),
                    }
                });
            }
            WatchEvent::Deleted(value) => {
                let Some(id) = identity_of(&value) else {
                    router.metrics().record_malformed();
                    tracing::warn!("Skipping delete event without identity");
                    return;
                };
                tasks.spawn(async move {
                    if router.not_found(&id, seq).await == Outcome::Superseded {
                        refetch_superseded(&router, &*source, &id, &config).await;
                    }
                });
            }
            WatchEvent::Reconcile(id) => self.spawn_reconcile(id, tasks),
        }
    }

    /// Run the worker until Ctrl+C
    ///
    /// # Errors
    /// Returns an error only for unrecoverable worker failures; individual
    /// reconciliation and resync failures are logged and retried.
    pub async fn run(&self, events: mpsc::Receiver<WatchEvent>) -> Result<(), ControllerError> {
        self.run_until(events, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received, stopping controller");
        })
        .await
    }

    /// Run the worker until `shutdown` completes
    ///
    /// # Errors
    /// Returns [`ControllerError::Worker`] if a spawned task panicked
    pub async fn run_until<F>(
        &self,
        mut events: mpsc::Receiver<WatchEvent>,
        shutdown: F,
    ) -> Result<(), ControllerError>
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(self.config.reconcile_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut watching = true;
        let mut panicked = 0usize;
        tokio::pin!(shutdown);

        tracing::info!(
            "Controller worker started (interval: {:?})",
            self.config.reconcile_interval()
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    tracing::debug!("Starting resync cycle");
                    let result = tokio::select! {
                        _ = &mut shutdown => break,
                        result = self.resync_into(&mut tasks) => result,
                    };
                    match result {
                        Ok(report) => tracing::info!(
                            "Resync completed: {} listed, {} malformed, {} missing, {} pruned",
                            report.listed,
                            report.malformed,
                            report.missing,
                            report.pruned
                        ),
                        Err(e) => tracing::error!("Resync failed, keeping existing state: {}", e),
                    }
                }
                event = events.recv(), if watching => match event {
                    Some(event) => self.dispatch(event, &mut tasks),
                    None => {
                        watching = false;
                        tracing::warn!("Watch stream closed, relying on periodic resync");
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        panicked += 1;
                        tracing::error!("Reconcile task failed: {}", e);
                    }
                }
            }
        }

        // Lookups still waiting on the source are abandoned at shutdown.
        tasks.abort_all();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Err(e) if e.is_panic() => {
                    panicked += 1;
                    tracing::error!("Reconcile task failed: {}", e);
                }
                _ => {}
            }
        }

        tracing::info!("Controller stopped. Final metrics:\n{}", self.metrics().summary());

        if panicked > 0 {
            return Err(ControllerError::Worker(format!(
                "{} reconcile task(s) panicked",
                panicked
            )));
        }
        Ok(())
    }

    /// Run for a specific number of resync cycles (useful for testing)
    ///
    /// # Errors
    /// Returns the first resync error
    pub async fn run_cycles(&self, cycles: usize) -> Result<(), ControllerError> {
        let mut ticker = interval(self.config.reconcile_interval());

        for cycle in 0..cycles {
            ticker.tick().await;
            tracing::debug!("Starting resync cycle {}/{}", cycle + 1, cycles);
            let report = self.resync().await.inspect_err(|e| {
                tracing::error!("Resync {}/{} failed: {}", cycle + 1, cycles, e);
            })?;
            tracing::info!(
                "Resync {}/{} completed: {} listed, {} missing",
                cycle + 1,
                cycles,
                report.listed,
                report.missing
            );
        }

        Ok(())
    }
}

/// Look an identity up again after a stale removal cleared its record
async fn refetch_superseded<S: EntitySource>(
    router: &LifecycleRouter,
    source: &S,
    id: &EntityId,
    config: &ControllerConfig,
) {
    tracing::info!(entity = %id, "Stale removal cleared a newer record, fetching again");
    if let Err(e) = reconcile_with_retry(router, source, id, config).await {
        tracing::error!(entity = %id, "Reconcile failed: {}", e);
    }
}

/// Reconcile by lookup, retrying transient failures with exponential backoff
async fn reconcile_with_retry<S: EntitySource>(
    router: &LifecycleRouter,
    source: &S,
    id: &EntityId,
    config: &ControllerConfig,
) -> Result<Outcome, ControllerError> {
    let mut attempt = 0;
    loop {
        match router.reconcile(source, id, config.source_timeout()).await {
            Err(e) if e.is_transient() && attempt < config.max_retries => {
                let delay = config.retry_delay(attempt);
                router.metrics().record_retry();
                tracing::warn!(entity = %id, "Reconcile failed ({}), retrying in {:?}", e, delay);
                sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}
