//! runstate Exporter
//!
//! Serves the PipelineRun status state-set over HTTP. In pull mode every
//! scrape lists the cluster; in reactive mode a controller worker keeps a
//! store current from the watch stream and periodic resync, and scrapes read
//! the store.
//!
//! | Endpoint | Response |
//! |----------|----------|
//! | `GET /metrics` | Prometheus text, 503 with a JSON error when collection fails or before the first reactive resync |
//! | `GET /health` | JSON `{ status, mode, records, controller }` |

#![warn(missing_docs)]

pub mod config;
pub mod exposition;
pub mod handlers;
pub mod kube_source;

use config::{ExporterConfig, Mode};
use handlers::{create_router, AppState, Backend};
use kube_source::KubeApiSource;
use runstate_controller::{
    ControllerError, ControllerWorker, EntitySource, PullCollector, SourceError, WatchEvent,
};
use runstate_store::MetricStateStore;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::info;

/// Capacity of the watch event channel
const WATCH_CHANNEL_CAPACITY: usize = 1024;

/// Exporter error
#[derive(Debug, thiserror::Error)]
pub enum ExporterError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Entity source could not be set up
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Controller or collector error
    #[error("Controller error: {0}")]
    Controller(#[from] ControllerError),

    /// Server binding error
    #[error("Failed to bind server: {0}")]
    Bind(#[from] std::io::Error),

    /// Server error
    #[error("Server error: {0}")]
    Server(String),
}

/// Start the exporter against the configured Kubernetes API server
///
/// Runs until Ctrl+C.
pub async fn start_server(config: ExporterConfig) -> Result<(), ExporterError> {
    config.validate()?;

    info!("Starting runstate exporter");
    info!("Bind address: {}", config.bind_addr());
    info!("Mode: {}", config.mode);
    info!("Metric: {}", config.metrics.metric_name);

    let source = Arc::new(KubeApiSource::from_config(&config.source)?);
    let listener = TcpListener::bind(&config.bind_addr()).await?;

    let (events_tx, events_rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
    let watcher = match config.mode {
        Mode::Reactive => {
            let source = Arc::clone(&source);
            Some(tokio::spawn(async move { source.watch(events_tx).await }))
        }
        Mode::Pull => None,
    };

    let result = serve(&config, source, events_rx, listener, shutdown_signal()).await;

    if let Some(watcher) = watcher {
        watcher.abort();
    }
    result
}

/// Serve metrics from `source` on `listener` until `shutdown` completes
///
/// In reactive mode a [`ControllerWorker`] consumes `events`; in pull mode
/// they are ignored. Both the server and the worker stop gracefully.
pub async fn serve<S, F>(
    config: &ExporterConfig,
    source: Arc<S>,
    events: mpsc::Receiver<WatchEvent>,
    listener: TcpListener,
    shutdown: F,
) -> Result<(), ExporterError>
where
    S: EntitySource,
    F: Future<Output = ()> + Send + 'static,
{
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown.await;
        let _ = stop_tx.send(true);
    });

    let classifier = config.metrics.classifier();
    let mut worker_task = None;

    let backend = match config.mode {
        Mode::Reactive => {
            let worker = ControllerWorker::with_classifier(
                config.controller.clone(),
                source,
                Arc::new(MetricStateStore::new()),
                classifier,
            )?;
            let router = Arc::clone(worker.router());
            let mut stop = stop_rx.clone();
            worker_task = Some(tokio::spawn(async move {
                worker
                    .run_until(events, async move {
                        let _ = stop.wait_for(|stopped| *stopped).await;
                    })
                    .await
            }));
            Backend::Reactive(router)
        }
        Mode::Pull => {
            let collector = PullCollector::new(source, classifier, config.collector.clone())?;
            Backend::Pull(Arc::new(collector))
        }
    };

    let state = AppState {
        backend,
        taxonomy: Arc::new(config.metrics.status_taxonomy()),
        metric_name: Arc::from(config.metrics.metric_name.as_str()),
    };
    let app = create_router(state);

    info!("Exporter listening on {}", listener.local_addr()?);

    let mut stop = stop_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = stop.wait_for(|stopped| *stopped).await;
        })
        .await
        .map_err(|e| ExporterError::Server(e.to_string()))?;

    if let Some(task) = worker_task {
        task.await
            .map_err(|e| ExporterError::Server(format!("Controller task failed: {}", e)))??;
    }

    info!("Exporter stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
