//! HTTP request handlers for the exporter.
//!
//! Serves the state-set metric and a health check using axum.

use crate::config::Mode;
use crate::exposition::{self, ExpositionError};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router as AxumRouter,
};
use runstate_controller::{
    ControllerError, EntitySource, LifecycleRouter, MetricsSnapshot, PullCollector,
};
use runstate_domain::StatusTaxonomy;
use serde::Serialize;
use std::sync::Arc;

/// Where scrapes read records from
pub enum Backend<S: EntitySource> {
    /// Store maintained by the controller worker, read through its router
    Reactive(Arc<LifecycleRouter>),

    /// Fresh listing per scrape
    Pull(Arc<PullCollector<S>>),
}

impl<S: EntitySource> Clone for Backend<S> {
    fn clone(&self) -> Self {
        match self {
            Backend::Reactive(router) => Backend::Reactive(Arc::clone(router)),
            Backend::Pull(collector) => Backend::Pull(Arc::clone(collector)),
        }
    }
}

impl<S: EntitySource> Backend<S> {
    /// Mode this backend serves
    pub fn mode(&self) -> Mode {
        match self {
            Backend::Reactive(_) => Mode::Reactive,
            Backend::Pull(_) => Mode::Pull,
        }
    }
}

/// Shared application state
pub struct AppState<S: EntitySource> {
    /// Record backend
    pub backend: Backend<S>,
    /// Status labels emitted for every entity
    pub taxonomy: Arc<StatusTaxonomy>,
    /// Exposed metric name
    pub metric_name: Arc<str>,
}

impl<S: EntitySource> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            taxonomy: Arc::clone(&self.taxonomy),
            metric_name: Arc::clone(&self.metric_name),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    /// Overall health status
    pub status: String,
    /// Operating mode
    pub mode: Mode,
    /// Records currently stored (reactive mode only)
    pub records: Option<usize>,
    /// Controller or collector counters
    pub controller: MetricsSnapshot,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    /// Reactive store has not completed its first resync
    NotReady,
    /// Records could not be collected for this scrape
    Collect(ControllerError),
    /// Records could not be encoded
    Exposition(ExpositionError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotReady => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Initial sync in progress".to_string(),
            ),
            AppError::Collect(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
            AppError::Exposition(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        if status == StatusCode::SERVICE_UNAVAILABLE {
            tracing::warn!("Scrape unavailable: {}", message);
        } else {
            tracing::error!("Scrape failed: {}", message);
        }
        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}

impl From<ControllerError> for AppError {
    fn from(e: ControllerError) -> Self {
        AppError::Collect(e)
    }
}

impl From<ExpositionError> for AppError {
    fn from(e: ExpositionError) -> Self {
        AppError::Exposition(e)
    }
}

/// GET /metrics - Prometheus text exposition of the state-set
async fn metrics_handler<S: EntitySource>(
    State(state): State<AppState<S>>,
) -> Result<Response, AppError> {
    let samples = match &state.backend {
        Backend::Reactive(router) => {
            if !router.is_synced() {
                return Err(AppError::NotReady);
            }
            exposition::render(&router.store().snapshot(), &state.taxonomy)
        }
        Backend::Pull(collector) => {
            let records = collector.collect().await?;
            exposition::render(&records, &state.taxonomy)
        }
    };

    let body = exposition::encode(&samples, &state.metric_name)?;
    Ok(([(header::CONTENT_TYPE, exposition::content_type())], body).into_response())
}

/// GET /health - Liveness and counters
async fn health_check<S: EntitySource>(
    State(state): State<AppState<S>>,
) -> Json<HealthCheckResponse> {
    let (status, records, controller) = match &state.backend {
        Backend::Reactive(router) => {
            let status = if router.is_synced() { "healthy" } else { "syncing" };
            (status, Some(router.store().len()), router.metrics().snapshot())
        }
        Backend::Pull(collector) => ("healthy", None, collector.metrics().snapshot()),
    };

    Json(HealthCheckResponse {
        status: status.to_string(),
        mode: state.backend.mode(),
        records,
        controller,
    })
}

/// Create the axum router with all routes
pub fn create_router<S: EntitySource>(state: AppState<S>) -> AxumRouter {
    AxumRouter::new()
        .route("/metrics", get(metrics_handler::<S>))
        .route("/health", get(health_check::<S>))
        .with_state(state)
}
