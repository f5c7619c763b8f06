//! runstate Controller
//!
//! Keeps PipelineRun status metrics in line with the cluster, in one of two
//! modes.
//!
//! # Overview
//!
//! - **Reactive mode**: [`ControllerWorker`] consumes the watch stream and a
//!   periodic full resync, and feeds every lifecycle signal through the
//!   [`LifecycleRouter`] into a shared [`runstate_store::MetricStateStore`].
//! - **Pull mode**: [`PullCollector`] lists every PipelineRun at scrape time
//!   and classifies the listing directly. There is no store and so nothing
//!   to clean up.
//!
//! # Lifecycle signals
//!
//! | Signal | Source | Store effect |
//! |--------|--------|--------------|
//! | Observe | watch apply, lookup, resync listing | replace the record |
//! | Soft delete | observe with a deletion timestamp | remove the record |
//! | Hard delete | watch delete, lookup not found, missing from resync | remove the record |
//!
//! Removals are idempotent and always win over older observes still in
//! flight for the same identity; see [`phase`] for the state machine.
//!
//! # Usage
//!
//! ## Reactive
//!
//! ```no_run
//! use runstate_controller::{ControllerConfig, ControllerWorker, MemorySource};
//! use runstate_store::MetricStateStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (source, events) = MemorySource::with_watch(256);
//!     let store = Arc::new(MetricStateStore::new());
//!     let worker = ControllerWorker::new(ControllerConfig::default(), Arc::new(source), store)?;
//!
//!     // Run indefinitely (until Ctrl+C)
//!     worker.run(events).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Pull
//!
//! ```
//! use runstate_controller::{CollectorConfig, MemorySource, PullCollector};
//! use runstate_domain::Classifier;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let source = MemorySource::new();
//! source.apply(json!({ "metadata": { "namespace": "ci", "name": "pr-1" } }))?;
//!
//! let collector = PullCollector::new(Arc::new(source), Classifier::default(), CollectorConfig::default())?;
//! let records = collector.collect().await?;
//! assert_eq!(records.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! ```toml
//! [controller]
//! reconcile_interval_secs = 30
//! source_timeout_secs = 10
//! tombstone_ttl_secs = 300
//! retry_base_millis = 500
//! retry_max_secs = 60
//! max_retries = 5
//!
//! [collector]
//! cache_max_age_secs = 5
//! source_timeout_secs = 10
//! ```

#![warn(missing_docs)]

mod collector;
mod config;
pub mod decode;
mod error;
mod metrics;
pub mod phase;
mod router;
mod source;
mod worker;

pub use collector::PullCollector;
pub use config::{CollectorConfig, ControllerConfig};
pub use error::ControllerError;
pub use metrics::{ControllerMetrics, MetricsSnapshot};
pub use phase::EntityPhase;
pub use router::{LifecycleRouter, Outcome};
pub use source::{EntitySource, MemorySource, SourceError, WatchEvent};
pub use worker::{ControllerWorker, ResyncReport};
