//! runstate Storage Layer
//!
//! Holds the current metric record for every live PipelineRun.
//!
//! # Architecture
//!
//! - One [`MetricRecord`] per [`EntityId`]: the single active status label
//!   plus auxiliary labels. The zero-valued rows of the state-set are never
//!   stored; exposition synthesizes them from the one active label.
//! - `RwLock<HashMap>` keeps `upsert`/`remove` O(1) and lets any number of
//!   scrapes take point-in-time snapshots concurrently with writers.
//! - The store is an explicitly constructed component: empty at startup,
//!   shared through `Arc`, discarded on exit.
//!
//! # Examples
//!
//! ```
//! use runstate_domain::{AuxLabels, EntityId, StatusLabel};
//! use runstate_store::{MetricRecord, MetricStateStore};
//!
//! let store = MetricStateStore::new();
//! let id = EntityId::new("build", "pr-1");
//! store.upsert(&id, MetricRecord::new(id.clone(), StatusLabel::Running, AuxLabels::default())).unwrap();
//! assert_eq!(store.len(), 1);
//!
//! store.remove(&id);
//! store.remove(&id); // no-op
//! assert!(store.is_empty());
//! ```

#![warn(missing_docs)]

mod record;
mod state_store;

pub use record::MetricRecord;
pub use state_store::MetricStateStore;

use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// Record keyed under a different identity than it describes
    #[error("Identity mismatch: key {key} does not match record {record}")]
    IdentityMismatch {
        /// Identity used as the store key
        key: String,
        /// Identity carried by the record
        record: String,
    },
}
