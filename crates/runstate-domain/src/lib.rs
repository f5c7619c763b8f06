//! runstate Domain Layer
//!
//! Core model for PipelineRun status reporting. This crate has ZERO external
//! dependencies and holds the value types and the pure status classifier that
//! every other layer depends upon.
//!
//! ## Key Concepts
//!
//! - **EntityId**: `(namespace, name)` key of a watched PipelineRun
//! - **PipelineRunSnapshot**: read-only view with conditions, pending flag,
//!   deletion timestamp and params
//! - **StatusLabel**: the one active lifecycle phase per entity
//! - **StatusTaxonomy**: the closed list of values rendered as a state-set
//! - **Classifier**: snapshot → status label + auxiliary labels

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classifier;
pub mod identity;
pub mod snapshot;
pub mod status;

// Re-exports for convenience
pub use classifier::{classify, AuxLabels, Classification, Classifier};
pub use identity::EntityId;
pub use snapshot::{Condition, ConditionStatus, Param, ParamValue, PipelineRunSnapshot};
pub use status::{StatusLabel, StatusTaxonomy};
