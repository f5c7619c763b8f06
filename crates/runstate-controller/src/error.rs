//! Error types for controller and collector operations

use crate::source::SourceError;
use runstate_store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while reconciling or collecting
#[derive(Error, Debug)]
pub enum ControllerError {
    /// Listing, fetching or watching entities failed
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// A call to the entity source did not finish in time
    #[error("Source call timed out after {0:?}")]
    Timeout(Duration),

    /// One entity could not be decoded into a snapshot
    #[error("Malformed snapshot{}: {reason}", .entity.as_ref().map(|e| format!(" for {}", e)).unwrap_or_default())]
    MalformedSnapshot {
        /// Identity, when it could be recovered from the payload
        entity: Option<String>,
        /// What was wrong with it
        reason: String,
    },

    /// Storage layer error
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Worker error (tokio runtime issues)
    #[error("Worker error: {0}")]
    Worker(String),
}

impl ControllerError {
    /// Whether retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ControllerError::Source(_) | ControllerError::Timeout(_))
    }

    pub(crate) fn malformed(entity: Option<String>, reason: impl Into<String>) -> Self {
        ControllerError::MalformedSnapshot {
            entity,
            reason: reason.into(),
        }
    }
}
