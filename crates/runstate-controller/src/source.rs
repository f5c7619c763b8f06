//! Entity source boundary
//!
//! The controller consumes three operations from the cluster side: a full
//! listing, a lookup by identity (`Ok(None)` is the not-found signal) and a
//! watch stream of [`WatchEvent`]s delivered over a tokio channel. Payloads
//! stay raw JSON until [`crate::decode`] turns them into snapshots, so a
//! malformed entity is an error for that entity only.

use crate::decode;
use runstate_domain::EntityId;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors reported by an entity source
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Request could not be sent or completed
    #[error("Request failed: {0}")]
    Request(String),

    /// Response arrived but was not usable
    #[error("Unexpected response: {0}")]
    Response(String),
}

/// A change notification from the watch stream
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// Entity created or updated; carries its current body
    Applied(Value),

    /// Entity removed from the source of truth; carries its last known body
    Deleted(Value),

    /// Reconcile the identity by fetching its current state
    Reconcile(EntityId),
}

/// Read-only access to the monitored entities
pub trait EntitySource: Send + Sync + 'static {
    /// List every currently existing entity
    fn list(&self) -> impl Future<Output = Result<Vec<Value>, SourceError>> + Send;

    /// Fetch one entity; `Ok(None)` means it no longer exists
    fn get(&self, id: &EntityId) -> impl Future<Output = Result<Option<Value>, SourceError>> + Send;
}

/// In-memory entity source with an optional watch channel
///
/// Useful for tests and demos. Every mutation is mirrored onto the watch
/// channel when one is attached.
#[derive(Debug, Default)]
pub struct MemorySource {
    entities: RwLock<BTreeMap<EntityId, Value>>,
    failing: AtomicBool,
    events: Option<mpsc::Sender<WatchEvent>>,
}

impl MemorySource {
    /// Create an empty source without a watch channel
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty source plus the receiving end of its watch channel
    pub fn with_watch(capacity: usize) -> (Self, mpsc::Receiver<WatchEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        let source = Self {
            events: Some(tx),
            ..Self::default()
        };
        (source, rx)
    }

    /// Create or replace an entity
    ///
    /// # Errors
    /// Returns [`SourceError::Response`] if the body carries no identity
    pub fn apply(&self, value: Value) -> Result<EntityId, SourceError> {
        let id = decode::identity_of(&value)
            .ok_or_else(|| SourceError::Response("entity has no namespace/name".to_string()))?;
        self.entities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), value.clone());
        self.emit(WatchEvent::Applied(value));
        Ok(id)
    }

    /// Remove an entity; returns whether it existed
    pub fn delete(&self, id: &EntityId) -> bool {
        let removed = self
            .entities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        match removed {
            Some(value) => {
                self.emit(WatchEvent::Deleted(value));
                true
            }
            None => false,
        }
    }

    /// Make every subsequent call fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of stored entities
    pub fn len(&self) -> usize {
        self.entities.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the source holds no entities
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn emit(&self, event: WatchEvent) {
        if let Some(tx) = &self.events {
            if let Err(e) = tx.try_send(event) {
                tracing::warn!("Dropped watch event: {}", e);
            }
        }
    }

    fn check(&self) -> Result<(), SourceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SourceError::Request("source unavailable".to_string()));
        }
        Ok(())
    }
}

impl EntitySource for MemorySource {
    async fn list(&self) -> Result<Vec<Value>, SourceError> {
        self.check()?;
        let entities = self.entities.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entities.values().cloned().collect())
    }

    async fn get(&self, id: &EntityId) -> Result<Option<Value>, SourceError> {
        self.check()?;
        let entities = self.entities.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entities.get(id).cloned())
    }
}
