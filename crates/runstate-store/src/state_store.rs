//! In-memory metric state store

use crate::{MetricRecord, StoreError};
use runstate_domain::EntityId;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Mapping from entity identity to its current metric record
///
/// Holds at most one record per identity. A missing entry means no series is
/// emitted for that entity.
#[derive(Debug, Default)]
pub struct MetricStateStore {
    records: RwLock<HashMap<EntityId, MetricRecord>>,
}

impl MetricStateStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking writer can only leave a fully written or untouched map
    // behind (single insert/remove per critical section), so poisoning is
    // recovered rather than propagated.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<EntityId, MetricRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<EntityId, MetricRecord>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace any prior record for `id`
    ///
    /// Returns the record it replaced, if any.
    ///
    /// # Errors
    /// Returns [`StoreError::IdentityMismatch`] if `record.id != *id`
    pub fn upsert(
        &self,
        id: &EntityId,
        record: MetricRecord,
    ) -> Result<Option<MetricRecord>, StoreError> {
        if record.id != *id {
            return Err(StoreError::IdentityMismatch {
                key: id.to_string(),
                record: record.id.to_string(),
            });
        }

        let previous = self.write().insert(id.clone(), record);
        Ok(previous)
    }

    /// Delete the record for `id` if present
    ///
    /// Removing an absent identity is a no-op. Returns the removed record.
    pub fn remove(&self, id: &EntityId) -> Option<MetricRecord> {
        let removed = self.write().remove(id);
        if removed.is_some() {
            tracing::trace!(entity = %id, "Removed metric record");
        }
        removed
    }

    /// Point-in-time copy of every record, sorted by identity
    pub fn snapshot(&self) -> Vec<MetricRecord> {
        let mut records: Vec<MetricRecord> = self.read().values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Current record for `id`
    pub fn get(&self, id: &EntityId) -> Option<MetricRecord> {
        self.read().get(id).cloned()
    }

    /// Whether a record exists for `id`
    pub fn contains(&self, id: &EntityId) -> bool {
        self.read().contains_key(id)
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drop every record
    pub fn clear(&self) {
        self.write().clear();
    }
}
