//! Metric record - the stored state of one entity

use runstate_domain::{AuxLabels, Classification, EntityId, StatusLabel};

/// The active status of one entity, as stored for exposition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricRecord {
    /// Entity this record describes
    pub id: EntityId,

    /// The single active status label
    pub status: StatusLabel,

    /// Auxiliary label values
    pub aux: AuxLabels,
}

impl MetricRecord {
    /// Create a new record
    pub fn new(id: EntityId, status: StatusLabel, aux: AuxLabels) -> Self {
        Self { id, status, aux }
    }

    /// Build a record from a classifier result
    pub fn from_classification(id: EntityId, classification: Classification) -> Self {
        Self {
            id,
            status: classification.status,
            aux: classification.aux,
        }
    }
}
