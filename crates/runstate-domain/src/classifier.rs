//! Status classifier - maps a snapshot to exactly one active status label
//!
//! # Priority order (first match wins)
//!
//! 1. A completion condition with a definite outcome: its reason string.
//! 2. The pending indicator: `Pending`.
//! 3. Otherwise: `Unknown`.
//!
//! Completion conditions are the canonical `Succeeded` type, where any
//! status carrying a reason counts (`Unknown`/`Running` is the running
//! phase), and failure-side types (`Failed`, `Cancelled`,
//! `PipelineRunTimeout`, `CreateRunFailed`) for sources that model them as
//! separate condition types, which count only when `True`.
//!
//! Conflicting conditions are resolved purely by the order the source
//! returned them in. The first matching condition wins; there is no
//! secondary heuristic.

use crate::{Condition, ConditionStatus, ParamValue, PipelineRunSnapshot, StatusLabel};

/// Canonical completion condition type
pub const SUCCEEDED_CONDITION: &str = "Succeeded";

/// Parameter carrying the target build platforms
pub const DEFAULT_PLATFORM_PARAM: &str = "build-platforms";

/// Delimiter used to join multi-valued platform params
pub const PLATFORM_DELIMITER: &str = ",";

/// Auxiliary labels emitted next to the status label
///
/// `build_platform` is the empty string when the parameter is not
/// specified; it is never omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AuxLabels {
    /// Comma-joined build platforms, or `""`
    pub build_platform: String,
}

/// Result of classifying one snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// The single active status label
    pub status: StatusLabel,

    /// Auxiliary label values
    pub aux: AuxLabels,
}

/// Configurable classifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classifier {
    platform_param: String,
}

impl Classifier {
    /// Create a classifier reading platforms from the given parameter name
    pub fn new(platform_param: impl Into<String>) -> Self {
        Self {
            platform_param: platform_param.into(),
        }
    }

    /// Name of the platform parameter
    pub fn platform_param(&self) -> &str {
        &self.platform_param
    }

    /// Classify a snapshot. Total and side-effect-free.
    pub fn classify(&self, snapshot: &PipelineRunSnapshot) -> Classification {
        Classification {
            status: status_of(snapshot),
            aux: AuxLabels {
                build_platform: platform_label(snapshot, &self.platform_param),
            },
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_PLATFORM_PARAM)
    }
}

/// Classify with the default platform parameter
pub fn classify(snapshot: &PipelineRunSnapshot) -> Classification {
    Classifier::default().classify(snapshot)
}

/// Derive the active status label
pub fn status_of(snapshot: &PipelineRunSnapshot) -> StatusLabel {
    if let Some(label) = snapshot.conditions.iter().find_map(completion_label) {
        return label;
    }
    if snapshot.pending {
        return StatusLabel::Pending;
    }
    StatusLabel::Unknown
}

fn completion_label(condition: &Condition) -> Option<StatusLabel> {
    if condition.condition_type == SUCCEEDED_CONDITION {
        if !condition.reason.is_empty() {
            return Some(StatusLabel::from_reason(&condition.reason));
        }
        return Some(match condition.status {
            ConditionStatus::True => StatusLabel::Succeeded,
            ConditionStatus::False => StatusLabel::Failed,
            ConditionStatus::Unknown => StatusLabel::Running,
        });
    }

    let as_type = StatusLabel::from_reason(&condition.condition_type);
    if as_type.is_failure_type() && condition.status == ConditionStatus::True {
        if condition.reason.is_empty() {
            return Some(as_type);
        }
        return Some(StatusLabel::from_reason(&condition.reason));
    }

    None
}

/// Derive the build platform label from the named parameter
pub fn platform_label(snapshot: &PipelineRunSnapshot, param: &str) -> String {
    match snapshot.param(param).map(|p| &p.value) {
        Some(ParamValue::Array(values)) => values.join(PLATFORM_DELIMITER),
        Some(ParamValue::String(value)) => value.clone(),
        Some(ParamValue::Object(_)) | None => String::new(),
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::{EntityId, Param};
    use proptest::prelude::*;

    fn condition_strategy() -> impl Strategy<Value = Condition> {
        (
            prop_oneof![
                Just("Succeeded".to_string()),
                Just("Cancelled".to_string()),
                Just("Failed".to_string()),
                Just("Ready".to_string()),
                "[A-Za-z]{0,8}",
            ],
            prop_oneof![
                Just(ConditionStatus::True),
                Just(ConditionStatus::False),
                Just(ConditionStatus::Unknown),
            ],
            "[A-Za-z]{0,12}",
        )
            .prop_map(|(t, s, r)| Condition::new(t, s, r))
    }

    fn snapshot_strategy() -> impl Strategy<Value = PipelineRunSnapshot> {
        (
            prop::collection::vec(condition_strategy(), 0..5),
            any::<bool>(),
            prop::collection::vec("[a-z/0-9]{0,10}", 0..4),
        )
            .prop_map(|(conditions, pending, platforms)| {
                let mut snap = PipelineRunSnapshot::new(EntityId::new("ns", "pr"));
                snap.conditions = conditions;
                snap.pending = pending;
                snap.with_param(Param::new(DEFAULT_PLATFORM_PARAM, ParamValue::Array(platforms)))
            })
    }

    proptest! {
        /// Property: classification always yields exactly one non-empty label
        #[test]
        fn test_classify_is_total(snap in snapshot_strategy()) {
            let result = classify(&snap);
            prop_assert!(!result.status.as_str().is_empty());
        }

        /// Property: classification is deterministic
        #[test]
        fn test_classify_is_pure(snap in snapshot_strategy()) {
            prop_assert_eq!(classify(&snap), classify(&snap));
        }

        /// Property: without a matching condition the pending flag decides
        #[test]
        fn test_no_conditions_pending_or_unknown(pending: bool) {
            let mut snap = PipelineRunSnapshot::new(EntityId::new("ns", "pr"));
            snap.pending = pending;
            let expected = if pending { StatusLabel::Pending } else { StatusLabel::Unknown };
            prop_assert_eq!(classify(&snap).status, expected);
        }
    }
}
