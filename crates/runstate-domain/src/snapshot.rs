//! Read-only snapshot of a PipelineRun as reported by the entity source

use crate::EntityId;

/// Tri-state outcome of a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionStatus {
    /// Condition holds
    True,

    /// Condition does not hold
    False,

    /// Outcome not yet known (e.g. still running)
    Unknown,
}

impl ConditionStatus {
    /// Get the status as it appears on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }

    /// Parse a wire status string (case-sensitive, as the API server emits it)
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "True" => Some(ConditionStatus::True),
            "False" => Some(ConditionStatus::False),
            "Unknown" => Some(ConditionStatus::Unknown),
            _ => None,
        }
    }
}

/// A typed status condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    /// Condition type (`Succeeded` for PipelineRuns)
    pub condition_type: String,

    /// Outcome
    pub status: ConditionStatus,

    /// Machine-readable reason, e.g. `Running`, `Failed`, `PipelineRunTimeout`
    pub reason: String,

    /// Human-readable message
    pub message: String,
}

impl Condition {
    /// Create a condition with an empty message
    pub fn new(
        condition_type: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            condition_type: condition_type.into(),
            status,
            reason: reason.into(),
            message: String::new(),
        }
    }
}

/// Value of a pipeline parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// Single string value
    String(String),

    /// Ordered list of strings
    Array(Vec<String>),

    /// Key/value object, in key order
    Object(Vec<(String, String)>),
}

/// A named pipeline parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Parameter name
    pub name: String,

    /// Parameter value
    pub value: ParamValue,
}

impl Param {
    /// Create a new parameter
    pub fn new(name: impl Into<String>, value: ParamValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Point-in-time view of a monitored PipelineRun
///
/// Conditions and params keep the order the source returned them in; the
/// classifier depends on that order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRunSnapshot {
    /// Identity of the resource
    pub id: EntityId,

    /// Status conditions in source order
    pub conditions: Vec<Condition>,

    /// Whether the run was created in the pending state and not yet released
    pub pending: bool,

    /// Set iff the resource is terminating but not yet removed
    pub deletion_timestamp: Option<String>,

    /// Pipeline parameters in source order
    pub params: Vec<Param>,
}

impl PipelineRunSnapshot {
    /// Create an empty snapshot (no conditions, not pending, not terminating)
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            conditions: Vec::new(),
            pending: false,
            deletion_timestamp: None,
            params: Vec::new(),
        }
    }

    /// Add a condition (builder style)
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Add a parameter (builder style)
    pub fn with_param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// Mark as pending (builder style)
    pub fn pending(mut self) -> Self {
        self.pending = true;
        self
    }

    /// Mark as terminating (builder style)
    pub fn terminating(mut self, at: impl Into<String>) -> Self {
        self.deletion_timestamp = Some(at.into());
        self
    }

    /// Whether the resource is being deleted
    pub fn is_terminating(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// Find a parameter by name (first occurrence)
    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }
}
