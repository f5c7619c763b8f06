//! Status labels - the lifecycle phase reported for each PipelineRun

use std::fmt;

/// Lifecycle status of a PipelineRun
///
/// The well-known values form the closed part of the taxonomy. The failure
/// side is open-ended: any reason the source reports that is not one of the
/// known values is carried verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatusLabel {
    /// Created in the pending state, not yet released
    Pending,

    /// Accepted and starting
    Started,

    /// Executing
    Running,

    /// Cancelled by a user or controller
    Cancelled,

    /// Finished successfully
    Succeeded,

    /// Finished successfully with skipped tasks
    Completed,

    /// Finished with a failure
    Failed,

    /// Exceeded its timeout
    PipelineRunTimeout,

    /// Could not be created
    CreateRunFailed,

    /// No condition reported and not pending
    Unknown,

    /// Any other reason string (validation errors, custom failures)
    Other(String),
}

impl StatusLabel {
    /// Every well-known label, in exposition order
    pub const KNOWN: [StatusLabel; 10] = [
        StatusLabel::Pending,
        StatusLabel::Started,
        StatusLabel::Running,
        StatusLabel::Cancelled,
        StatusLabel::Succeeded,
        StatusLabel::Completed,
        StatusLabel::Failed,
        StatusLabel::PipelineRunTimeout,
        StatusLabel::CreateRunFailed,
        StatusLabel::Unknown,
    ];

    /// Get the label as it appears in the `status` metric label
    pub fn as_str(&self) -> &str {
        match self {
            StatusLabel::Pending => "Pending",
            StatusLabel::Started => "Started",
            StatusLabel::Running => "Running",
            StatusLabel::Cancelled => "Cancelled",
            StatusLabel::Succeeded => "Succeeded",
            StatusLabel::Completed => "Completed",
            StatusLabel::Failed => "Failed",
            StatusLabel::PipelineRunTimeout => "PipelineRunTimeout",
            StatusLabel::CreateRunFailed => "CreateRunFailed",
            StatusLabel::Unknown => "Unknown",
            StatusLabel::Other(reason) => reason,
        }
    }

    /// Map a reason string to a label
    ///
    /// Total: unrecognised reasons become `Other`. An empty reason maps to
    /// `Unknown` so the label value is never empty.
    pub fn from_reason(reason: &str) -> Self {
        match reason {
            "" | "Unknown" => StatusLabel::Unknown,
            "Pending" => StatusLabel::Pending,
            "Started" => StatusLabel::Started,
            "Running" => StatusLabel::Running,
            "Cancelled" => StatusLabel::Cancelled,
            "Succeeded" => StatusLabel::Succeeded,
            "Completed" => StatusLabel::Completed,
            "Failed" => StatusLabel::Failed,
            "PipelineRunTimeout" => StatusLabel::PipelineRunTimeout,
            "CreateRunFailed" => StatusLabel::CreateRunFailed,
            other => StatusLabel::Other(other.to_string()),
        }
    }

    /// Whether this is a failure-side terminal label that a source may
    /// also model as its own condition type
    pub fn is_failure_type(&self) -> bool {
        matches!(
            self,
            StatusLabel::Failed
                | StatusLabel::Cancelled
                | StatusLabel::PipelineRunTimeout
                | StatusLabel::CreateRunFailed
        )
    }
}

impl fmt::Display for StatusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed list of status values rendered for every entity
///
/// Exposition emits one row per taxonomy entry: `1` for the active label,
/// `0` for the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTaxonomy {
    labels: Vec<String>,
}

impl StatusTaxonomy {
    /// Build a taxonomy from label strings, dropping duplicates and empties
    /// while keeping first-seen order
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for label in labels {
            let label = label.into();
            if !label.is_empty() && !out.contains(&label) {
                out.push(label);
            }
        }
        Self { labels: out }
    }

    /// Labels in exposition order
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Whether a label is part of the taxonomy
    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Number of labels
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the taxonomy is empty
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl Default for StatusTaxonomy {
    fn default() -> Self {
        Self::new(StatusLabel::KNOWN.iter().map(|l| l.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_labels_roundtrip_through_reason() {
        for label in StatusLabel::KNOWN.iter() {
            assert_eq!(&StatusLabel::from_reason(label.as_str()), label);
        }
    }

    #[test]
    fn test_free_form_reason() {
        let label = StatusLabel::from_reason("PipelineValidationFailed");
        assert_eq!(label, StatusLabel::Other("PipelineValidationFailed".to_string()));
        assert_eq!(label.as_str(), "PipelineValidationFailed");
    }

    #[test]
    fn test_empty_reason_is_unknown() {
        assert_eq!(StatusLabel::from_reason(""), StatusLabel::Unknown);
    }

    #[test]
    fn test_default_taxonomy() {
        let taxonomy = StatusTaxonomy::default();
        assert_eq!(taxonomy.len(), 10);
        assert!(taxonomy.contains("Succeeded"));
        assert!(taxonomy.contains("Unknown"));
        assert!(!taxonomy.contains("PipelineValidationFailed"));
    }

    #[test]
    fn test_taxonomy_dedup() {
        let taxonomy = StatusTaxonomy::new(["Running", "", "Failed", "Running"]);
        assert_eq!(taxonomy.labels(), &["Running".to_string(), "Failed".to_string()]);
    }
}
