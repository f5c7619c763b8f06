//! State-set exposition
//!
//! [`render`] expands each stored record into one sample per taxonomy label
//! (`1` for the active label, `0` for the rest). [`encode`] turns those
//! samples into the Prometheus text format through a registry built for the
//! single call, so nothing leaks between scrapes.

use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use runstate_domain::{EntityId, StatusTaxonomy};
use runstate_store::MetricRecord;
use thiserror::Error;

/// Label names of the status metric, in exposition order
pub const LABEL_NAMES: [&str; 4] = ["namespace", "name", "status", "build_platform"];

/// Metric help text
pub const METRIC_HELP: &str = "Status of Tekton PipelineRuns (1 = current status, 0 = other statuses)";

/// Errors raised while encoding samples
#[derive(Debug, Error)]
pub enum ExpositionError {
    /// Metric definition or registration rejected
    #[error("Invalid metric definition: {0}")]
    Metric(#[from] prometheus::Error),

    /// Encoded text was not UTF-8
    #[error("Failed to encode metrics: {0}")]
    Encode(#[from] std::string::FromUtf8Error),
}

/// One row of the state-set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// Entity the row belongs to
    pub id: EntityId,

    /// Status label of this row
    pub status: String,

    /// Build platform label
    pub build_platform: String,

    /// 1 for the active status, 0 otherwise
    pub value: u8,
}

/// Expand records into state-set samples
///
/// Every record yields one row per taxonomy label. An active label outside
/// the taxonomy is emitted as an extra `1` row next to the taxonomy zeros.
pub fn render(records: &[MetricRecord], taxonomy: &StatusTaxonomy) -> Vec<Sample> {
    let mut samples = Vec::with_capacity(records.len() * (taxonomy.len() + 1));

    for record in records {
        let active = record.status.as_str();
        let row = |status: &str, value: u8| Sample {
            id: record.id.clone(),
            status: status.to_string(),
            build_platform: record.aux.build_platform.clone(),
            value,
        };

        for label in taxonomy.labels() {
            samples.push(row(label, u8::from(label == active)));
        }
        if !taxonomy.contains(active) {
            samples.push(row(active, 1));
        }
    }

    samples
}

/// Encode samples as Prometheus text under `metric_name`
///
/// # Errors
/// Returns [`ExpositionError::Metric`] if `metric_name` is not a valid
/// Prometheus metric name
pub fn encode(samples: &[Sample], metric_name: &str) -> Result<String, ExpositionError> {
    let registry = Registry::new();
    let gauge = GaugeVec::new(Opts::new(metric_name, METRIC_HELP), &LABEL_NAMES)?;
    registry.register(Box::new(gauge.clone()))?;

    for sample in samples {
        gauge
            .with_label_values(&[
                sample.id.namespace(),
                sample.id.name(),
                sample.status.as_str(),
                sample.build_platform.as_str(),
            ])
            .set(f64::from(sample.value));
    }

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Content type of [`encode`] output
pub fn content_type() -> String {
    TextEncoder::new().format_type().to_string()
}
