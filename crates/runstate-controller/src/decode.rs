//! Decoding of raw PipelineRun payloads into domain snapshots
//!
//! Mirrors the subset of the `tekton.dev/v1` PipelineRun object the
//! classifier needs: metadata identity and deletion timestamp, `spec.status`
//! (pending marker), `spec.params`, and `status.conditions`.

use crate::ControllerError;
use runstate_domain::{Condition, ConditionStatus, EntityId, Param, ParamValue, PipelineRunSnapshot};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// `spec.status` value that marks a run as pending
pub const PENDING_SPEC_STATUS: &str = "PipelineRunPending";

#[derive(Debug, Deserialize)]
struct RawPipelineRun {
    metadata: RawMetadata,
    #[serde(default)]
    spec: RawSpec,
    #[serde(default)]
    status: RawStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMetadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    deletion_timestamp: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSpec {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    params: Vec<RawParam>,
}

#[derive(Debug, Deserialize)]
struct RawParam {
    name: String,
    value: RawParamValue,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawParamValue {
    String(String),
    Array(Vec<String>),
    Object(BTreeMap<String, String>),
}

#[derive(Debug, Default, Deserialize)]
struct RawStatus {
    #[serde(default)]
    conditions: Vec<RawCondition>,
}

#[derive(Debug, Deserialize)]
struct RawCondition {
    #[serde(rename = "type")]
    condition_type: String,
    status: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

/// Best-effort identity of a payload, even when the rest is malformed
pub fn identity_of(value: &Value) -> Option<EntityId> {
    let metadata = value.get("metadata")?;
    let namespace = metadata.get("namespace")?.as_str()?;
    let name = metadata.get("name")?.as_str()?;
    if namespace.is_empty() || name.is_empty() {
        return None;
    }
    Some(EntityId::new(namespace, name))
}

/// Decode one PipelineRun payload
///
/// # Errors
/// Returns [`ControllerError::MalformedSnapshot`] when required fields are
/// missing or carry unexpected values
pub fn decode_pipeline_run(value: &Value) -> Result<PipelineRunSnapshot, ControllerError> {
    let hint = identity_of(value).map(|id| id.to_string());
    let raw = RawPipelineRun::deserialize(value)
        .map_err(|e| ControllerError::malformed(hint.clone(), e.to_string()))?;

    let namespace = raw
        .metadata
        .namespace
        .filter(|ns| !ns.is_empty())
        .ok_or_else(|| ControllerError::malformed(hint.clone(), "missing metadata.namespace"))?;
    let name = raw
        .metadata
        .name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ControllerError::malformed(hint.clone(), "missing metadata.name"))?;

    let conditions = raw
        .status
        .conditions
        .into_iter()
        .map(|c| {
            let status = ConditionStatus::parse(&c.status).ok_or_else(|| {
                ControllerError::malformed(
                    hint.clone(),
                    format!("condition {} has invalid status {:?}", c.condition_type, c.status),
                )
            })?;
            Ok(Condition {
                condition_type: c.condition_type,
                status,
                reason: c.reason,
                message: c.message,
            })
        })
        .collect::<Result<Vec<_>, ControllerError>>()?;

    let params = raw
        .spec
        .params
        .into_iter()
        .map(|p| {
            let value = match p.value {
                RawParamValue::String(s) => ParamValue::String(s),
                RawParamValue::Array(values) => ParamValue::Array(values),
                RawParamValue::Object(map) => ParamValue::Object(map.into_iter().collect()),
            };
            Param::new(p.name, value)
        })
        .collect();

    Ok(PipelineRunSnapshot {
        id: EntityId::new(namespace, name),
        conditions,
        pending: raw.spec.status.as_deref() == Some(PENDING_SPEC_STATUS),
        deletion_timestamp: raw.metadata.deletion_timestamp,
        params,
    })
}
