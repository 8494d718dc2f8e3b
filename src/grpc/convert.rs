//! Mapping between wire messages and the core status types.

use std::collections::HashMap;

use chrono::DateTime;
use serde_json::Value;
use uuid::Uuid;

use crate::dispatch::TargetRule;
use crate::error::ScriptError;
use crate::proto;
use crate::registry::{RunState, RunStatus};

pub fn state_to_proto(state: RunState) -> proto::ScriptState {
    match state {
        RunState::Ready => proto::ScriptState::Ready,
        RunState::Running => proto::ScriptState::Running,
        RunState::Terminated => proto::ScriptState::Terminated,
        RunState::Error => proto::ScriptState::Error,
    }
}

pub fn state_from_proto(state: i32) -> Result<RunState, ScriptError> {
    match proto::ScriptState::try_from(state) {
        Ok(proto::ScriptState::Ready) => Ok(RunState::Ready),
        Ok(proto::ScriptState::Running) => Ok(RunState::Running),
        Ok(proto::ScriptState::Terminated) => Ok(RunState::Terminated),
        Ok(proto::ScriptState::Error) => Ok(RunState::Error),
        _ => Err(ScriptError::Internal(format!(
            "Unknown script state: {state}"
        ))),
    }
}

pub fn rule_to_proto(rule: TargetRule) -> proto::TargetRule {
    match rule {
        TargetRule::One => proto::TargetRule::One,
        TargetRule::All => proto::TargetRule::All,
    }
}

/// Unspecified defaults to ONE, matching the service contract.
pub fn rule_from_proto(rule: i32) -> TargetRule {
    match proto::TargetRule::try_from(rule) {
        Ok(proto::TargetRule::All) => TargetRule::All,
        _ => TargetRule::One,
    }
}

/// Binding values travel JSON-encoded so numbers and booleans survive the
/// string map.
pub fn encode_variables(variables: &HashMap<String, Value>) -> HashMap<String, String> {
    variables
        .iter()
        .map(|(key, value)| (key.clone(), value.to_string()))
        .collect()
}

/// Inverse of [`encode_variables`]. A value that does not parse as JSON is
/// kept as a plain string.
pub fn decode_variables(variables: HashMap<String, String>) -> HashMap<String, Value> {
    variables
        .into_iter()
        .map(|(key, raw)| {
            let value = match serde_json::from_str(&raw) {
                Ok(value) => value,
                Err(_) => Value::String(raw),
            };
            (key, value)
        })
        .collect()
}

pub fn status_to_proto(status: &RunStatus) -> proto::RunStatusInfo {
    proto::RunStatusInfo {
        node: status.node.clone(),
        run_id: status.uuid.to_string(),
        name: status.name.clone(),
        state: state_to_proto(status.state) as i32,
        start_time_ms: status.start_time.map(|dt| dt.timestamp_millis()),
        end_time_ms: status.end_time.map(|dt| dt.timestamp_millis()),
        bindings: encode_variables(&status.bindings),
        error: status.error.clone(),
        result: status.result.as_ref().map(|v| v.to_string()),
        status_path: status.status_path.clone(),
        std_out_path: status.std_out_path.clone(),
        std_err_path: status.std_err_path.clone(),
    }
}

pub fn status_from_proto(info: proto::RunStatusInfo) -> Result<RunStatus, ScriptError> {
    let uuid = Uuid::parse_str(&info.run_id)
        .map_err(|e| ScriptError::Internal(format!("Invalid run id in response: {e}")))?;
    let state = state_from_proto(info.state)?;
    let result = info.result.map(|raw| match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(_) => Value::String(raw),
    });

    let mut status = RunStatus::new(
        &info.node,
        uuid,
        &info.name,
        state,
        info.start_time_ms.and_then(DateTime::from_timestamp_millis),
        info.end_time_ms.and_then(DateTime::from_timestamp_millis),
        decode_variables(info.bindings),
        info.error,
        result,
    );
    // Keep the origin node's paths when it sent them.
    if !info.status_path.is_empty() {
        status.status_path = info.status_path;
    }
    if !info.std_out_path.is_empty() {
        status.std_out_path = info.std_out_path;
    }
    if !info.std_err_path.is_empty() {
        status.std_err_path = info.std_err_path;
    }
    Ok(status)
}
