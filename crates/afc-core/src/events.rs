use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::parse_timestamp;

/// Raw stream message as pushed by the workflow server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireEvent {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowEvent {
    pub kind: EventKind,
    /// Run the server attributed this event to, if it said.
    pub run_id: Option<String>,
    pub emitted_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    WorkflowStart(WorkflowStartPayload),
    WorkflowComplete(WorkflowCompletePayload),
    WorkflowPaused(WorkflowPausedPayload),
    PhaseStart(PhasePayload),
    PhaseComplete(PhasePayload),
    AgentStart(AgentStartPayload),
    AgentComplete(AgentCompletePayload),
    ArtifactGenerated(ArtifactPayload),
    ThoughtChunk(ThoughtChunkPayload),
    Error(ErrorPayload),
    /// Kinds this client does not know yet. Kept so newer servers never break
    /// the stream; the reducer ignores them.
    Unrecognized { kind: String, data: Value },
}

impl EventKind {
    pub fn name(&self) -> &str {
        match self {
            EventKind::WorkflowStart(_) => "workflow_start",
            EventKind::WorkflowComplete(_) => "workflow_complete",
            EventKind::WorkflowPaused(_) => "workflow_paused",
            EventKind::PhaseStart(_) => "phase_start",
            EventKind::PhaseComplete(_) => "phase_complete",
            EventKind::AgentStart(_) => "agent_start",
            EventKind::AgentComplete(_) => "agent_complete",
            EventKind::ArtifactGenerated(_) => "artifact_generated",
            EventKind::ThoughtChunk(_) => "thought_chunk",
            EventKind::Error(_) => "error",
            EventKind::Unrecognized { kind, .. } => kind,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowStartPayload {
    #[serde(default)]
    pub product_idea: String,
    #[serde(default)]
    pub run_id: Option<String>,
}

pub const SUCCESS_MARKER: &str = "success";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowCompletePayload {
    pub status: String,
    #[serde(default, deserialize_with = "crate::deserialize_tokens")]
    pub total_tokens: Option<u64>,
}

impl WorkflowCompletePayload {
    pub fn succeeded(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case(SUCCESS_MARKER)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowPausedPayload {
    /// Nodes the workflow will run once resumed.
    #[serde(default, deserialize_with = "crate::deserialize_name_list")]
    pub next: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhasePayload {
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentStartPayload {
    pub agent: String,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentCompletePayload {
    pub agent: String,
    #[serde(default)]
    pub success: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactPayload {
    pub filename: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThoughtChunkPayload {
    pub agent: String,
    pub chunk: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    #[serde(default = "default_error_message")]
    pub message: String,
}

fn default_error_message() -> String {
    "unspecified server error".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("message is not a workflow event: {0}")]
    Json(String),
    #[error("message has no event type")]
    MissingKind,
    #[error("malformed {kind} payload: {reason}")]
    Payload { kind: String, reason: String },
}

/// Decodes one stream message. Never panics; a bad message only costs itself.
pub fn decode(raw: &str, received_at: DateTime<Utc>) -> Result<WorkflowEvent, DecodeError> {
    let wire: WireEvent =
        serde_json::from_str(raw).map_err(|err| DecodeError::Json(err.to_string()))?;
    decode_wire(wire, received_at)
}

pub fn decode_wire(wire: WireEvent, received_at: DateTime<Utc>) -> Result<WorkflowEvent, DecodeError> {
    let kind = wire
        .kind
        .map(|kind| kind.trim().to_string())
        .filter(|kind| !kind.is_empty())
        .ok_or(DecodeError::MissingKind)?;
    let data = match wire.data {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    let run_id = data
        .get("run_id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string);
    let emitted_at = wire.timestamp.as_deref().and_then(parse_timestamp);

    let kind = match kind.as_str() {
        "workflow_start" => EventKind::WorkflowStart(payload(&kind, data)?),
        "workflow_complete" => EventKind::WorkflowComplete(payload(&kind, data)?),
        "workflow_paused" => EventKind::WorkflowPaused(payload(&kind, data)?),
        "phase_start" => EventKind::PhaseStart(payload(&kind, data)?),
        "phase_complete" => EventKind::PhaseComplete(payload(&kind, data)?),
        "agent_start" => EventKind::AgentStart(payload(&kind, data)?),
        "agent_complete" => EventKind::AgentComplete(payload(&kind, data)?),
        "artifact_generated" => EventKind::ArtifactGenerated(payload(&kind, data)?),
        "thought_chunk" => EventKind::ThoughtChunk(payload(&kind, data)?),
        "error" => EventKind::Error(payload(&kind, data)?),
        _ => EventKind::Unrecognized { kind, data },
    };

    Ok(WorkflowEvent {
        kind,
        run_id,
        emitted_at,
        received_at,
    })
}

fn payload<T: DeserializeOwned>(kind: &str, data: Value) -> Result<T, DecodeError> {
    serde_json::from_value(data).map_err(|err| DecodeError::Payload {
        kind: kind.to_string(),
        reason: err.to_string(),
    })
}
