pub mod connection;
pub mod events;
pub mod journal;
pub mod reconcile;
pub mod state;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Running,
    Paused,
    Complete,
    Error,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Idle
    }
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Complete => "complete",
            RunStatus::Error => "error",
        }
    }

    /// Complete and error runs never go back to running on their own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Complete | RunStatus::Error)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    /// Accepts the status vocabulary of the run list endpoint, which reports
    /// `success` and `stopped` rather than the dashboard's own names.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "idle" | "stopped" => Ok(RunStatus::Idle),
            "running" | "started" | "resumed" => Ok(RunStatus::Running),
            "paused" => Ok(RunStatus::Paused),
            "complete" | "completed" | "success" => Ok(RunStatus::Complete),
            "error" | "failed" => Ok(RunStatus::Error),
            other => Err(format!("Unknown run status: {other}")),
        }
    }
}

/// One entry of the server's run history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub id: String,
    #[serde(default, alias = "title")]
    pub product_idea: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "deserialize_tokens")]
    pub total_tokens: Option<u64>,
    #[serde(default)]
    pub end_time: Option<String>,
}

impl RunSummary {
    pub fn placeholder(run_id: &str, status: RunStatus) -> Self {
        Self {
            id: run_id.to_string(),
            product_idea: String::new(),
            timestamp: None,
            status: status.as_str().to_string(),
            total_tokens: None,
            end_time: None,
        }
    }

    pub fn run_status(&self) -> Option<RunStatus> {
        self.status.parse().ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Artifact {
    pub filename: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub produced_by: Option<String>,
    pub produced_at: DateTime<Utc>,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentProfile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub icon: String,
}

/// Reads the `/agents` document, an object keyed by agent id.
pub fn parse_agent_roster(value: &Value) -> Vec<AgentProfile> {
    let Some(map) = value.as_object() else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(id, entry)| {
            let entry = entry.as_object()?;
            let field = |key: &str| {
                entry
                    .get(key)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            Some(AgentProfile {
                id: id.clone(),
                name: field("name"),
                role: field("role"),
                icon: field("icon"),
            })
        })
        .collect()
}

/// Parses the timestamp shapes the backend emits: RFC 3339, naive ISO 8601
/// and `YYYY-MM-DD HH:MM:SS`. Naive values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

/// Deserialize a token count that can be a number, a numeric string or null.
fn deserialize_tokens<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let val: Value = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("invalid token count")),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s.trim().parse::<u64>().map(Some).map_err(serde::de::Error::custom),
        _ => Err(serde::de::Error::custom("expected number or string for tokens")),
    }
}

/// Deserialize a list of names that may arrive as a single string.
fn deserialize_name_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val: Value = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(Vec::new()),
        Value::String(s) => Ok(vec![s]),
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect()),
        _ => Err(serde::de::Error::custom("expected string or list of strings")),
    }
}
