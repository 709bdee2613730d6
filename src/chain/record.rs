//! Chain record types and per-type payload shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Genesis marker for the first record in a chain.
pub const GENESIS: &str = "GENESIS";

/// One line in a chain file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainRecord {
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub session_id: String,
    /// ISO-8601 UTC timestamp.
    pub timestamp: String,
    pub data: Value,
    pub prev_hash: String,
    pub hash: String,
    /// Detached signature over `hash`; empty when signing is unavailable.
    #[serde(default)]
    pub signature: String,
}

/// Fields hashed to produce [`ChainRecord::hash`] — everything in
/// `ChainRecord` except `hash` and `signature` themselves.
#[derive(Debug, Clone, Serialize)]
pub struct HashedFields<'a> {
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub session_id: &'a str,
    pub timestamp: &'a str,
    pub data: &'a Value,
    pub prev_hash: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    SessionStart,
    Heartbeat,
    Milestone,
    SessionEnd,
    SessionSeal,
}

/// `session_start` record payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStartPayload {
    pub client: String,
    pub task_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_summary: Option<String>,
    pub conversation_id: String,
    /// Client-claimed conversation index, when the caller supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_index: Option<u64>,
    /// Daemon-derived conversation index; always present. Resolves the
    /// open question of client/server disagreement by recording both.
    pub server_conversation_index: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub recovered: bool,
}

/// `heartbeat` record payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub heartbeat_number: u64,
    pub cumulative_seconds: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub recovered: bool,
}

/// `milestone` record payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestonePayload {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_title: Option<String>,
    pub category: MilestoneCategory,
    pub complexity: MilestoneComplexity,
    pub duration_minutes: u64,
    #[serde(default)]
    pub languages: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneCategory {
    Feature,
    Bugfix,
    Refactor,
    Test,
    Docs,
    Setup,
    Deployment,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneComplexity {
    Simple,
    Medium,
    Complex,
}

/// `session_end` record payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEndPayload {
    pub duration_seconds: u64,
    pub task_type: String,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub files_touched: u64,
    pub heartbeat_count: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auto_sealed: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub recovered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// `session_seal` record payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSealPayload {
    /// Canonical JSON of the [`crate::registry::SessionSeal`] summary.
    pub seal: Value,
    pub seal_signature: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auto_sealed: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub recovered: bool,
}
