//! Configuration data model.
//!
//! Mirrors the on-disk `config.json` shape exactly, plus `port`/`root_dir`
//! which can additionally be overridden by environment variables at load
//! time (see `super::env`).

use serde::{Deserialize, Serialize};

use super::defaults::default_port;

/// Evaluation/milestone-tracking options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Whether self-evaluation payloads on `session_end` are recorded.
    pub enabled: bool,
    /// Whether milestones declared on `session_end` are appended to the
    /// milestones index (spec.md §4.4.2: "if local configuration enables
    /// milestone tracking").
    pub track_milestones: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self { enabled: true, track_milestones: true }
    }
}

/// Local user profile surfaced to the dashboard/remote sync collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UserProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Daemon configuration: the `config.json` file plus the two environment
/// overrides named in spec.md §6.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    pub port: u16,
    pub sync_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    pub evaluation: EvaluationConfig,
    pub user_profile: UserProfile,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            sync_enabled: false,
            sync_base_url: None,
            auth_token: None,
            evaluation: EvaluationConfig::default(),
            user_profile: UserProfile::default(),
        }
    }
}

impl DaemonConfig {
    /// Redact `auth_token` for responses/logs that shouldn't echo secrets
    /// (mirrors `auth/store.rs`'s habit of never logging token material).
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.auth_token.is_some() {
            copy.auth_token = Some("<redacted>".to_string());
        }
        copy
    }
}
