//! Shared data model: [`SessionSeal`], [`Milestone`], and the richness
//! scoring used to reconcile duplicate seals for the same session.

use serde::{Deserialize, Serialize};

use crate::chain::{MilestoneCategory, MilestoneComplexity};

/// How a [`SessionSeal`] came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SealVariant {
    /// Produced by an explicit `session_end` call.
    Organic,
    /// Produced by idle expiry or the orphan sweep.
    AutoSealed,
    /// Produced after a daemon restart recovered the session.
    Recovered,
}

/// The canonical per-session index entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSeal {
    pub session_id: String,
    pub conversation_id: String,
    pub conversation_index: u64,
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
    pub started_at: String,
    pub ended_at: String,
    pub duration_seconds: u64,
    pub record_count: u64,
    pub heartbeat_count: u64,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub files_touched: u64,
    pub chain_start_hash: String,
    pub chain_end_hash: String,
    pub seal_signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<serde_json::Value>,
    pub variant: SealVariant,
}

impl SessionSeal {
    /// Additive richness score used to reconcile two seals for the same
    /// `session_id`. Higher wins; ties favour the later arrival (the caller
    /// is responsible for passing the later seal as the tie-break winner).
    pub fn richness_score(&self) -> u32 {
        let mut score = 0u32;
        if self.title.is_some() {
            score += 10;
        }
        if self.private_title.is_some() {
            score += 10;
        }
        if !self.conversation_id.is_empty() {
            score += 20;
        }
        if self.evaluation.is_some() {
            score += 20;
        }
        if !self.languages.is_empty() {
            score += 5;
        }
        if self.files_touched > 0 {
            score += 5;
        }
        if let Some(project) = &self.project {
            if !matches!(project.as_str(), "unset" | "untitled" | "mcp" | "unknown") {
                score += 5;
            }
        }
        score
    }
}

/// Pick the richer of two seals for the same session id. On a tie, `next`
/// (the later arrival) wins, matching the reconciliation rule.
pub fn choose_richer(existing: &SessionSeal, next: &SessionSeal) -> bool {
    next.richness_score() >= existing.richness_score()
}

/// A notable outcome recorded during or at the end of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub session_id: String,
    pub category: MilestoneCategory,
    pub complexity: MilestoneComplexity,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_title: Option<String>,
    pub duration_minutes: u64,
    #[serde(default)]
    pub languages: Vec<String>,
    pub client: String,
    pub created_at: String,
    pub chain_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_seal(session_id: &str) -> SessionSeal {
        SessionSeal {
            session_id: session_id.to_string(),
            conversation_id: String::new(),
            conversation_index: 0,
            client: "example-ide".to_string(),
            task_type: "coding".to_string(),
            project: None,
            title: None,
            private_title: None,
            model: None,
            prompt_summary: None,
            started_at: "2026-01-01T00:00:00Z".to_string(),
            ended_at: "2026-01-01T00:00:00Z".to_string(),
            duration_seconds: 0,
            record_count: 3,
            heartbeat_count: 0,
            languages: Vec::new(),
            files_touched: 0,
            chain_start_hash: "GENESIS".to_string(),
            chain_end_hash: "abc".to_string(),
            seal_signature: String::new(),
            evaluation: None,
            variant: SealVariant::AutoSealed,
        }
    }

    #[test]
    fn rich_seal_outscores_bare_seal() {
        let bare = bare_seal("s1");
        let mut rich = bare_seal("s1");
        rich.title = Some("Add search".to_string());
        rich.evaluation = Some(serde_json::json!({"score": 5}));
        assert!(rich.richness_score() > bare.richness_score());
        assert!(choose_richer(&bare, &rich));
        assert!(!choose_richer(&rich, &bare));
    }

    #[test]
    fn tie_favours_later_arrival() {
        let a = bare_seal("s1");
        let b = bare_seal("s1");
        assert_eq!(a.richness_score(), b.richness_score());
        assert!(choose_richer(&a, &b));
    }

    #[test]
    fn project_placeholder_values_do_not_score() {
        let mut seal = bare_seal("s1");
        seal.project = Some("mcp".to_string());
        assert_eq!(seal.richness_score(), 0);
        seal.project = Some("my-real-project".to_string());
        assert_eq!(seal.richness_score(), 5);
    }
}
