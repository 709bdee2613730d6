//! Local read-only query surface plus the destructive delete endpoints
//! (spec.md §4.5). Everything here folds the already-deduplicated sessions
//! and milestones indices; no aggregate is persisted separately.

use std::collections::HashMap;

use chrono::{DateTime, Local, NaiveDate, Utc};

use crate::chain::ChainStore;
use crate::error::IndexError;
use crate::index::{MilestonesIndex, SessionsIndex};
use crate::model::{Milestone, SessionSeal};

/// Aggregate counters folded from the deduplicated sessions index.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Stats {
    pub total_sessions: u64,
    pub total_duration_seconds: u64,
    pub by_client: HashMap<String, u64>,
    pub by_language: HashMap<String, u64>,
    pub by_task_type: HashMap<String, u64>,
    /// Consecutive local calendar days, ending today or yesterday, with at
    /// least one session. Zero if neither today nor yesterday has one.
    pub streak_days: u64,
}

/// List the deduplicated sessions index (richest seal per `session_id`).
pub fn list_sessions(sessions: &SessionsIndex) -> Result<Vec<SessionSeal>, IndexError> {
    sessions.list()
}

/// List all recorded milestones.
pub fn list_milestones(milestones: &MilestonesIndex) -> Result<Vec<Milestone>, IndexError> {
    milestones.list()
}

/// Compute aggregate stats by folding the deduplicated sessions index.
pub fn compute_stats(sessions: &SessionsIndex) -> Result<Stats, IndexError> {
    let seals = sessions.list()?;
    let mut stats = Stats::default();
    stats.total_sessions = seals.len() as u64;
    for seal in &seals {
        stats.total_duration_seconds += seal.duration_seconds;
        *stats.by_client.entry(seal.client.clone()).or_insert(0) += 1;
        *stats.by_task_type.entry(seal.task_type.clone()).or_insert(0) += 1;
        for language in &seal.languages {
            *stats.by_language.entry(language.clone()).or_insert(0) += 1;
        }
    }
    stats.streak_days = compute_streak(&seals);
    Ok(stats)
}

fn session_local_date(seal: &SessionSeal) -> Option<NaiveDate> {
    let ended_at = DateTime::parse_from_rfc3339(&seal.ended_at).ok()?;
    Some(ended_at.with_timezone(&Utc).with_timezone(&Local).date_naive())
}

fn compute_streak(seals: &[SessionSeal]) -> u64 {
    let days: std::collections::HashSet<NaiveDate> = seals.iter().filter_map(session_local_date).collect();
    let today = Local::now().date_naive();
    let yesterday = today - chrono::Duration::days(1);

    let mut cursor = if days.contains(&today) {
        today
    } else if days.contains(&yesterday) {
        yesterday
    } else {
        return 0;
    };

    let mut streak = 0u64;
    while days.contains(&cursor) {
        streak += 1;
        cursor -= chrono::Duration::days(1);
    }
    streak
}

/// `delete(session_id)`: remove from the sessions index, cascade-delete its
/// milestones, and unlink its sealed chain file. No-op (returns `false`) if
/// the session was not present.
pub fn delete_session(
    sessions: &SessionsIndex,
    milestones: &MilestonesIndex,
    chain: &ChainStore,
    session_id: &str,
) -> Result<bool, IndexError> {
    let removed = sessions.delete(session_id)?;
    if removed {
        milestones.delete_for_session(session_id)?;
        chain.delete_sealed(session_id).map_err(|err| IndexError::Io(std::io::Error::new(std::io::ErrorKind::Other, err.to_string())))?;
    }
    Ok(removed)
}

/// `delete_conversation(conversation_id)`: repeat [`delete_session`] for
/// every session carrying that conversation id. Returns the removed session
/// ids.
pub fn delete_conversation(
    sessions: &SessionsIndex,
    milestones: &MilestonesIndex,
    chain: &ChainStore,
    conversation_id: &str,
) -> Result<Vec<String>, IndexError> {
    let removed_ids = sessions.delete_conversation(conversation_id)?;
    if !removed_ids.is_empty() {
        milestones.delete_for_sessions(&removed_ids)?;
        for session_id in &removed_ids {
            chain
                .delete_sealed(session_id)
                .map_err(|err| IndexError::Io(std::io::Error::new(std::io::ErrorKind::Other, err.to_string())))?;
        }
    }
    Ok(removed_ids)
}

/// `delete_milestone(milestone_id)`: remove from the milestones index only.
pub fn delete_milestone(milestones: &MilestonesIndex, milestone_id: &str) -> Result<bool, IndexError> {
    milestones.delete(milestone_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SealVariant;

    fn seal_ending(session_id: &str, ended_at: &str, languages: Vec<String>) -> SessionSeal {
        SessionSeal {
            session_id: session_id.to_string(),
            conversation_id: "conv-1".to_string(),
            conversation_index: 0,
            client: "example-ide".to_string(),
            task_type: "coding".to_string(),
            project: None,
            title: None,
            private_title: None,
            model: None,
            prompt_summary: None,
            started_at: ended_at.to_string(),
            ended_at: ended_at.to_string(),
            duration_seconds: 120,
            record_count: 3,
            heartbeat_count: 1,
            languages,
            files_touched: 1,
            chain_start_hash: "GENESIS".to_string(),
            chain_end_hash: "abc".to_string(),
            seal_signature: String::new(),
            evaluation: None,
            variant: SealVariant::Organic,
        }
    }

    #[test]
    fn stats_fold_duration_and_language_counts() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = SessionsIndex::open(dir.path().join("sessions.json"));
        let now = Local::now().to_rfc3339();
        sessions.upsert(seal_ending("s1", &now, vec!["rust".to_string()])).unwrap();
        sessions.upsert(seal_ending("s2", &now, vec!["rust".to_string(), "go".to_string()])).unwrap();

        let stats = compute_stats(&sessions).unwrap();
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.total_duration_seconds, 240);
        assert_eq!(stats.by_language.get("rust"), Some(&2));
        assert_eq!(stats.by_language.get("go"), Some(&1));
        assert_eq!(stats.streak_days, 1);
    }

    #[test]
    fn streak_is_zero_with_no_recent_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = SessionsIndex::open(dir.path().join("sessions.json"));
        let old = "2020-01-01T00:00:00+00:00";
        sessions.upsert(seal_ending("s1", old, vec![])).unwrap();
        let stats = compute_stats(&sessions).unwrap();
        assert_eq!(stats.streak_days, 0);
    }

    #[test]
    fn delete_session_cascades_to_milestones() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = SessionsIndex::open(dir.path().join("sessions.json"));
        let milestones = MilestonesIndex::open(dir.path().join("milestones.json"));
        let chain = ChainStore::open(dir.path().join("data")).unwrap();

        sessions.upsert(seal_ending("s1", &Local::now().to_rfc3339(), vec![])).unwrap();
        milestones
            .append(Milestone {
                id: "m1".to_string(),
                session_id: "s1".to_string(),
                category: crate::chain::MilestoneCategory::Feature,
                complexity: crate::chain::MilestoneComplexity::Simple,
                title: "Add search".to_string(),
                private_title: None,
                duration_minutes: 10,
                languages: vec![],
                client: "example-ide".to_string(),
                created_at: Local::now().to_rfc3339(),
                chain_hash: "abc".to_string(),
            })
            .unwrap();

        assert!(delete_session(&sessions, &milestones, &chain, "s1").unwrap());
        assert!(sessions.get("s1").unwrap().is_none());
        assert!(milestones.list().unwrap().is_empty());
        assert!(!delete_session(&sessions, &milestones, &chain, "s1").unwrap());
    }
}
