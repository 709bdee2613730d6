//! In-memory session registry: connection id → session context.
//!
//! Owned exclusively by the lifecycle coordinator's actor task (see
//! `crate::coordinator`), so it needs no internal locking of its own — all
//! mutation is already serialized by virtue of running inside that task's
//! single-threaded command loop.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::chain::GENESIS;

/// One paused frame for a nested tool-initiated sub-session.
///
/// On push (entering a child session) the parent records `paused_at`; on pop
/// (the child seals) the elapsed wall-clock time is folded into
/// `paused_ms_accumulator` so cumulative-seconds math excludes time spent in
/// the child.
#[derive(Debug, Clone)]
pub struct PausedFrame {
    pub paused_at: DateTime<Utc>,
    pub snapshot_tip_hash: String,
}

/// In-memory state for one open session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub conversation_id: String,
    pub conversation_index: u64,
    pub client: String,
    pub task_type: String,
    pub project: Option<String>,
    pub title: Option<String>,
    pub private_title: Option<String>,
    pub model: Option<String>,
    pub prompt_summary: Option<String>,
    /// Hash of the first record appended to this session's chain.
    pub chain_start_hash: String,
    pub chain_tip_hash: String,
    pub record_count: u64,
    pub heartbeat_count: u64,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub paused_ms_accumulator: i64,
    pub connection_id: String,
    pub parent_stack: Vec<PausedFrame>,
}

impl SessionContext {
    /// `cumulative_seconds` for a heartbeat: wall-clock elapsed since start,
    /// minus accumulated paused time from nested sub-sessions.
    pub fn cumulative_seconds(&self, now: DateTime<Utc>) -> u64 {
        let elapsed_ms = (now - self.started_at).num_milliseconds();
        let net_ms = (elapsed_ms - self.paused_ms_accumulator).max(0);
        (net_ms / 1000) as u64
    }

    /// Push a paused frame when a child sub-session starts.
    pub fn pause_for_child(&mut self, now: DateTime<Utc>) {
        self.parent_stack.push(PausedFrame {
            paused_at: now,
            snapshot_tip_hash: self.chain_tip_hash.clone(),
        });
    }

    /// Pop the most recent paused frame when a child sub-session seals,
    /// folding elapsed wall-clock time into the accumulator.
    pub fn resume_from_child(&mut self, now: DateTime<Utc>) {
        if let Some(frame) = self.parent_stack.pop() {
            let elapsed_ms = (now - frame.paused_at).num_milliseconds().max(0);
            self.paused_ms_accumulator += elapsed_ms;
        }
    }
}

/// In-memory connection id → session context mapping.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    by_connection: HashMap<String, SessionContext>,
    connection_by_session: HashMap<String, String>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh context for `connection_id` and insert it.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &mut self,
        connection_id: &str,
        session_id: String,
        conversation_id: String,
        conversation_index: u64,
        client: String,
        task_type: String,
        project: Option<String>,
        title: Option<String>,
        private_title: Option<String>,
        model: Option<String>,
        prompt_summary: Option<String>,
        now: DateTime<Utc>,
    ) -> &SessionContext {
        let ctx = SessionContext {
            session_id: session_id.clone(),
            conversation_id,
            conversation_index,
            client,
            task_type,
            project,
            title,
            private_title,
            model,
            prompt_summary,
            chain_start_hash: GENESIS.to_string(),
            chain_tip_hash: GENESIS.to_string(),
            record_count: 0,
            heartbeat_count: 0,
            started_at: now,
            last_activity_at: now,
            paused_ms_accumulator: 0,
            connection_id: connection_id.to_string(),
            parent_stack: Vec::new(),
        };
        self.connection_by_session.insert(session_id, connection_id.to_string());
        self.by_connection.insert(connection_id.to_string(), ctx);
        self.by_connection.get(connection_id).expect("just inserted")
    }

    /// Update `last_activity_at` for a connection's context, if present.
    pub fn touch(&mut self, connection_id: &str, now: DateTime<Utc>) {
        if let Some(ctx) = self.by_connection.get_mut(connection_id) {
            ctx.last_activity_at = now;
        }
    }

    pub fn get(&self, connection_id: &str) -> Option<&SessionContext> {
        self.by_connection.get(connection_id)
    }

    pub fn get_mut(&mut self, connection_id: &str) -> Option<&mut SessionContext> {
        self.by_connection.get_mut(connection_id)
    }

    pub fn get_by_session_id(&self, session_id: &str) -> Option<&SessionContext> {
        self.connection_by_session
            .get(session_id)
            .and_then(|conn| self.by_connection.get(conn))
    }

    /// Record the result of an append: bump the chain tip and record count.
    /// The first append for a context also fixes `chain_start_hash`.
    pub fn record_append(&mut self, connection_id: &str, new_tip_hash: String) {
        if let Some(ctx) = self.by_connection.get_mut(connection_id) {
            if ctx.record_count == 0 {
                ctx.chain_start_hash = new_tip_hash.clone();
            }
            ctx.chain_tip_hash = new_tip_hash;
            ctx.record_count += 1;
        }
    }

    /// Remove and return the context for a connection, if present.
    pub fn remove(&mut self, connection_id: &str) -> Option<SessionContext> {
        let ctx = self.by_connection.remove(connection_id)?;
        self.connection_by_session.remove(&ctx.session_id);
        Some(ctx)
    }

    /// All currently-registered connection ids (used by the idle sweep).
    pub fn connection_ids(&self) -> Vec<String> {
        self.by_connection.keys().cloned().collect()
    }

    /// True if a session id currently has a live in-memory context.
    pub fn contains_session_id(&self, session_id: &str) -> bool {
        self.connection_by_session.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.by_connection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_connection.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn create_then_touch_updates_last_activity() {
        let mut reg = SessionRegistry::new();
        let t0 = Utc::now();
        reg.create(
            "conn-1",
            "sess-1".to_string(),
            "conv-1".to_string(),
            0,
            "example-ide".to_string(),
            "coding".to_string(),
            None,
            None,
            None,
            None,
            None,
            t0,
        );
        let t1 = t0 + Duration::seconds(30);
        reg.touch("conn-1", t1);
        assert_eq!(reg.get("conn-1").unwrap().last_activity_at, t1);
    }

    #[test]
    fn remove_clears_both_indices() {
        let mut reg = SessionRegistry::new();
        let t0 = Utc::now();
        reg.create(
            "conn-1", "sess-1".to_string(), "conv-1".to_string(), 0,
            "c".to_string(), "coding".to_string(), None, None, None, None, None, t0,
        );
        assert!(reg.contains_session_id("sess-1"));
        reg.remove("conn-1");
        assert!(!reg.contains_session_id("sess-1"));
        assert!(reg.get("conn-1").is_none());
    }

    #[test]
    fn nested_sub_session_excludes_paused_time_from_cumulative_seconds() {
        let mut reg = SessionRegistry::new();
        let t0 = Utc::now();
        reg.create(
            "conn-1", "sess-1".to_string(), "conv-1".to_string(), 0,
            "c".to_string(), "coding".to_string(), None, None, None, None, None, t0,
        );
        let ctx = reg.get_mut("conn-1").unwrap();
        let t_pause = t0 + Duration::seconds(10);
        ctx.pause_for_child(t_pause);
        let t_resume = t_pause + Duration::seconds(20);
        ctx.resume_from_child(t_resume);

        let t_now = t0 + Duration::seconds(40);
        // 40s elapsed total, 20s paused => 20s net.
        assert_eq!(ctx.cumulative_seconds(t_now), 20);
    }
}
