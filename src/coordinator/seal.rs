use crate::chain::ChainRecord;
use crate::model::{SealVariant, SessionSeal};
use crate::registry::SessionContext;

/// Build a [`SessionSeal`] from a live in-memory context plus the freshly
/// appended `session_seal` record's own hash (becomes `chain_end_hash`).
///
/// `record_count` is taken as an explicit parameter rather than read off
/// `ctx` because the seal record itself hasn't been appended yet when this
/// runs (its signature covers the seal value, so it can't exist first) — the
/// caller passes `ctx.record_count + 1` to account for it (spec.md §8: the
/// happy path's seal carries `record_count = 6`, counting itself).
#[allow(clippy::too_many_arguments)]
pub fn from_context(
    ctx: &SessionContext,
    ended_at: &str,
    duration_seconds: u64,
    record_count: u64,
    languages: Vec<String>,
    files_touched: u64,
    evaluation: Option<serde_json::Value>,
    seal_signature: String,
    chain_end_hash: String,
    variant: SealVariant,
) -> SessionSeal {
    SessionSeal {
        session_id: ctx.session_id.clone(),
        conversation_id: ctx.conversation_id.clone(),
        conversation_index: ctx.conversation_index,
        client: ctx.client.clone(),
        task_type: ctx.task_type.clone(),
        project: ctx.project.clone(),
        title: ctx.title.clone(),
        private_title: ctx.private_title.clone(),
        model: ctx.model.clone(),
        prompt_summary: ctx.prompt_summary.clone(),
        started_at: ctx.started_at.to_rfc3339(),
        ended_at: ended_at.to_string(),
        duration_seconds,
        record_count,
        heartbeat_count: ctx.heartbeat_count,
        languages,
        files_touched,
        chain_start_hash: ctx.chain_start_hash.clone(),
        chain_end_hash,
        seal_signature,
        evaluation,
        variant,
    }
}

/// Reconstruct the best-effort session metadata for a chain file with no
/// live in-memory context (the orphan-sweep path). Reads whatever prefix of
/// the chain parsed; tolerant of a file containing only a `session_start`.
pub struct OrphanSummary {
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
    pub started_at: String,
    pub heartbeat_count: u64,
}

pub fn summarize_orphan(session_id: &str, records: &[ChainRecord]) -> Option<OrphanSummary> {
    let first = records.first()?;
    let start: crate::chain::SessionStartPayload = serde_json::from_value(first.data.clone()).ok()?;
    let heartbeat_count = records
        .iter()
        .filter(|r| matches!(r.record_type, crate::chain::RecordType::Heartbeat))
        .count() as u64;
    Some(OrphanSummary {
        session_id: session_id.to_string(),
        conversation_id: start.conversation_id,
        conversation_index: start.conversation_index.unwrap_or(start.server_conversation_index),
        client: start.client,
        task_type: start.task_type,
        project: start.project,
        title: start.title,
        private_title: start.private_title,
        model: start.model,
        prompt_summary: start.prompt_summary,
        started_at: first.timestamp.clone(),
        heartbeat_count,
    })
}
