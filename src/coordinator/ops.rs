use crate::chain::{
    HeartbeatPayload, MilestonePayload, RecordType, SessionEndPayload, SessionSealPayload,
    SessionStartPayload, GENESIS,
};
use crate::error::CoordinatorError;
use crate::model::{choose_richer, Milestone, SealVariant};

use super::state::CoordinatorState;
use super::{humanize_duration, seal, HeartbeatOutcome, MilestoneInput, SessionEndOutcome, SessionEndParams, SessionStartOutcome, SessionStartParams};

fn next_conversation_index(state: &CoordinatorState, conversation_id: &str) -> Result<u64, CoordinatorError> {
    let max_existing = state
        .sessions_index
        .list()?
        .into_iter()
        .filter(|s| s.conversation_id == conversation_id)
        .map(|s| s.conversation_index)
        .max();
    Ok(max_existing.map(|idx| idx + 1).unwrap_or(0))
}

pub fn session_start(
    state: &mut CoordinatorState,
    connection_id: &str,
    params: SessionStartParams,
) -> Result<SessionStartOutcome, CoordinatorError> {
    // If an existing in-memory context is present and non-empty, first drive
    // it to Sealed using the auto-seal path.
    if state.registry.get(connection_id).map(|ctx| ctx.record_count > 0).unwrap_or(false) {
        super::sweep::auto_seal_connection(state, connection_id);
        return start_fresh_session(state, connection_id, params, false);
    }

    // No live context, but the daemon may have restarted with this
    // connection's previous session still sitting in `active/` — seal it
    // from disk before starting fresh, and mark the new session recovered.
    if let Some(entry) = state.connection_map.get(connection_id)? {
        if state.chain.file_state(&entry.session_id) == crate::chain::FileState::Active {
            super::sweep::seal_orphan(state, &entry.session_id);
            return start_fresh_session(state, connection_id, params, true);
        }
    }

    start_fresh_session(state, connection_id, params, false)
}

/// Shared by the organic `session_start` path and stale-connection recovery
/// (§4.4.3's `session_start` sub-case), which only differs by `recovered`.
pub fn start_fresh_session(
    state: &mut CoordinatorState,
    connection_id: &str,
    params: SessionStartParams,
    recovered: bool,
) -> Result<SessionStartOutcome, CoordinatorError> {
    let session_id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now();
    let now_iso = now.to_rfc3339();

    let conversation_id = params.conversation_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let server_conversation_index = next_conversation_index(state, &conversation_id)?;
    let effective_index = params.conversation_index.unwrap_or(server_conversation_index);

    let payload = SessionStartPayload {
        client: params.client.clone(),
        task_type: params.task_type.clone(),
        project: params.project.clone(),
        title: params.title.clone(),
        private_title: params.private_title.clone(),
        model: params.model.clone(),
        prompt_summary: params.prompt_summary.clone(),
        conversation_id: conversation_id.clone(),
        conversation_index: params.conversation_index,
        server_conversation_index,
        recovered,
    };
    let data = serde_json::to_value(&payload).expect("SessionStartPayload always serializes");
    let record = state
        .chain
        .append_record(&session_id, RecordType::SessionStart, data, GENESIS, &now_iso, &state.keystore)?;

    state.registry.create(
        connection_id,
        session_id.clone(),
        conversation_id,
        effective_index,
        params.client,
        params.task_type,
        params.project,
        params.title,
        params.private_title,
        params.model,
        params.prompt_summary,
        now,
    );
    state.registry.record_append(connection_id, record.hash);
    state.connection_map.set(connection_id, &session_id, &now_iso)?;

    let message = if recovered {
        format!("Recovered session {session_id} after restart")
    } else {
        format!("Started session {session_id}")
    };
    Ok(SessionStartOutcome { session_id, message })
}

pub fn heartbeat(state: &mut CoordinatorState, connection_id: &str) -> Result<HeartbeatOutcome, CoordinatorError> {
    if state.registry.get(connection_id).is_none() {
        return super::sweep::recover_heartbeat(state, connection_id);
    }

    let now = chrono::Utc::now();
    let now_iso = now.to_rfc3339();
    let ctx = state.registry.get(connection_id).expect("checked above");
    let heartbeat_number = ctx.heartbeat_count + 1;
    let cumulative_seconds = ctx.cumulative_seconds(now);
    let prev_hash = ctx.chain_tip_hash.clone();
    let session_id = ctx.session_id.clone();

    let payload = HeartbeatPayload { heartbeat_number, cumulative_seconds, recovered: false };
    let data = serde_json::to_value(&payload).expect("HeartbeatPayload always serializes");
    let record = state
        .chain
        .append_record(&session_id, RecordType::Heartbeat, data, &prev_hash, &now_iso, &state.keystore)?;

    let ctx = state.registry.get_mut(connection_id).expect("checked above");
    ctx.heartbeat_count = heartbeat_number;
    state.registry.touch(connection_id, now);
    state.registry.record_append(connection_id, record.hash);

    Ok(HeartbeatOutcome { message: humanize_duration(cumulative_seconds) })
}

pub fn session_end(
    state: &mut CoordinatorState,
    connection_id: &str,
    params: SessionEndParams,
) -> Result<SessionEndOutcome, CoordinatorError> {
    if state.registry.get(connection_id).is_none() {
        return super::sweep::recover_session_end(state, connection_id, params);
    }

    let now = chrono::Utc::now();
    finish_session(state, connection_id, params, now, false, false)
}

/// Appends milestones, `session_end`, and `session_seal`; renames to
/// `sealed/`; upserts the index; removes the in-memory context. Shared by
/// the organic path, auto-seal, and stale-connection recovery.
pub fn finish_session(
    state: &mut CoordinatorState,
    connection_id: &str,
    params: SessionEndParams,
    ended_at: chrono::DateTime<chrono::Utc>,
    auto_sealed: bool,
    recovered: bool,
) -> Result<SessionEndOutcome, CoordinatorError> {
    let ended_at_iso = ended_at.to_rfc3339();
    let mut prev_hash = state.registry.get(connection_id).expect("checked by caller").chain_tip_hash.clone();
    let session_id = state.registry.get(connection_id).expect("checked by caller").session_id.clone();

    let mut appended_milestones = Vec::new();
    for milestone in &params.milestones {
        let record = append_milestone(state, &session_id, &prev_hash, milestone)?;
        prev_hash = record.hash.clone();
        appended_milestones.push((milestone.clone(), record.hash));
        state.registry.record_append(connection_id, prev_hash.clone());
    }

    let ctx = state.registry.get(connection_id).expect("checked by caller");
    let duration_seconds = ctx.cumulative_seconds(ended_at);
    let heartbeat_count = ctx.heartbeat_count;

    let end_payload = SessionEndPayload {
        duration_seconds,
        task_type: ctx.task_type.clone(),
        languages: params.languages.clone(),
        files_touched: params.files_touched,
        heartbeat_count,
        auto_sealed,
        recovered,
        evaluation: params.evaluation.clone(),
        model: ctx.model.clone(),
    };
    let end_data = serde_json::to_value(&end_payload).expect("SessionEndPayload always serializes");
    let end_record = state
        .chain
        .append_record(&session_id, RecordType::SessionEnd, end_data, &prev_hash, &ended_at_iso, &state.keystore)?;
    state.registry.record_append(connection_id, end_record.hash.clone());

    let ctx = state.registry.get(connection_id).expect("checked by caller");
    let variant = if recovered {
        SealVariant::Recovered
    } else if auto_sealed {
        SealVariant::AutoSealed
    } else {
        SealVariant::Organic
    };
    let seal_value = seal::from_context(
        ctx,
        &ended_at_iso,
        duration_seconds,
        ctx.record_count + 1,
        params.languages.clone(),
        params.files_touched,
        params.evaluation.clone(),
        String::new(),
        String::new(),
        variant,
    );
    let canonical = crate::canonical::to_canonical_bytes(&seal_value).expect("seal always serializes");
    let seal_hash = crate::canonical::sha256_hex(&canonical);
    let seal_signature = state.keystore.sign(&seal_hash);

    let seal_payload = SessionSealPayload {
        seal: serde_json::to_value(&seal_value).expect("seal always serializes"),
        seal_signature: seal_signature.clone(),
        auto_sealed,
        recovered,
    };
    let seal_data = serde_json::to_value(&seal_payload).expect("SessionSealPayload always serializes");
    let seal_record = state.chain.append_record(
        &session_id,
        RecordType::SessionSeal,
        seal_data,
        &end_record.hash,
        &ended_at_iso,
        &state.keystore,
    )?;
    state.registry.record_append(connection_id, seal_record.hash.clone());

    state.chain.seal_and_move(&session_id)?;

    let mut final_seal = seal_value;
    final_seal.seal_signature = seal_signature;
    final_seal.chain_end_hash = seal_record.hash;
    state.sessions_index.upsert(final_seal.clone())?;

    if state.config.evaluation.track_milestones {
        for (input, chain_hash) in appended_milestones {
            let milestone = Milestone {
                id: uuid::Uuid::new_v4().to_string(),
                session_id: session_id.clone(),
                category: input.category,
                complexity: input.complexity,
                title: input.title,
                private_title: input.private_title,
                duration_minutes: input.duration_minutes,
                languages: input.languages,
                client: final_seal.client.clone(),
                created_at: ended_at_iso.clone(),
                chain_hash,
            };
            state.milestones_index.append(milestone)?;
        }
    }

    state.registry.remove(connection_id);

    Ok(SessionEndOutcome { session_id, seal: final_seal })
}

fn append_milestone(
    state: &CoordinatorState,
    session_id: &str,
    prev_hash: &str,
    milestone: &MilestoneInput,
) -> Result<crate::chain::ChainRecord, CoordinatorError> {
    let payload = MilestonePayload {
        title: milestone.title.clone(),
        private_title: milestone.private_title.clone(),
        category: milestone.category,
        complexity: milestone.complexity,
        duration_minutes: milestone.duration_minutes,
        languages: milestone.languages.clone(),
    };
    let data = serde_json::to_value(&payload).expect("MilestonePayload always serializes");
    let now_iso = chrono::Utc::now().to_rfc3339();
    Ok(state
        .chain
        .append_record(session_id, RecordType::Milestone, data, prev_hash, &now_iso, &state.keystore)?)
}

/// Reconcile a seal produced from the provided final metadata against
/// whatever the index already holds, returning the richer of the two (used
/// by recovery's "already sealed" sub-case, where no new chain record is
/// appended).
pub fn reconcile_richer(existing: &crate::model::SessionSeal, candidate: crate::model::SessionSeal) -> crate::model::SessionSeal {
    if choose_richer(existing, &candidate) {
        candidate
    } else {
        existing.clone()
    }
}

