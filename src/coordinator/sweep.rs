//! Background duties and stale-connection recovery (spec.md §4.4.2–§4.4.3).

use crate::chain::{FileState, RecordType};
use crate::error::CoordinatorError;
use crate::model::{SealVariant, SessionSeal};

use super::ops;
use super::state::CoordinatorState;
use super::{seal, HeartbeatOutcome, SessionEndParams};

/// Drive a live connection with a non-empty chain to Sealed using whatever
/// metadata is already on hand — no milestones, no evaluation, no extra
/// languages/files beyond what the client already reported. Used by
/// `session_start`'s preemption case and by [`idle_check`].
pub fn auto_seal_connection(state: &mut CoordinatorState, connection_id: &str) {
    let now = chrono::Utc::now();
    let params = SessionEndParams::default();
    let _ = ops::finish_session(state, connection_id, params, now, true, false);
}

/// `POST /seal-active`: seal every in-memory session with at least one
/// appended record. Returns how many were sealed.
pub fn seal_active(state: &mut CoordinatorState) -> usize {
    let connection_ids = state.registry.connection_ids();
    let mut sealed = 0;
    for connection_id in connection_ids {
        if state.registry.get(&connection_id).map(|ctx| ctx.record_count > 0).unwrap_or(false) {
            auto_seal_connection(state, &connection_id);
            sealed += 1;
        }
    }
    sealed
}

/// Scan live contexts for idle expiry (spec.md §5: 30 minutes since last
/// activity) and auto-seal them.
pub fn idle_check(state: &mut CoordinatorState) {
    let now = chrono::Utc::now();
    let idle_connections: Vec<String> = state
        .registry
        .connection_ids()
        .into_iter()
        .filter(|connection_id| {
            state
                .registry
                .get(connection_id)
                .map(|ctx| {
                    ctx.record_count > 0
                        && now.signed_duration_since(ctx.last_activity_at)
                            >= chrono::Duration::from_std(super::IDLE_TIMEOUT).expect("fits")
                })
                .unwrap_or(false)
        })
        .collect();
    for connection_id in idle_connections {
        auto_seal_connection(state, &connection_id);
    }
}

/// Scan `active/` for chain files with no live in-memory context — either
/// left behind by a prior daemon crash, or superseded by a stale-connection
/// recovery that already moved on. Reconstructs session metadata from the
/// file itself and seals it using the last record's own timestamp as the
/// effective end time, never `now()`.
pub fn orphan_sweep(state: &mut CoordinatorState) {
    let Ok(active_ids) = state.chain.active_session_ids() else {
        return;
    };
    for session_id in active_ids {
        if state.registry.contains_session_id(&session_id) {
            continue;
        }
        seal_orphan(state, &session_id);
    }
}

/// Seal a chain file directly from disk, with no live in-memory context.
/// Shared by the periodic [`orphan_sweep`] and by `session_start`'s
/// preemption of a stale active file left by a pre-restart connection.
pub(crate) fn seal_orphan(state: &mut CoordinatorState, session_id: &str) {
    let Ok(records) = state.chain.read_chain(session_id) else {
        return;
    };
    let Some(last) = records.last() else {
        return;
    };

    // The chain already ends in a terminal record (a crash between the seal
    // append and the active->sealed rename) — just finish the move.
    if matches!(last.record_type, RecordType::SessionSeal) {
        let _ = state.chain.seal_and_move(session_id);
        return;
    }

    let Some(summary) = seal::summarize_orphan(session_id, &records) else {
        return;
    };
    let ended_at = last.timestamp.clone();
    let Ok(ended_at_parsed) = chrono::DateTime::parse_from_rfc3339(&ended_at) else {
        return;
    };
    let ended_at_parsed = ended_at_parsed.with_timezone(&chrono::Utc);
    let Ok(started_at_parsed) = chrono::DateTime::parse_from_rfc3339(&summary.started_at) else {
        return;
    };
    let started_at_parsed = started_at_parsed.with_timezone(&chrono::Utc);
    let duration_seconds = (ended_at_parsed - started_at_parsed).num_seconds().max(0) as u64;

    // If the chain doesn't already carry a `session_end`, synthesize one
    // before the seal (boundary case in spec.md §8: a bare `session_start`
    // orphan-sweeps to `record_count = 3` — start + synthesized end + seal).
    let (prev_hash, record_count) = if matches!(last.record_type, RecordType::SessionEnd) {
        (last.hash.clone(), records.len() as u64 + 1)
    } else {
        let end_payload = crate::chain::SessionEndPayload {
            duration_seconds,
            task_type: summary.task_type.clone(),
            languages: Vec::new(),
            files_touched: 0,
            heartbeat_count: summary.heartbeat_count,
            auto_sealed: true,
            recovered: false,
            evaluation: None,
            model: summary.model.clone(),
        };
        let data = serde_json::to_value(&end_payload).expect("SessionEndPayload always serializes");
        let Ok(end_record) = state
            .chain
            .append_record(session_id, RecordType::SessionEnd, data, &last.hash, &ended_at, &state.keystore)
        else {
            return;
        };
        (end_record.hash, records.len() as u64 + 2)
    };

    let chain_start_hash = records.first().map(|r| r.hash.clone()).unwrap_or_default();
    let seal_value = SessionSeal {
        session_id: summary.session_id,
        conversation_id: summary.conversation_id,
        conversation_index: summary.conversation_index,
        client: summary.client,
        task_type: summary.task_type,
        project: summary.project,
        title: summary.title,
        private_title: summary.private_title,
        model: summary.model,
        prompt_summary: summary.prompt_summary,
        started_at: summary.started_at,
        ended_at: ended_at.clone(),
        duration_seconds,
        record_count,
        heartbeat_count: summary.heartbeat_count,
        languages: Vec::new(),
        files_touched: 0,
        chain_start_hash,
        chain_end_hash: prev_hash.clone(),
        seal_signature: String::new(),
        evaluation: None,
        variant: SealVariant::AutoSealed,
    };
    let canonical = crate::canonical::to_canonical_bytes(&seal_value).expect("seal always serializes");
    let seal_hash = crate::canonical::sha256_hex(&canonical);
    let seal_signature = state.keystore.sign(&seal_hash);

    let seal_payload = crate::chain::SessionSealPayload {
        seal: serde_json::to_value(&seal_value).expect("seal always serializes"),
        seal_signature: seal_signature.clone(),
        auto_sealed: true,
        recovered: false,
    };
    let data = serde_json::to_value(&seal_payload).expect("SessionSealPayload always serializes");
    let Ok(record) = state.chain.append_record(
        session_id,
        RecordType::SessionSeal,
        data,
        &prev_hash,
        &ended_at_parsed.to_rfc3339(),
        &state.keystore,
    ) else {
        return;
    };

    let mut final_seal = seal_value;
    final_seal.seal_signature = seal_signature;
    final_seal.chain_end_hash = record.hash;

    let _ = state.chain.seal_and_move(session_id);
    let _ = state.sessions_index.upsert(final_seal);
}

/// Daemon shutdown (SIGTERM/ctrl-c, spec.md §5 "Idle timers" and §9
/// "Graceful shutdown"): seal every live context that has no persisted
/// ConnectionMap entry, since no restarting client could ever reconnect to
/// claim it. Contexts that do have a mapping are left in `active/` so a
/// post-restart `session_end` can still recover them.
pub fn shutdown_sweep(state: &mut CoordinatorState) {
    let connection_ids = state.registry.connection_ids();
    for connection_id in connection_ids {
        let mapped = state.connection_map.get(&connection_id).ok().flatten().is_some();
        if !mapped {
            auto_seal_connection(state, &connection_id);
        }
    }
}

/// Retention sweep for the persisted connection→session map.
pub fn connection_map_gc(state: &mut CoordinatorState) {
    let now = chrono::Utc::now();
    let _ = state
        .connection_map
        .gc_sealed_older_than(super::CONNECTION_MAP_RETENTION_DAYS, now, &state.sessions_index);
}

// ---------------------------------------------------------------------------
// Stale-connection recovery (spec.md §4.4.3)
//
// A connection_id with no live in-memory context can still show up in a
// `session_start` / `useai_heartbeat` / `session_end` call after a daemon
// restart wiped the registry. The persisted ConnectionMap plus the chain
// file's own on-disk state are enough to recover gracefully in all three
// cases, without ever losing a client's call.
// ---------------------------------------------------------------------------

/// `useai_heartbeat` on an unknown connection. If the ConnectionMap points
/// at a session whose chain file is still in `active/`, silently re-adopt
/// it as a recovered context (the daemon restarted mid-session and this
/// heartbeat is the first sign of life since); if the file is already
/// sealed, acknowledge without appending (the caller just hasn't heard
/// back yet); with no mapping at all, there is nothing to attach to and the
/// call reports unknown.
pub fn recover_heartbeat(state: &mut CoordinatorState, connection_id: &str) -> Result<HeartbeatOutcome, CoordinatorError> {
    let Some(entry) = state.connection_map.get(connection_id)? else {
        return Err(CoordinatorError::UnknownSession);
    };
    match state.chain.file_state(&entry.session_id) {
        FileState::Active => {
            readopt_active_session(state, connection_id, &entry.session_id)?;
            ops::heartbeat(state, connection_id)
        }
        // Already sealed: no new record, just acknowledge (spec.md §8 seed
        // scenario 6 — a stale heartbeat is not an error).
        FileState::Sealed => Ok(HeartbeatOutcome { message: "Session already ended".to_string() }),
        FileState::Missing => Err(CoordinatorError::UnknownSession),
    }
}

/// `session_end` on an unknown connection (§4.4.3's `session_end` sub-case).
///
/// - ConnectionMap points at a still-active chain file: re-adopt it, then
///   run the normal `finish_session` path so the caller's milestones and
///   final metadata land on the chain before sealing.
/// - ConnectionMap points at an already-sealed session: nothing to append;
///   reconcile the caller's metadata against the existing seal by richness
///   and return whichever is richer, without mutating the chain.
/// - No mapping at all: unknown.
pub fn recover_session_end(
    state: &mut CoordinatorState,
    connection_id: &str,
    params: SessionEndParams,
) -> Result<super::SessionEndOutcome, CoordinatorError> {
    let Some(entry) = state.connection_map.get(connection_id)? else {
        return Err(CoordinatorError::UnknownSession);
    };
    match state.chain.file_state(&entry.session_id) {
        FileState::Active => {
            readopt_active_session(state, connection_id, &entry.session_id)?;
            let now = chrono::Utc::now();
            ops::finish_session(state, connection_id, params, now, false, true)
        }
        FileState::Sealed => {
            let Some(existing) = state.sessions_index.get(&entry.session_id)? else {
                return Err(CoordinatorError::UnknownSession);
            };
            let reconciled = reconcile_sealed_end(&existing, &params);
            let changed = state.sessions_index.upsert(reconciled.clone())?;
            let final_seal = if changed {
                reconciled
            } else {
                existing
            };
            Ok(super::SessionEndOutcome { session_id: final_seal.session_id.clone(), seal: final_seal })
        }
        FileState::Missing => Err(CoordinatorError::UnknownSession),
    }
}

/// Reconstruct an in-memory context for a chain file left in `active/` by a
/// prior daemon instance, then re-register it under `connection_id` so the
/// normal append path can resume.
fn readopt_active_session(
    state: &mut CoordinatorState,
    connection_id: &str,
    session_id: &str,
) -> Result<(), CoordinatorError> {
    let records = state.chain.read_chain(session_id)?;
    let Some(summary) = seal::summarize_orphan(session_id, &records) else {
        return Err(CoordinatorError::UnknownSession);
    };
    let started_at = chrono::DateTime::parse_from_rfc3339(&summary.started_at)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now());

    let ctx = state.registry.create(
        connection_id,
        session_id.to_string(),
        summary.conversation_id,
        summary.conversation_index,
        summary.client,
        summary.task_type,
        summary.project,
        summary.title,
        summary.private_title,
        summary.model,
        summary.prompt_summary,
        started_at,
    );
    let _ = ctx;

    let chain_start_hash = records.first().map(|r| r.hash.clone()).unwrap_or_default();
    let chain_tip_hash = records.last().map(|r| r.hash.clone()).unwrap_or_else(|| crate::chain::GENESIS.to_string());
    if let Some(ctx) = state.registry.get_mut(connection_id) {
        ctx.chain_start_hash = chain_start_hash;
        ctx.chain_tip_hash = chain_tip_hash;
        ctx.record_count = records.len() as u64;
        ctx.heartbeat_count = summary.heartbeat_count;
    }

    let now_iso = chrono::Utc::now().to_rfc3339();
    state.connection_map.set(connection_id, session_id, &now_iso)?;
    Ok(())
}

fn reconcile_sealed_end(existing: &SessionSeal, params: &SessionEndParams) -> SessionSeal {
    let mut candidate = existing.clone();
    if !params.languages.is_empty() {
        candidate.languages = params.languages.clone();
    }
    if params.files_touched > 0 {
        candidate.files_touched = params.files_touched;
    }
    if params.evaluation.is_some() {
        candidate.evaluation = params.evaluation.clone();
    }
    ops::reconcile_richer(existing, candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainStore;
    use crate::config::DaemonConfig;
    use crate::index::{ConnectionMap, MilestonesIndex, SessionsIndex};
    use crate::keystore::Keystore;
    use std::sync::Arc;

    fn test_state() -> (CoordinatorState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let chain = ChainStore::open(dir.path().join("data")).unwrap();
        let keystore = Arc::new(Keystore::load_or_generate(dir.path().join("keystore.json")).unwrap());
        let sessions_index = SessionsIndex::open(dir.path().join("sessions.json"));
        let milestones_index = MilestonesIndex::open(dir.path().join("milestones.json"));
        let connection_map = ConnectionMap::open(dir.path().join("connection_map.json"));
        let deps = super::super::CoordinatorDeps {
            chain,
            keystore,
            sessions_index,
            milestones_index,
            connection_map,
            config: DaemonConfig::default(),
        };
        (CoordinatorState::new(deps), dir)
    }

    #[test]
    fn idle_check_seals_contexts_past_the_idle_timeout() {
        let (mut state, _dir) = test_state();
        let params = SessionStartParams {
            client: "example-ide".to_string(),
            task_type: "coding".to_string(),
            ..Default::default()
        };
        let outcome = ops::session_start(&mut state, "conn-1", params).unwrap();
        // Force the context far enough into the past to be idle.
        if let Some(ctx) = state.registry.get_mut("conn-1") {
            ctx.last_activity_at -= chrono::Duration::minutes(31);
        }
        idle_check(&mut state);
        assert!(state.registry.get("conn-1").is_none());
        assert!(state.sessions_index.get(&outcome.session_id).unwrap().is_some());
    }

    #[test]
    fn orphan_sweep_seals_a_leftover_active_file_with_no_live_context() {
        let (mut state, _dir) = test_state();
        let params = SessionStartParams {
            client: "example-ide".to_string(),
            task_type: "coding".to_string(),
            ..Default::default()
        };
        let outcome = ops::session_start(&mut state, "conn-1", params).unwrap();
        // Simulate a restart: drop the in-memory context but leave the file.
        state.registry.remove("conn-1");

        orphan_sweep(&mut state);

        assert_eq!(state.chain.file_state(&outcome.session_id), FileState::Sealed);
        assert!(state.sessions_index.get(&outcome.session_id).unwrap().is_some());
    }

    #[test]
    fn shutdown_sweep_seals_only_unmapped_contexts() {
        let (mut state, dir) = test_state();
        let params = SessionStartParams {
            client: "example-ide".to_string(),
            task_type: "coding".to_string(),
            ..Default::default()
        };
        let mapped = ops::session_start(&mut state, "conn-mapped", params.clone()).unwrap();
        let unmapped = ops::session_start(&mut state, "conn-unmapped", params).unwrap();

        // Simulate a ConnectionMap entry that never made it to disk (e.g. a
        // crash between the chain append and the map write): rewrite the
        // persisted map with only the "mapped" connection present.
        let mut entries = std::collections::BTreeMap::new();
        entries.insert(
            "conn-mapped".to_string(),
            serde_json::json!({"session_id": mapped.session_id, "updated_at": chrono::Utc::now().to_rfc3339()}),
        );
        std::fs::write(dir.path().join("connection_map.json"), serde_json::to_vec_pretty(&entries).unwrap()).unwrap();

        shutdown_sweep(&mut state);

        assert_eq!(state.chain.file_state(&mapped.session_id), FileState::Active);
        assert_eq!(state.chain.file_state(&unmapped.session_id), FileState::Sealed);
        assert!(state.registry.get("conn-mapped").is_some());
        assert!(state.registry.get("conn-unmapped").is_none());
    }

    #[test]
    fn orphan_sweep_of_a_bare_session_start_yields_record_count_three() {
        let (mut state, _dir) = test_state();
        let params = SessionStartParams {
            client: "example-ide".to_string(),
            task_type: "coding".to_string(),
            ..Default::default()
        };
        let outcome = ops::session_start(&mut state, "conn-1", params).unwrap();
        state.registry.remove("conn-1");

        orphan_sweep(&mut state);

        let seal = state.sessions_index.get(&outcome.session_id).unwrap().unwrap();
        assert_eq!(seal.heartbeat_count, 0);
        assert_eq!(seal.record_count, 3);
        assert_eq!(seal.variant, SealVariant::AutoSealed);
        let records = state.chain.read_chain(&outcome.session_id).unwrap();
        assert_eq!(records.len(), 3);
        assert!(matches!(records[1].record_type, RecordType::SessionEnd));
        assert!(matches!(records[2].record_type, RecordType::SessionSeal));
    }

    #[test]
    fn restart_recovery_explicit_end_marks_the_seal_recovered() {
        let (mut state, _dir) = test_state();
        let params = SessionStartParams {
            client: "example-ide".to_string(),
            task_type: "coding".to_string(),
            ..Default::default()
        };
        let outcome = ops::session_start(&mut state, "conn-1", params).unwrap();
        ops::heartbeat(&mut state, "conn-1").unwrap();
        // Simulate a daemon restart: the registry is gone, but the
        // ConnectionMap and the active chain file survive on disk.
        state.registry.remove("conn-1");

        let end_params = SessionEndParams { languages: vec!["go".to_string()], ..Default::default() };
        let end_outcome = recover_session_end(&mut state, "conn-1", end_params).unwrap();

        assert_eq!(end_outcome.session_id, outcome.session_id);
        assert_eq!(end_outcome.seal.variant, SealVariant::Recovered);
        assert_eq!(state.chain.file_state(&outcome.session_id), FileState::Sealed);
        let records = state.chain.read_chain(&outcome.session_id).unwrap();
        assert!(matches!(records.last().unwrap().record_type, RecordType::SessionSeal));
    }

    #[test]
    fn restart_recovery_new_start_preempts_the_stale_session_and_marks_it_recovered() {
        let (mut state, _dir) = test_state();
        let params = SessionStartParams {
            client: "example-ide".to_string(),
            task_type: "coding".to_string(),
            ..Default::default()
        };
        let first = ops::session_start(&mut state, "conn-1", params).unwrap();
        // Simulate a restart before any end call arrived.
        state.registry.remove("conn-1");

        let new_params = SessionStartParams {
            client: "example-ide".to_string(),
            task_type: "coding".to_string(),
            ..Default::default()
        };
        let second = ops::session_start(&mut state, "conn-1", new_params).unwrap();

        assert_ne!(first.session_id, second.session_id);
        assert!(second.message.contains("Recovered"));
        assert_eq!(state.chain.file_state(&first.session_id), FileState::Sealed);
        let first_seal = state.sessions_index.get(&first.session_id).unwrap().unwrap();
        assert_eq!(first_seal.variant, SealVariant::AutoSealed);
        let mapped = state.connection_map.get("conn-1").unwrap().unwrap();
        assert_eq!(mapped.session_id, second.session_id);
    }

    #[test]
    fn stale_heartbeat_after_seal_is_acknowledged_without_appending() {
        let (mut state, _dir) = test_state();
        let params = SessionStartParams {
            client: "example-ide".to_string(),
            task_type: "coding".to_string(),
            ..Default::default()
        };
        let outcome = ops::session_start(&mut state, "conn-1", params).unwrap();
        ops::session_end(&mut state, "conn-1", SessionEndParams::default()).unwrap();
        let before = state.chain.read_chain(&outcome.session_id).unwrap();

        // The connection's registry context is gone (it sealed), but the
        // ConnectionMap entry lingers — a client's retry can still arrive.
        let result = recover_heartbeat(&mut state, "conn-1").unwrap();

        assert_eq!(result.message, "Session already ended");
        let after = state.chain.read_chain(&outcome.session_id).unwrap();
        assert_eq!(before.len(), after.len());
        assert!(matches!(after.last().unwrap().record_type, RecordType::SessionSeal));
    }
}
