//! Lifecycle coordinator: the protocol engine behind `session_start`,
//! `useai_heartbeat`, and `session_end`, plus the internal auto-seal, orphan
//! sweep, and ConnectionMap GC background duties.
//!
//! One `tokio::spawn`ed task owns all mutable coordinator state (the session
//! registry plus handles to the on-disk stores) and drains a single command
//! channel — grounded on `runtime/mod.rs`'s actor loop. Every handler runs
//! its disk I/O synchronously to completion before the next command is
//! dequeued, so all mutation is already totally ordered: no per-session lock
//! map is needed on top of that, unlike a multi-threaded design would
//! require.

mod ops;
mod seal;
mod state;
mod sweep;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::chain::{MilestoneCategory, MilestoneComplexity};
use crate::config::DaemonConfig;
use crate::error::CoordinatorError;
use crate::index::{ConnectionMap, MilestonesIndex, SessionsIndex};
use crate::keystore::Keystore;
use crate::model::SessionSeal;

pub use state::CoordinatorState;

/// Idle timeout before a context is auto-sealed (spec.md §5: 30 minutes).
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Orphan sweep period (spec.md §4.4.2).
pub const ORPHAN_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);
/// Tick period for the idle-expiry check.
pub const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(1);
/// ConnectionMap GC period (daily; retention itself is 30 days, §9).
pub const CONNECTION_MAP_GC_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
/// ConnectionMap entry retention for sealed sessions (Open Question default).
pub const CONNECTION_MAP_RETENTION_DAYS: i64 = 30;

/// Client-supplied `session_start` metadata.
#[derive(Debug, Clone, Default)]
pub struct SessionStartParams {
    pub client: String,
    pub task_type: String,
    pub project: Option<String>,
    pub title: Option<String>,
    pub private_title: Option<String>,
    pub model: Option<String>,
    pub prompt_summary: Option<String>,
    pub conversation_id: Option<String>,
    pub conversation_index: Option<u64>,
}

/// One client-declared milestone, carried by `session_end`.
#[derive(Debug, Clone)]
pub struct MilestoneInput {
    pub title: String,
    pub private_title: Option<String>,
    pub category: MilestoneCategory,
    pub complexity: MilestoneComplexity,
    pub duration_minutes: u64,
    pub languages: Vec<String>,
}

/// Client-supplied `session_end` payload.
#[derive(Debug, Clone, Default)]
pub struct SessionEndParams {
    pub languages: Vec<String>,
    pub files_touched: u64,
    pub evaluation: Option<Value>,
    pub milestones: Vec<MilestoneInput>,
}

#[derive(Debug, Clone)]
pub struct SessionStartOutcome {
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct HeartbeatOutcome {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct SessionEndOutcome {
    pub session_id: String,
    pub seal: SessionSeal,
}

enum Command {
    SessionStart {
        connection_id: String,
        params: SessionStartParams,
        reply: oneshot::Sender<Result<SessionStartOutcome, CoordinatorError>>,
    },
    Heartbeat {
        connection_id: String,
        reply: oneshot::Sender<Result<HeartbeatOutcome, CoordinatorError>>,
    },
    SessionEnd {
        connection_id: String,
        params: SessionEndParams,
        reply: oneshot::Sender<Result<SessionEndOutcome, CoordinatorError>>,
    },
    SealActive {
        reply: oneshot::Sender<usize>,
    },
    DeleteSession {
        session_id: String,
        reply: oneshot::Sender<Result<bool, CoordinatorError>>,
    },
    DeleteConversation {
        conversation_id: String,
        reply: oneshot::Sender<Result<Vec<String>, CoordinatorError>>,
    },
    DeleteMilestone {
        milestone_id: String,
        reply: oneshot::Sender<Result<bool, CoordinatorError>>,
    },
    UpdateConfig {
        config: DaemonConfig,
    },
    /// Snapshot of in-memory state needed by `GET /health`.
    HealthSnapshot {
        reply: oneshot::Sender<usize>,
    },
    IdleCheckTick,
    OrphanSweepTick,
    ConnectionMapGcTick,
    /// Daemon shutdown: seal every live context with no persisted
    /// ConnectionMap entry before the process exits (spec.md §9).
    ShutdownSweep {
        reply: oneshot::Sender<()>,
    },
}

/// Handle for sending lifecycle commands to the spawned coordinator actor.
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<Command>,
}

impl CoordinatorHandle {
    pub async fn session_start(
        &self,
        connection_id: String,
        params: SessionStartParams,
    ) -> Result<SessionStartOutcome, CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SessionStart { connection_id, params, reply }).await;
        rx.await.unwrap_or(Err(CoordinatorError::UnknownSession))
    }

    pub async fn heartbeat(&self, connection_id: String) -> Result<HeartbeatOutcome, CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Heartbeat { connection_id, reply }).await;
        rx.await.unwrap_or(Err(CoordinatorError::UnknownSession))
    }

    pub async fn session_end(
        &self,
        connection_id: String,
        params: SessionEndParams,
    ) -> Result<SessionEndOutcome, CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SessionEnd { connection_id, params, reply }).await;
        rx.await.unwrap_or(Err(CoordinatorError::UnknownSession))
    }

    /// Synchronously auto-seal every in-memory session with a nonzero record
    /// count (`POST /seal-active`); returns how many were sealed.
    pub async fn seal_active(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SealActive { reply }).await;
        rx.await.unwrap_or(0)
    }

    pub async fn delete_session(&self, session_id: String) -> Result<bool, CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::DeleteSession { session_id, reply }).await;
        rx.await.unwrap_or(Err(CoordinatorError::UnknownSession))
    }

    pub async fn delete_conversation(&self, conversation_id: String) -> Result<Vec<String>, CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::DeleteConversation { conversation_id, reply }).await;
        rx.await.unwrap_or(Err(CoordinatorError::UnknownSession))
    }

    pub async fn delete_milestone(&self, milestone_id: String) -> Result<bool, CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::DeleteMilestone { milestone_id, reply }).await;
        rx.await.unwrap_or(Err(CoordinatorError::UnknownSession))
    }

    /// Replace the coordinator's in-memory config (after `POST /config` has
    /// already persisted it to disk).
    pub async fn update_config(&self, config: DaemonConfig) {
        self.send(Command::UpdateConfig { config }).await;
    }

    /// Number of live in-memory session contexts, for `GET /health`.
    pub async fn open_connections(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.send(Command::HealthSnapshot { reply }).await;
        rx.await.unwrap_or(0)
    }

    /// Run the shutdown sweep (seal unmapped live sessions) and wait for it
    /// to finish before the caller lets the process exit.
    pub async fn shutdown_sweep(&self) {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ShutdownSweep { reply }).await;
        let _ = rx.await;
    }

    async fn send(&self, command: Command) {
        let _ = self.commands.send(command).await;
    }
}

/// Dependencies needed to run the coordinator actor.
pub struct CoordinatorDeps {
    pub chain: crate::chain::ChainStore,
    pub keystore: Arc<Keystore>,
    pub sessions_index: SessionsIndex,
    pub milestones_index: MilestonesIndex,
    pub connection_map: ConnectionMap,
    pub config: DaemonConfig,
}

/// Spawn the coordinator actor and its periodic background tasks.
pub fn spawn(deps: CoordinatorDeps) -> CoordinatorHandle {
    let (tx, mut rx) = mpsc::channel::<Command>(256);

    tokio::spawn({
        let tx = tx.clone();
        async move {
            let mut ticker = tokio::time::interval(IDLE_CHECK_INTERVAL);
            loop {
                ticker.tick().await;
                if tx.send(Command::IdleCheckTick).await.is_err() {
                    break;
                }
            }
        }
    });
    tokio::spawn({
        let tx = tx.clone();
        async move {
            // Run once at startup (spec.md §4.4.2), then every interval.
            if tx.send(Command::OrphanSweepTick).await.is_err() {
                return;
            }
            let mut ticker = tokio::time::interval(ORPHAN_SWEEP_INTERVAL);
            ticker.tick().await; // first tick fires immediately; skip it, we already swept.
            loop {
                ticker.tick().await;
                if tx.send(Command::OrphanSweepTick).await.is_err() {
                    break;
                }
            }
        }
    });
    tokio::spawn({
        let tx = tx.clone();
        async move {
            let mut ticker = tokio::time::interval(CONNECTION_MAP_GC_INTERVAL);
            loop {
                ticker.tick().await;
                if tx.send(Command::ConnectionMapGcTick).await.is_err() {
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        let mut state = CoordinatorState::new(deps);
        while let Some(command) = rx.recv().await {
            handle_command(&mut state, command);
        }
    });

    CoordinatorHandle { commands: tx }
}

fn handle_command(state: &mut CoordinatorState, command: Command) {
    match command {
        Command::SessionStart { connection_id, params, reply } => {
            let result = ops::session_start(state, &connection_id, params);
            let _ = reply.send(result);
        }
        Command::Heartbeat { connection_id, reply } => {
            let result = ops::heartbeat(state, &connection_id);
            let _ = reply.send(result);
        }
        Command::SessionEnd { connection_id, params, reply } => {
            let result = ops::session_end(state, &connection_id, params);
            let _ = reply.send(result);
        }
        Command::SealActive { reply } => {
            let count = sweep::seal_active(state);
            let _ = reply.send(count);
        }
        Command::DeleteSession { session_id, reply } => {
            let result = crate::query::delete_session(&state.sessions_index, &state.milestones_index, &state.chain, &session_id)
                .map_err(CoordinatorError::from);
            let _ = reply.send(result);
        }
        Command::DeleteConversation { conversation_id, reply } => {
            let result = crate::query::delete_conversation(
                &state.sessions_index,
                &state.milestones_index,
                &state.chain,
                &conversation_id,
            )
            .map_err(CoordinatorError::from);
            let _ = reply.send(result);
        }
        Command::DeleteMilestone { milestone_id, reply } => {
            let result = crate::query::delete_milestone(&state.milestones_index, &milestone_id).map_err(CoordinatorError::from);
            let _ = reply.send(result);
        }
        Command::UpdateConfig { config } => {
            state.config = config;
        }
        Command::HealthSnapshot { reply } => {
            let _ = reply.send(state.registry.len());
        }
        Command::IdleCheckTick => sweep::idle_check(state),
        Command::OrphanSweepTick => sweep::orphan_sweep(state),
        Command::ConnectionMapGcTick => sweep::connection_map_gc(state),
        Command::ShutdownSweep { reply } => {
            sweep::shutdown_sweep(state);
            let _ = reply.send(());
        }
    }
}

/// Render a duration in seconds as a short human string (e.g. `"2m 15s"`).
pub(crate) fn humanize_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn humanize_duration_formats_by_magnitude() {
        assert_eq!(humanize_duration(5), "5s");
        assert_eq!(humanize_duration(135), "2m 15s");
        assert_eq!(humanize_duration(3_700), "1h 1m");
    }
}
