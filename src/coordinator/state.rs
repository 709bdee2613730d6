use std::sync::Arc;

use crate::chain::ChainStore;
use crate::config::DaemonConfig;
use crate::index::{ConnectionMap, MilestonesIndex, SessionsIndex};
use crate::keystore::Keystore;
use crate::registry::SessionRegistry;

use super::CoordinatorDeps;

/// All mutable state owned by the coordinator actor task.
pub struct CoordinatorState {
    pub registry: SessionRegistry,
    pub chain: ChainStore,
    pub keystore: Arc<Keystore>,
    pub sessions_index: SessionsIndex,
    pub milestones_index: MilestonesIndex,
    pub connection_map: ConnectionMap,
    pub config: DaemonConfig,
}

impl CoordinatorState {
    pub fn new(deps: CoordinatorDeps) -> Self {
        Self {
            registry: SessionRegistry::new(),
            chain: deps.chain,
            keystore: deps.keystore,
            sessions_index: deps.sessions_index,
            milestones_index: deps.milestones_index,
            connection_map: deps.connection_map,
            config: deps.config,
        }
    }

    pub fn now_iso(&self) -> String {
        chrono::Utc::now().to_rfc3339()
    }
}
