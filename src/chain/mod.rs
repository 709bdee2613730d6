//! Hash-chained, append-only session log storage.

mod record;
mod store;

pub use record::{
    ChainRecord, HeartbeatPayload, MilestoneCategory, MilestoneComplexity, MilestonePayload,
    RecordType, SessionEndPayload, SessionSealPayload, SessionStartPayload, GENESIS,
};
pub use store::{genesis_hash, ChainStore, FileState};
