//! Append-only, hash-chained session log storage.
//!
//! Owns two directories, `active/` and `sealed/`. Each file is a
//! line-delimited sequence of [`ChainRecord`]s for one session. Appends are
//! fail-fast (`TransientIO` propagates to the caller, no mutation occurs);
//! reads tolerate empty and truncated trailing lines by skipping them
//! (`MalformedRecord`); `seal_and_move` is an atomic rename, a no-op if the
//! file is already sealed.

use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::canonical;
use crate::error::ChainError;
use crate::keystore::Keystore;

use super::record::{ChainRecord, HashedFields, RecordType, GENESIS};

/// Where a session's chain file currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Active,
    Sealed,
    Missing,
}

/// Append-only storage for session chain files.
#[derive(Clone)]
pub struct ChainStore {
    active_dir: PathBuf,
    sealed_dir: PathBuf,
}

impl ChainStore {
    /// Open (creating if absent) the `active/` and `sealed/` directories
    /// under `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, ChainError> {
        let active_dir = root.as_ref().join("active");
        let sealed_dir = root.as_ref().join("sealed");
        std::fs::create_dir_all(&active_dir)?;
        std::fs::create_dir_all(&sealed_dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            for dir in [&active_dir, &sealed_dir] {
                let _ = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700));
            }
        }
        Ok(Self { active_dir, sealed_dir })
    }

    fn active_path(&self, session_id: &str) -> PathBuf {
        self.active_dir.join(format!("{session_id}.jsonl"))
    }

    fn sealed_path(&self, session_id: &str) -> PathBuf {
        self.sealed_dir.join(format!("{session_id}.jsonl"))
    }

    /// Current location of a session's chain file.
    pub fn file_state(&self, session_id: &str) -> FileState {
        if self.active_path(session_id).exists() {
            FileState::Active
        } else if self.sealed_path(session_id).exists() {
            FileState::Sealed
        } else {
            FileState::Missing
        }
    }

    /// Build, sign, append, and return one chain record.
    ///
    /// `now_iso` and `prev_hash` are supplied by the caller (the coordinator)
    /// so this store stays a pure function of its inputs plus disk state,
    /// matching the "every lifecycle operation expressible as a pure
    /// function of disk state + message + wall clock" design note.
    pub fn append_record(
        &self,
        session_id: &str,
        record_type: RecordType,
        data: Value,
        prev_hash: &str,
        now_iso: &str,
        keystore: &Keystore,
    ) -> Result<ChainRecord, ChainError> {
        let hashed = HashedFields {
            record_type,
            session_id,
            timestamp: now_iso,
            data: &data,
            prev_hash,
        };
        let canonical_bytes = canonical::to_canonical_bytes(&hashed)
            .map_err(|err| ChainError::MalformedRecord { line_number: 0, detail: err.to_string() })?;
        let hash = canonical::sha256_hex(&canonical_bytes);
        let signature = keystore.sign(&hash);

        let record = ChainRecord {
            record_type,
            session_id: session_id.to_string(),
            timestamp: now_iso.to_string(),
            data,
            prev_hash: prev_hash.to_string(),
            hash,
            signature,
        };

        self.append_line(session_id, &record)?;
        Ok(record)
    }

    fn append_line(&self, session_id: &str, record: &ChainRecord) -> Result<(), ChainError> {
        let path = self.active_path(session_id);
        let mut line = serde_json::to_vec(record)
            .map_err(|err| ChainError::MalformedRecord { line_number: 0, detail: err.to_string() })?;
        line.push(b'\n');

        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&path)?;
        file.write_all(&line)?;
        file.sync_data()?;
        Ok(())
    }

    /// Read every record in a session's chain file, in file order.
    ///
    /// Tolerates empty and truncated trailing lines (and any unparsable line
    /// in general) by skipping them — the orphan sweep can still seal a file
    /// using whatever prefix parsed successfully.
    pub fn read_chain(&self, session_id: &str) -> Result<Vec<ChainRecord>, ChainError> {
        let path = match self.file_state(session_id) {
            FileState::Active => self.active_path(session_id),
            FileState::Sealed => self.sealed_path(session_id),
            FileState::Missing => return Ok(Vec::new()),
        };
        let text = std::fs::read_to_string(&path)?;
        let mut records = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<ChainRecord>(trimmed) {
                Ok(record) => records.push(record),
                Err(err) => {
                    tracing::warn!(
                        session_id,
                        line_number = idx + 1,
                        error = %err,
                        "skipping unparsable chain record line"
                    );
                }
            }
        }
        Ok(records)
    }

    /// Move a session's file from `active/` to `sealed/`. No-op if already
    /// sealed. Atomic on the underlying filesystem.
    pub fn seal_and_move(&self, session_id: &str) -> Result<(), ChainError> {
        match self.file_state(session_id) {
            FileState::Sealed | FileState::Missing => Ok(()),
            FileState::Active => {
                std::fs::rename(self.active_path(session_id), self.sealed_path(session_id))?;
                Ok(())
            }
        }
    }

    /// Session ids with a file currently in `active/`.
    pub fn active_session_ids(&self) -> Result<Vec<String>, ChainError> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.active_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    out.push(stem.to_string());
                }
            }
        }
        Ok(out)
    }

    /// Delete a sealed session's chain file (used by the query surface's
    /// delete endpoint). No-op if already absent.
    pub fn delete_sealed(&self, session_id: &str) -> Result<(), ChainError> {
        let path = self.sealed_path(session_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ChainError::from(err)),
        }
    }
}

/// Genesis hash used as `prev_hash` for the first record in a new chain.
pub fn genesis_hash() -> &'static str {
    GENESIS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::record::{MilestoneCategory, MilestoneComplexity};
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    static NEXT: AtomicU64 = AtomicU64::new(1);

    fn test_store() -> (ChainStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let _ = NEXT.fetch_add(1, Ordering::Relaxed);
        let store = ChainStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn test_keystore() -> Keystore {
        let path = std::env::temp_dir().join(format!(
            "useaid-chain-test-keystore-{}.json",
            NEXT.fetch_add(1, Ordering::Relaxed)
        ));
        Keystore::load_or_generate(path).unwrap()
    }

    #[test]
    fn append_then_read_round_trips_in_order() {
        let (store, _dir) = test_store();
        let keystore = test_keystore();

        let r1 = store
            .append_record(
                "s1",
                RecordType::SessionStart,
                json!({"client": "example-ide"}),
                GENESIS,
                "2026-01-01T00:00:00Z",
                &keystore,
            )
            .unwrap();
        let r2 = store
            .append_record(
                "s1",
                RecordType::Heartbeat,
                json!({"heartbeat_number": 1, "cumulative_seconds": 10}),
                &r1.hash,
                "2026-01-01T00:01:00Z",
                &keystore,
            )
            .unwrap();

        let chain = store.read_chain("s1").unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].prev_hash, GENESIS);
        assert_eq!(chain[1].prev_hash, chain[0].hash);
        assert_eq!(r2.prev_hash, r1.hash);
    }

    #[test]
    fn file_state_transitions_on_seal() {
        let (store, _dir) = test_store();
        let keystore = test_keystore();
        assert_eq!(store.file_state("s1"), FileState::Missing);
        store
            .append_record("s1", RecordType::SessionStart, json!({}), GENESIS, "t", &keystore)
            .unwrap();
        assert_eq!(store.file_state("s1"), FileState::Active);
        store.seal_and_move("s1").unwrap();
        assert_eq!(store.file_state("s1"), FileState::Sealed);
        // Sealing again is a no-op, not an error.
        store.seal_and_move("s1").unwrap();
        assert_eq!(store.file_state("s1"), FileState::Sealed);
    }

    #[test]
    fn read_chain_skips_unparsable_trailing_line() {
        let (store, dir) = test_store();
        let keystore = test_keystore();
        store
            .append_record("s1", RecordType::SessionStart, json!({}), GENESIS, "t", &keystore)
            .unwrap();

        let path = dir.path().join("active").join("s1.jsonl");
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{not valid json\n").unwrap();

        let chain = store.read_chain("s1").unwrap();
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn milestone_payload_round_trips_through_serde() {
        let payload = super::super::record::MilestonePayload {
            title: "Add search".to_string(),
            private_title: None,
            category: MilestoneCategory::Feature,
            complexity: MilestoneComplexity::Medium,
            duration_minutes: 30,
            languages: vec!["go".to_string()],
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["category"], "feature");
        assert_eq!(value["complexity"], "medium");
    }
}
