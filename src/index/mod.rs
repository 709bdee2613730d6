//! Persistent indices: sessions, milestones, and the connection→session map.
//!
//! All three are single JSON documents, rewritten atomically (write to a
//! sibling temp file, then rename) so readers never observe a partial file —
//! the same idiom the teacher uses for session snapshots.

use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};

use crate::error::IndexError;
use crate::model::{choose_richer, Milestone, SessionSeal};

fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), IndexError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(value)?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T, IndexError> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            if text.trim().is_empty() {
                Ok(T::default())
            } else {
                Ok(serde_json::from_str(&text)?)
            }
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(err) => Err(IndexError::from(err)),
    }
}

/// Sessions index: at most one [`SessionSeal`] per `session_id`.
#[derive(Clone)]
pub struct SessionsIndex {
    path: PathBuf,
}

impl SessionsIndex {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<Vec<SessionSeal>, IndexError> {
        read_json_or_default(&self.path)
    }

    fn save(&self, seals: &[SessionSeal]) -> Result<(), IndexError> {
        atomic_write_json(&self.path, &seals)
    }

    /// Current deduplicated snapshot (the file is always written
    /// deduplicated, but a defensive dedup pass runs here too — harmless if
    /// the file is already clean, and it is what startup dedup relies on).
    pub fn list(&self) -> Result<Vec<SessionSeal>, IndexError> {
        let mut seals = self.load()?;
        dedupe_in_place(&mut seals);
        Ok(seals)
    }

    /// Insert or reconcile a seal using the richness rule. Returns whether
    /// the stored entry changed.
    pub fn upsert(&self, seal: SessionSeal) -> Result<bool, IndexError> {
        let mut seals = self.load()?;
        let changed = upsert_in_place(&mut seals, seal);
        if changed {
            self.save(&seals)?;
        }
        Ok(changed)
    }

    pub fn get(&self, session_id: &str) -> Result<Option<SessionSeal>, IndexError> {
        Ok(self.load()?.into_iter().find(|s| s.session_id == session_id))
    }

    pub fn delete(&self, session_id: &str) -> Result<bool, IndexError> {
        let mut seals = self.load()?;
        let before = seals.len();
        seals.retain(|s| s.session_id != session_id);
        let removed = seals.len() != before;
        if removed {
            self.save(&seals)?;
        }
        Ok(removed)
    }

    pub fn delete_conversation(&self, conversation_id: &str) -> Result<Vec<String>, IndexError> {
        let mut seals = self.load()?;
        let mut removed_ids = Vec::new();
        seals.retain(|s| {
            if s.conversation_id == conversation_id {
                removed_ids.push(s.session_id.clone());
                false
            } else {
                true
            }
        });
        if !removed_ids.is_empty() {
            self.save(&seals)?;
        }
        Ok(removed_ids)
    }

    /// Dedup the on-disk file in place (run once at startup).
    pub fn dedupe_on_disk(&self) -> Result<(), IndexError> {
        let mut seals = self.load()?;
        let before_len = seals.len();
        dedupe_in_place(&mut seals);
        if seals.len() != before_len {
            self.save(&seals)?;
        }
        Ok(())
    }
}

fn upsert_in_place(seals: &mut Vec<SessionSeal>, incoming: SessionSeal) -> bool {
    if let Some(existing) = seals.iter_mut().find(|s| s.session_id == incoming.session_id) {
        if choose_richer(existing, &incoming) {
            *existing = incoming;
            true
        } else {
            false
        }
    } else {
        seals.push(incoming);
        true
    }
}

fn dedupe_in_place(seals: &mut Vec<SessionSeal>) {
    let mut deduped: Vec<SessionSeal> = Vec::with_capacity(seals.len());
    for seal in seals.drain(..) {
        upsert_in_place(&mut deduped, seal);
    }
    *seals = deduped;
}

/// Milestones index: append-mostly list of [`Milestone`] entries.
#[derive(Clone)]
pub struct MilestonesIndex {
    path: PathBuf,
}

impl MilestonesIndex {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<Vec<Milestone>, IndexError> {
        read_json_or_default(&self.path)
    }

    fn save(&self, milestones: &[Milestone]) -> Result<(), IndexError> {
        atomic_write_json(&self.path, &milestones)
    }

    pub fn list(&self) -> Result<Vec<Milestone>, IndexError> {
        self.load()
    }

    pub fn append(&self, milestone: Milestone) -> Result<(), IndexError> {
        let mut milestones = self.load()?;
        milestones.push(milestone);
        self.save(&milestones)
    }

    pub fn delete(&self, milestone_id: &str) -> Result<bool, IndexError> {
        let mut milestones = self.load()?;
        let before = milestones.len();
        milestones.retain(|m| m.id != milestone_id);
        let removed = milestones.len() != before;
        if removed {
            self.save(&milestones)?;
        }
        Ok(removed)
    }

    pub fn delete_for_session(&self, session_id: &str) -> Result<(), IndexError> {
        let mut milestones = self.load()?;
        milestones.retain(|m| m.session_id != session_id);
        self.save(&milestones)
    }

    pub fn delete_for_sessions(&self, session_ids: &[String]) -> Result<(), IndexError> {
        let mut milestones = self.load()?;
        milestones.retain(|m| !session_ids.contains(&m.session_id));
        self.save(&milestones)
    }
}

/// Persisted connection_id → session_id map.
///
/// Never deleted by lifecycle teardown — only overwritten by a subsequent
/// `session_start` on the same connection, or garbage-collected by the
/// retention sweep (entries whose session is sealed and whose last touch is
/// older than 30 days).
#[derive(Debug, Clone, Default, Serialize, serde::Deserialize)]
pub struct ConnectionMapEntry {
    pub session_id: String,
    /// ISO-8601 UTC timestamp of the mapping's last write.
    pub updated_at: String,
}

#[derive(Clone)]
pub struct ConnectionMap {
    path: PathBuf,
}

impl ConnectionMap {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<std::collections::BTreeMap<String, ConnectionMapEntry>, IndexError> {
        read_json_or_default(&self.path)
    }

    fn save(&self, map: &std::collections::BTreeMap<String, ConnectionMapEntry>) -> Result<(), IndexError> {
        atomic_write_json(&self.path, map)
    }

    pub fn get(&self, connection_id: &str) -> Result<Option<ConnectionMapEntry>, IndexError> {
        Ok(self.load()?.get(connection_id).cloned())
    }

    /// Set (overwriting) the mapping for a connection.
    pub fn set(&self, connection_id: &str, session_id: &str, now_iso: &str) -> Result<(), IndexError> {
        let mut map = self.load()?;
        map.insert(
            connection_id.to_string(),
            ConnectionMapEntry { session_id: session_id.to_string(), updated_at: now_iso.to_string() },
        );
        self.save(&map)
    }

    /// Remove entries whose session is sealed and whose last touch is older
    /// than `max_age_days` days. Returns the number of entries removed.
    pub fn gc_sealed_older_than(
        &self,
        max_age_days: i64,
        now: chrono::DateTime<chrono::Utc>,
        sessions: &SessionsIndex,
    ) -> Result<usize, IndexError> {
        let mut map = self.load()?;
        let sealed_ids: std::collections::HashSet<String> =
            sessions.list()?.into_iter().map(|s| s.session_id).collect();
        let before = map.len();
        map.retain(|_, entry| {
            let Ok(updated_at) = chrono::DateTime::parse_from_rfc3339(&entry.updated_at) else {
                return true;
            };
            let age_days = (now - updated_at.with_timezone(&chrono::Utc)).num_days();
            !(sealed_ids.contains(&entry.session_id) && age_days > max_age_days)
        });
        let removed = before - map.len();
        if removed > 0 {
            self.save(&map)?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SealVariant;

    fn bare_seal(id: &str) -> SessionSeal {
        SessionSeal {
            session_id: id.to_string(),
            conversation_id: String::new(),
            conversation_index: 0,
            client: "c".to_string(),
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
    fn upsert_twice_with_same_seal_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let index = SessionsIndex::open(dir.path().join("sessions.json"));
        let seal = bare_seal("s1");
        assert!(index.upsert(seal.clone()).unwrap());
        assert!(!index.upsert(seal).unwrap());
        assert_eq!(index.list().unwrap().len(), 1);
    }

    #[test]
    fn upsert_richer_seal_replaces_poorer() {
        let dir = tempfile::tempdir().unwrap();
        let index = SessionsIndex::open(dir.path().join("sessions.json"));
        let bare = bare_seal("s1");
        index.upsert(bare.clone()).unwrap();

        let mut rich = bare.clone();
        rich.title = Some("Add search".to_string());
        assert!(index.upsert(rich.clone()).unwrap());
        assert_eq!(index.get("s1").unwrap().unwrap().title, rich.title);

        // A poorer seal after the rich one is a no-op.
        assert!(!index.upsert(bare).unwrap());
        assert_eq!(index.get("s1").unwrap().unwrap().title, rich.title);
    }

    #[test]
    fn delete_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let index = SessionsIndex::open(dir.path().join("sessions.json"));
        index.upsert(bare_seal("s1")).unwrap();
        assert!(index.delete("s1").unwrap());
        assert!(index.get("s1").unwrap().is_none());
        assert!(!index.delete("s1").unwrap());
    }

    #[test]
    fn dedupe_on_disk_collapses_duplicate_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        let bare = bare_seal("s1");
        let mut rich = bare.clone();
        rich.title = Some("rich".to_string());
        std::fs::write(&path, serde_json::to_vec(&vec![bare, rich.clone()]).unwrap()).unwrap();

        let index = SessionsIndex::open(&path);
        index.dedupe_on_disk().unwrap();
        let seals = index.list().unwrap();
        assert_eq!(seals.len(), 1);
        assert_eq!(seals[0].title, rich.title);
    }

    #[test]
    fn connection_map_set_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let map = ConnectionMap::open(dir.path().join("connection_map.json"));
        map.set("conn-1", "sess-1", "2026-01-01T00:00:00Z").unwrap();
        let entry = map.get("conn-1").unwrap().unwrap();
        assert_eq!(entry.session_id, "sess-1");
    }
}
