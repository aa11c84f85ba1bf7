//! Best-effort persistence of tour progress.
//!
//! [`PersistenceStore`] reads and writes [`PersistedTourState`] snapshots as
//! JSON through any [`KeyValueStore`]. Storage is advisory: every failure is
//! logged and swallowed, and a broken backend simply behaves like an empty
//! one.

use std::collections::{BTreeSet, HashMap};
use std::fs::OpenOptions;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix for storage keys derived from a tour id.
pub const DEFAULT_KEY_PREFIX: &str = "tourguide:";

pub fn default_storage_key(tour_id: &str) -> String {
    format!("{DEFAULT_KEY_PREFIX}{tour_id}")
}

/// The durable subset of tour state.
///
/// Every field has a default so snapshots written by older versions, which
/// may lack newer fields, still load.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedTourState {
    pub current_step_index: usize,
    pub completed_steps: BTreeSet<String>,
    pub skipped_steps: BTreeSet<String>,
    pub is_completed: bool,
    pub is_skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_at: Option<DateTime<Utc>>,
}

/// Raw string storage, the local-storage shaped seam.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Process-local storage. Lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        entries.remove(key);
        Ok(())
    }
}

/// One pretty-printed JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<local data dir>/tourguide`, e.g. `~/.local/share/tourguide` on Linux.
    pub fn in_data_dir() -> Result<Self> {
        let base = dirs::data_local_dir().context("no local data directory on this platform")?;
        Ok(Self::new(base.join("tourguide")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File for `key`. Bytes outside `[A-Za-z0-9-]`, `_` included, are
    /// written as `_XX` hex so distinct keys never share a file.
    fn path_for(&self, key: &str) -> PathBuf {
        let mut file = String::with_capacity(key.len());
        for byte in key.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' {
                file.push(char::from(byte));
            } else {
                file.push_str(&format!("_{byte:02X}"));
            }
        }
        self.dir.join(format!("{file}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let file = std::fs::File::open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(value.to_string()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let value: serde_json::Value = serde_json::from_str(value)?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.path_for(key))?;
        serde_json::to_writer_pretty(file, &value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
        Ok(())
    }
}

/// Snapshot persistence on top of a [`KeyValueStore`]. Never fails.
#[derive(Clone)]
pub struct PersistenceStore {
    backend: Arc<dyn KeyValueStore>,
}

impl Default for PersistenceStore {
    fn default() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }
}

impl PersistenceStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    pub fn save(&self, key: &str, snapshot: &PersistedTourState) {
        let result = serde_json::to_string(snapshot)
            .map_err(anyhow::Error::from)
            .and_then(|json| self.backend.set(key, &json));
        if let Err(err) = result {
            tracing::warn!(%key, "failed to persist tour state: {:#}", err);
        }
    }

    /// The stored snapshot, or `None` when absent, unreadable or corrupt.
    pub fn load(&self, key: &str) -> Option<PersistedTourState> {
        let raw = match self.backend.get(key) {
            Ok(raw) => raw?,
            Err(err) => {
                tracing::warn!(%key, "failed to read tour state: {:#}", err);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                tracing::warn!(%key, "ignoring corrupt tour state: {}", err);
                None
            }
        }
    }

    pub fn clear(&self, key: &str) {
        if let Err(err) = self.backend.remove(key) {
            tracing::warn!(%key, "failed to clear tour state: {:#}", err);
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        self.load(key).is_some()
    }

    /// Merge a completion marker into the stored snapshot, dropping any
    /// skip marker.
    pub fn mark_completed(&self, key: &str, at: DateTime<Utc>) {
        let mut snapshot = self.load(key).unwrap_or_default();
        snapshot.is_completed = true;
        snapshot.completed_at = Some(at);
        snapshot.is_skipped = false;
        snapshot.skipped_at = None;
        self.save(key, &snapshot);
    }

    /// Merge a skip marker into the stored snapshot, dropping any
    /// completion marker.
    pub fn mark_skipped(&self, key: &str, at: DateTime<Utc>) {
        let mut snapshot = self.load(key).unwrap_or_default();
        snapshot.is_skipped = true;
        snapshot.skipped_at = Some(at);
        snapshot.is_completed = false;
        snapshot.completed_at = None;
        self.save(key, &snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            anyhow::bail!("storage disabled")
        }
        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            anyhow::bail!("quota exceeded")
        }
        fn remove(&self, _key: &str) -> Result<()> {
            anyhow::bail!("storage disabled")
        }
    }

    #[test]
    fn save_then_load_through_memory_backend() {
        let store = PersistenceStore::default();
        let snapshot = PersistedTourState {
            current_step_index: 2,
            completed_steps: ["a".to_string(), "b".to_string()].into(),
            ..Default::default()
        };
        store.save("k", &snapshot);
        assert_eq!(store.load("k"), Some(snapshot));
        assert!(store.exists("k"));

        store.clear("k");
        assert!(!store.exists("k"));
    }

    #[test]
    fn old_snapshot_without_new_fields_still_loads() {
        let backend = Arc::new(MemoryStore::new());
        backend.set("k", r#"{"currentStepIndex":1}"#).unwrap();
        let store = PersistenceStore::new(backend);

        let snapshot = store.load("k").unwrap();
        assert_eq!(snapshot.current_step_index, 1);
        assert!(!snapshot.is_completed);
        assert!(snapshot.skipped_steps.is_empty());
    }

    #[test]
    fn corrupt_snapshot_reads_as_absent() {
        let backend = Arc::new(MemoryStore::new());
        backend.set("k", "{not json").unwrap();
        assert_eq!(PersistenceStore::new(backend).load("k"), None);
    }

    #[test]
    fn broken_backend_never_propagates() {
        let store = PersistenceStore::new(Arc::new(BrokenStore));
        store.save("k", &PersistedTourState::default());
        store.mark_completed("k", Utc::now());
        store.clear("k");
        assert_eq!(store.load("k"), None);
        assert!(!store.exists("k"));
    }

    #[test]
    fn mark_skipped_merges_into_existing_snapshot() {
        let store = PersistenceStore::default();
        store.save(
            "k",
            &PersistedTourState {
                current_step_index: 1,
                ..Default::default()
            },
        );
        let at = Utc::now();
        store.mark_skipped("k", at);

        let snapshot = store.load("k").unwrap();
        assert_eq!(snapshot.current_step_index, 1);
        assert!(snapshot.is_skipped);
        assert_eq!(snapshot.skipped_at, Some(at));
    }

    #[test]
    fn snapshot_uses_camel_case_layout() {
        let json = serde_json::to_value(PersistedTourState {
            is_completed: true,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(json["isCompleted"], true);
        assert_eq!(json["currentStepIndex"], 0);
        assert!(json.get("completedAt").is_none());
    }

    #[test]
    fn file_store_round_trips_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistenceStore::new(Arc::new(FileStore::new(dir.path())));
        store.mark_completed("tourguide:welcome", Utc::now());

        assert!(dir.path().join("tourguide_3Awelcome.json").exists());
        assert!(store.load("tourguide:welcome").unwrap().is_completed);

        store.clear("tourguide:welcome");
        assert!(!store.exists("tourguide:welcome"));
    }

    #[test]
    fn markers_replace_each_other() {
        let store = PersistenceStore::default();
        store.mark_completed("k", Utc::now());
        store.mark_skipped("k", Utc::now());

        let snapshot = store.load("k").unwrap();
        assert!(snapshot.is_skipped);
        assert!(!snapshot.is_completed);
        assert_eq!(snapshot.completed_at, None);

        store.mark_completed("k", Utc::now());
        let snapshot = store.load("k").unwrap();
        assert!(snapshot.is_completed);
        assert!(!snapshot.is_skipped);
        assert_eq!(snapshot.skipped_at, None);
    }

    #[test]
    fn file_store_keeps_similar_keys_apart() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistenceStore::new(Arc::new(FileStore::new(dir.path())));
        let keys = ["tourguide:a b", "tourguide:a_b", "tourguide_a_b", "tourguide:a:b"];
        for (index, key) in keys.iter().enumerate() {
            store.save(
                key,
                &PersistedTourState {
                    current_step_index: index,
                    ..Default::default()
                },
            );
        }

        for (index, key) in keys.iter().enumerate() {
            assert_eq!(store.load(key).unwrap().current_step_index, index);
        }

        store.clear("tourguide:a_b");
        assert!(store.exists("tourguide:a b"));
        assert!(!store.exists("tourguide:a_b"));
        assert!(store.exists("tourguide_a_b"));
    }
}
