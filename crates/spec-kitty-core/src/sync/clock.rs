//! Persisted Lamport clock and the stable machine node id.
//!
//! The clock file holds `{value, node_id, updated_at}` and is replaced
//! atomically (temp + rename). A corrupt or missing file initializes to
//! zero. `tick()` is not fully thread-safe across processes: concurrent
//! writers may race on the value field; callers within one process hold
//! coarse coordination.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
struct ClockFile {
    value: u64,
    node_id: String,
    updated_at: String,
}

/// Monotone logical clock persisted per account (or per feature slot).
#[derive(Debug, Clone)]
pub struct LamportClock {
    pub value: u64,
    pub node_id: String,
    storage_path: PathBuf,
}

impl LamportClock {
    /// Build a clock with an explicit value and node id.
    #[must_use]
    pub fn new(value: u64, node_id: impl Into<String>, storage_path: impl Into<PathBuf>) -> Self {
        Self {
            value,
            node_id: node_id.into(),
            storage_path: storage_path.into(),
        }
    }

    /// Load from disk; corrupt, empty, or missing files initialize to zero.
    #[must_use]
    pub fn load(storage_path: impl Into<PathBuf>) -> Self {
        let storage_path = storage_path.into();
        let parsed: Option<ClockFile> = std::fs::read_to_string(&storage_path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok());
        match parsed {
            Some(file) => Self {
                value: file.value,
                node_id: file.node_id,
                storage_path,
            },
            None => Self {
                value: 0,
                node_id: generate_node_id(),
                storage_path,
            },
        }
    }

    /// Increment and persist; returns the new value.
    pub fn tick(&mut self) -> Result<u64> {
        self.value += 1;
        self.save()?;
        Ok(self.value)
    }

    /// Reconcile with a remote value: `max(local, remote) + 1`, persisted.
    pub fn receive(&mut self, remote: u64) -> Result<u64> {
        self.value = self.value.max(remote) + 1;
        self.save()?;
        Ok(self.value)
    }

    /// Persist atomically via temp file + rename.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.storage_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let file = ClockFile {
            value: self.value,
            node_id: self.node_id.clone(),
            updated_at: Utc::now().to_rfc3339(),
        };
        let raw = serde_json::to_string_pretty(&file)?;
        let tmp = self.storage_path.with_extension("json.tmp");
        std::fs::write(&tmp, raw).map_err(|e| Error::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.storage_path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            Error::io(&self.storage_path, e)
        })?;
        Ok(())
    }
}

/// Stable 12-hex node id derived from a machine/user fingerprint.
///
/// Same machine, same id across calls and processes.
#[must_use]
pub fn generate_node_id() -> String {
    static NODE_ID: OnceLock<String> = OnceLock::new();
    NODE_ID
        .get_or_init(|| {
            let host = hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown-host".to_string());
            let user = std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_else(|_| "unknown-user".to_string());
            let mut hasher = Sha256::new();
            hasher.update(host.as_bytes());
            hasher.update(b"\0");
            hasher.update(user.as_bytes());
            let digest = hasher.finalize();
            hex::encode(&digest[..6])
        })
        .clone()
}

/// Clock slot path for an account scope under the runtime home.
#[must_use]
pub fn account_clock_path(home: &Path) -> PathBuf {
    home.join("clock.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_increments_value() {
        let tmp = tempfile::tempdir().unwrap();
        let mut clock = LamportClock::new(0, "test", tmp.path().join("c.json"));
        assert_eq!(clock.tick().unwrap(), 1);
        assert_eq!(clock.tick().unwrap(), 2);
        assert_eq!(clock.value, 2);
    }

    #[test]
    fn tick_from_nonzero() {
        let tmp = tempfile::tempdir().unwrap();
        let mut clock = LamportClock::new(99, "test", tmp.path().join("c.json"));
        assert_eq!(clock.tick().unwrap(), 100);
    }

    #[test]
    fn tick_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("c.json");
        let mut clock = LamportClock::new(0, "test", &path);
        clock.tick().unwrap();
        clock.tick().unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let data: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(data["value"], 2);
    }

    #[test]
    fn receive_updates_to_max_plus_one() {
        let tmp = tempfile::tempdir().unwrap();
        let mut clock = LamportClock::new(5, "test", tmp.path().join("c.json"));
        assert_eq!(clock.receive(10).unwrap(), 11);
        assert_eq!(clock.value, 11);
    }

    #[test]
    fn receive_when_local_is_higher() {
        let tmp = tempfile::tempdir().unwrap();
        let mut clock = LamportClock::new(20, "test", tmp.path().join("c.json"));
        assert_eq!(clock.receive(5).unwrap(), 21);
    }

    #[test]
    fn receive_when_equal() {
        let tmp = tempfile::tempdir().unwrap();
        let mut clock = LamportClock::new(10, "test", tmp.path().join("c.json"));
        assert_eq!(clock.receive(10).unwrap(), 11);
    }

    #[test]
    fn save_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("c.json");
        let clock = LamportClock::new(42, "test123", &path);
        clock.save().unwrap();

        let loaded = LamportClock::load(&path);
        assert_eq!(loaded.value, 42);
        assert_eq!(loaded.node_id, "test123");
    }

    #[test]
    fn save_includes_updated_at() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("c.json");
        LamportClock::new(0, "test", &path).save().unwrap();
        let data: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(data["updated_at"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn save_creates_parent_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("deep").join("nested").join("clock.json");
        LamportClock::new(5, "test", &path).save().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn no_temp_files_left_after_save() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("c.json");
        let mut clock = LamportClock::new(0, "test", &path);
        for _ in 0..50 {
            clock.tick().unwrap();
        }
        let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
        assert_eq!(LamportClock::load(&path).value, 50);
    }

    #[test]
    fn missing_file_initializes_zero() {
        let tmp = tempfile::tempdir().unwrap();
        let clock = LamportClock::load(tmp.path().join("nonexistent.json"));
        assert_eq!(clock.value, 0);
    }

    #[test]
    fn corrupt_json_initializes_zero() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("corrupt.json");
        std::fs::write(&path, "{invalid json").unwrap();
        assert_eq!(LamportClock::load(&path).value, 0);
    }

    #[test]
    fn empty_file_initializes_zero() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("empty.json");
        std::fs::write(&path, "").unwrap();
        assert_eq!(LamportClock::load(&path).value, 0);
    }

    #[test]
    fn node_id_is_12_hex_and_stable() {
        let nid = generate_node_id();
        assert_eq!(nid.len(), 12);
        assert!(nid.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(generate_node_id(), nid);
    }

    #[test]
    fn load_defaults_node_id_to_machine_fingerprint() {
        let tmp = tempfile::tempdir().unwrap();
        let clock = LamportClock::load(tmp.path().join("c.json"));
        assert_eq!(clock.node_id, generate_node_id());
    }
}
