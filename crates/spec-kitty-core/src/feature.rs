//! Feature and work-package identity plus the on-disk feature layout.
//!
//! A feature is a directory under `kitty-specs/` identified by an
//! `NNN-kebab-name` slug. It owns the event log, the materialized snapshot,
//! the WP file set, and a meta descriptor. Identifiers are validated at
//! construction; once built they are always well-formed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Directory under the repository root that holds all feature directories.
pub const SPECS_DIR_NAME: &str = "kitty-specs";

/// Event log filename inside a feature directory.
pub const EVENTS_FILENAME: &str = "events.jsonl";

/// Materialized snapshot filename inside a feature directory.
pub const SNAPSHOT_FILENAME: &str = "status.json";

/// Telemetry log filename inside a feature directory.
pub const EXECUTION_EVENTS_FILENAME: &str = "execution.events.jsonl";

/// Per-feature Lamport clock slot.
pub const TELEMETRY_CLOCK_FILENAME: &str = ".telemetry-clock.json";

/// Resumable merge context, present only while a merge is in flight.
pub const MERGE_STATE_FILENAME: &str = "merge-state.json";

#[allow(clippy::expect_used)]
fn slug_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9]{3}-[a-z0-9][a-z0-9-]*$").expect("static regex"))
}

#[allow(clippy::expect_used)]
fn wp_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^WP[0-9]{2}$").expect("static regex"))
}

/// Validated feature slug of the form `NNN-kebab-name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSlug(String);

impl FeatureSlug {
    /// Parse and validate a feature slug.
    pub fn parse(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if slug_regex().is_match(&s) {
            Ok(Self(s))
        } else {
            Err(Error::validation_field(
                format!("Invalid feature slug '{s}': expected NNN-kebab-name"),
                "feature_slug",
            ))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validated work-package identifier matching `^WP[0-9]{2}$`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WpId(String);

impl WpId {
    /// Parse and validate a work-package id (e.g. `WP01`).
    pub fn parse(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if wp_regex().is_match(&s) {
            Ok(Self(s))
        } else {
            Err(Error::validation_field(
                format!("Invalid work package id '{s}': expected WP<dd>"),
                "wp_id",
            ))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Operational status phase for a feature.
///
/// Phase 1 is dual-write: the snapshot is authoritative but frontmatter drift
/// only warns. Phase 2 treats drift in derived views as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StatusPhase {
    DualWrite,
    SnapshotAuthoritative,
}

impl TryFrom<u8> for StatusPhase {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::DualWrite),
            2 => Ok(Self::SnapshotAuthoritative),
            other => Err(format!("invalid status_phase {other}: expected 1 or 2")),
        }
    }
}

impl From<StatusPhase> for u8 {
    fn from(phase: StatusPhase) -> Self {
        match phase {
            StatusPhase::DualWrite => 1,
            StatusPhase::SnapshotAuthoritative => 2,
        }
    }
}

/// Meta descriptor stored as `meta.json` in a feature directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureMeta {
    pub status_phase: StatusPhase,
}

impl Default for FeatureMeta {
    fn default() -> Self {
        Self {
            status_phase: StatusPhase::DualWrite,
        }
    }
}

/// Handle to a feature directory with typed accessors for its artifacts.
#[derive(Debug, Clone)]
pub struct FeatureDir {
    slug: FeatureSlug,
    root: PathBuf,
}

impl FeatureDir {
    /// Build a handle for `repo_root/kitty-specs/<slug>`.
    #[must_use]
    pub fn new(repo_root: &Path, slug: FeatureSlug) -> Self {
        let root = repo_root.join(SPECS_DIR_NAME).join(slug.as_str());
        Self { slug, root }
    }

    /// Build a handle directly from a feature directory path.
    ///
    /// The final path component must be a valid feature slug.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let root: PathBuf = path.into();
        let name = root
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::validation("Feature directory has no valid name"))?;
        let slug = FeatureSlug::parse(name)?;
        Ok(Self { slug, root })
    }

    #[must_use]
    pub fn slug(&self) -> &FeatureSlug {
        &self.slug
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn events_path(&self) -> PathBuf {
        self.root.join(EVENTS_FILENAME)
    }

    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.root.join(SNAPSHOT_FILENAME)
    }

    #[must_use]
    pub fn execution_events_path(&self) -> PathBuf {
        self.root.join(EXECUTION_EVENTS_FILENAME)
    }

    #[must_use]
    pub fn telemetry_clock_path(&self) -> PathBuf {
        self.root.join(TELEMETRY_CLOCK_FILENAME)
    }

    #[must_use]
    pub fn merge_state_path(&self) -> PathBuf {
        self.root.join(MERGE_STATE_FILENAME)
    }

    #[must_use]
    pub fn meta_path(&self) -> PathBuf {
        self.root.join("meta.json")
    }

    /// Directory of WP files (`tasks/WP<nn>-<slug>.md`, flat, no sub-lanes).
    #[must_use]
    pub fn tasks_dir(&self) -> PathBuf {
        self.root.join("tasks")
    }

    /// Locate the WP file for an id by its `WP<nn>-*.md` naming convention.
    pub fn wp_file(&self, wp_id: &WpId) -> Result<Option<PathBuf>> {
        let tasks = self.tasks_dir();
        if !tasks.is_dir() {
            return Ok(None);
        }
        let prefix = format!("{}-", wp_id.as_str());
        let entries = std::fs::read_dir(&tasks).map_err(|e| Error::io(&tasks, e))?;
        let mut matches: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&tasks, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(&prefix) && name.ends_with(".md") {
                matches.push(entry.path());
            }
        }
        matches.sort();
        Ok(matches.into_iter().next())
    }

    /// List every WP file under `tasks/`, sorted by filename.
    pub fn wp_files(&self) -> Result<Vec<PathBuf>> {
        let tasks = self.tasks_dir();
        if !tasks.is_dir() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&tasks).map_err(|e| Error::io(&tasks, e))?;
        let mut files: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&tasks, e))?;
            let path = entry.path();
            let is_wp = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("WP") && n.ends_with(".md"));
            if is_wp {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Read `meta.json`, defaulting to Phase 1 when absent or unreadable.
    #[must_use]
    pub fn meta(&self) -> FeatureMeta {
        let path = self.meta_path();
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    /// Write `meta.json`, creating the feature directory if needed.
    pub fn write_meta(&self, meta: &FeatureMeta) -> Result<()> {
        std::fs::create_dir_all(&self.root).map_err(|e| Error::io(&self.root, e))?;
        let raw = serde_json::to_string_pretty(meta)?;
        let path = self.meta_path();
        std::fs::write(&path, raw).map_err(|e| Error::io(&path, e))?;
        Ok(())
    }

    /// Branch name for a WP workspace: `<feature>-<wp>`.
    #[must_use]
    pub fn wp_branch(&self, wp_id: &WpId) -> String {
        format!("{}-{}", self.slug, wp_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_slugs_parse() {
        assert!(FeatureSlug::parse("001-my-feature").is_ok());
        assert!(FeatureSlug::parse("099-test").is_ok());
        assert!(FeatureSlug::parse("123-a").is_ok());
    }

    #[test]
    fn invalid_slugs_rejected() {
        for bad in ["my-feature", "1-short", "001-", "001-UPPER", "0012-x", ""] {
            assert!(FeatureSlug::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn valid_wp_ids_parse() {
        assert!(WpId::parse("WP01").is_ok());
        assert!(WpId::parse("WP99").is_ok());
    }

    #[test]
    fn invalid_wp_ids_rejected() {
        for bad in ["WP1", "WP001", "wp01", "BADID", "WP-1", ""] {
            assert!(WpId::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn wp_ids_sort_numerically_within_two_digits() {
        let mut ids = vec![
            WpId::parse("WP10").unwrap(),
            WpId::parse("WP02").unwrap(),
            WpId::parse("WP01").unwrap(),
        ];
        ids.sort();
        let strs: Vec<&str> = ids.iter().map(WpId::as_str).collect();
        assert_eq!(strs, ["WP01", "WP02", "WP10"]);
    }

    #[test]
    fn feature_dir_paths() {
        let slug = FeatureSlug::parse("010-workspaces").unwrap();
        let dir = FeatureDir::new(Path::new("/repo"), slug);
        assert_eq!(
            dir.events_path(),
            PathBuf::from("/repo/kitty-specs/010-workspaces/events.jsonl")
        );
        assert_eq!(
            dir.snapshot_path(),
            PathBuf::from("/repo/kitty-specs/010-workspaces/status.json")
        );
        assert_eq!(
            dir.wp_branch(&WpId::parse("WP03").unwrap()),
            "010-workspaces-WP03"
        );
    }

    #[test]
    fn status_phase_roundtrip() {
        let meta: FeatureMeta = serde_json::from_str(r#"{"status_phase": 2}"#).unwrap();
        assert_eq!(meta.status_phase, StatusPhase::SnapshotAuthoritative);
        let raw = serde_json::to_string(&meta).unwrap();
        assert!(raw.contains("\"status_phase\":2"));
    }

    #[test]
    fn meta_defaults_to_phase_one() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = FeatureDir::new(tmp.path(), FeatureSlug::parse("001-x").unwrap());
        assert_eq!(dir.meta().status_phase, StatusPhase::DualWrite);
    }

    #[test]
    fn wp_file_lookup_by_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = FeatureDir::new(tmp.path(), FeatureSlug::parse("001-x").unwrap());
        std::fs::create_dir_all(dir.tasks_dir()).unwrap();
        std::fs::write(dir.tasks_dir().join("WP01-setup.md"), "---\n---\n").unwrap();
        std::fs::write(dir.tasks_dir().join("WP02-api.md"), "---\n---\n").unwrap();

        let found = dir.wp_file(&WpId::parse("WP01").unwrap()).unwrap();
        assert!(found.unwrap().ends_with("WP01-setup.md"));
        assert!(dir.wp_file(&WpId::parse("WP09").unwrap()).unwrap().is_none());
        assert_eq!(dir.wp_files().unwrap().len(), 2);
    }
}
