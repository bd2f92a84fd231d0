//! Resumable merge context persisted under the feature directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::feature::{FeatureDir, WpId};

/// Strategy used for each per-WP merge step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    #[default]
    Merge,
    Squash,
    Rebase,
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Merge => f.write_str("merge"),
            Self::Squash => f.write_str("squash"),
            Self::Rebase => f.write_str("rebase"),
        }
    }
}

/// Checkpointed state of one merge sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeState {
    pub feature_slug: String,
    pub target_branch: String,
    pub wp_order: Vec<WpId>,
    #[serde(default)]
    pub completed_wps: Vec<WpId>,
    #[serde(default)]
    pub current_wp: Option<WpId>,
    #[serde(default)]
    pub has_pending_conflicts: bool,
    #[serde(default)]
    pub strategy: MergeStrategy,
    #[serde(default = "Utc::now")]
    pub started_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl MergeState {
    #[must_use]
    pub fn new(
        feature_slug: impl Into<String>,
        target_branch: impl Into<String>,
        wp_order: Vec<WpId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            feature_slug: feature_slug.into(),
            target_branch: target_branch.into(),
            wp_order,
            completed_wps: Vec::new(),
            current_wp: None,
            has_pending_conflicts: false,
            strategy: MergeStrategy::Merge,
            started_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// WPs not yet merged, in order.
    #[must_use]
    pub fn remaining_wps(&self) -> Vec<WpId> {
        self.wp_order
            .iter()
            .filter(|wp| !self.completed_wps.contains(wp))
            .cloned()
            .collect()
    }

    /// Completed fraction of the sequence in percent.
    #[must_use]
    pub fn progress_percent(&self) -> f64 {
        if self.wp_order.is_empty() {
            return 0.0;
        }
        (self.completed_wps.len() as f64 / self.wp_order.len() as f64) * 100.0
    }

    /// Record a successful per-WP merge: dedup-appends to `completed_wps`,
    /// clears the cursor and any pending-conflict flag.
    pub fn mark_wp_complete(&mut self, wp_id: &WpId) {
        if !self.completed_wps.contains(wp_id) {
            self.completed_wps.push(wp_id.clone());
        }
        self.current_wp = None;
        self.has_pending_conflicts = false;
        self.updated_at = Utc::now();
    }

    pub fn set_current_wp(&mut self, wp_id: WpId) {
        self.current_wp = Some(wp_id);
        self.updated_at = Utc::now();
    }

    pub fn set_pending_conflicts(&mut self, pending: bool) {
        self.has_pending_conflicts = pending;
        self.updated_at = Utc::now();
    }

    /// The sequence has started but not yet merged every WP.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.remaining_wps().is_empty() || self.current_wp.is_some()
    }
}

/// Persist merge state as `merge-state.json` in the feature directory.
pub fn save_state(feature: &FeatureDir, state: &MergeState) -> Result<()> {
    let path = feature.merge_state_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let raw = serde_json::to_string_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, raw).map_err(|e| Error::io(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| Error::io(&path, e))?;
    Ok(())
}

/// Load merge state; `None` for missing, corrupt, or incomplete files.
#[must_use]
pub fn load_state(feature: &FeatureDir) -> Option<MergeState> {
    let raw = std::fs::read_to_string(feature.merge_state_path()).ok()?;
    serde_json::from_str(&raw).ok()
}

/// Remove the state file; `true` when something was deleted.
#[must_use]
pub fn clear_state(feature: &FeatureDir) -> bool {
    std::fs::remove_file(feature.merge_state_path()).is_ok()
}

/// Whether a merge is mid-flight for this feature.
#[must_use]
pub fn has_active_merge(feature: &FeatureDir) -> bool {
    load_state(feature).is_some_and(|state| state.is_active())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::FeatureSlug;

    fn wp(id: &str) -> WpId {
        WpId::parse(id).unwrap()
    }

    fn state(order: &[&str]) -> MergeState {
        MergeState::new("017-feature", "main", order.iter().map(|w| wp(w)).collect())
    }

    #[test]
    fn create_minimal() {
        let state = state(&["WP01", "WP02", "WP03"]);
        assert_eq!(state.feature_slug, "017-feature");
        assert_eq!(state.target_branch, "main");
        assert!(state.completed_wps.is_empty());
        assert!(state.current_wp.is_none());
        assert!(!state.has_pending_conflicts);
        assert_eq!(state.strategy, MergeStrategy::Merge);
    }

    #[test]
    fn remaining_wps_excludes_completed() {
        let mut state = state(&["WP01", "WP02", "WP03"]);
        state.completed_wps.push(wp("WP01"));
        assert_eq!(state.remaining_wps(), vec![wp("WP02"), wp("WP03")]);
    }

    #[test]
    fn progress_percent_bounds() {
        let mut state = state(&["WP01", "WP02", "WP03", "WP04"]);
        assert!((state.progress_percent() - 0.0).abs() < f64::EPSILON);
        state.completed_wps = vec![wp("WP01"), wp("WP02")];
        assert!((state.progress_percent() - 50.0).abs() < f64::EPSILON);
        state.completed_wps = state.wp_order.clone();
        assert!((state.progress_percent() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn progress_percent_empty_order() {
        let state = state(&[]);
        assert!((state.progress_percent() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn mark_wp_complete_clears_cursor_and_conflicts() {
        let mut state = state(&["WP01", "WP02"]);
        state.set_current_wp(wp("WP01"));
        state.set_pending_conflicts(true);
        state.mark_wp_complete(&wp("WP01"));
        assert!(state.completed_wps.contains(&wp("WP01")));
        assert!(state.current_wp.is_none());
        assert!(!state.has_pending_conflicts);
    }

    #[test]
    fn mark_wp_complete_is_idempotent() {
        let mut state = state(&["WP01", "WP02"]);
        state.mark_wp_complete(&wp("WP01"));
        state.mark_wp_complete(&wp("WP01"));
        assert_eq!(state.completed_wps, vec![wp("WP01")]);
    }

    #[test]
    fn partition_invariant_holds() {
        // wp_order == completed ⊎ current ⊎ remaining
        let mut state = state(&["WP01", "WP02", "WP03"]);
        state.mark_wp_complete(&wp("WP01"));
        state.set_current_wp(wp("WP02"));
        let mut all: Vec<WpId> = state.completed_wps.clone();
        all.extend(state.current_wp.clone());
        all.extend(
            state
                .remaining_wps()
                .into_iter()
                .filter(|w| Some(w) != state.current_wp.as_ref()),
        );
        all.sort();
        let mut order = state.wp_order.clone();
        order.sort();
        assert_eq!(all, order);
    }

    #[test]
    fn persistence_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let feature = FeatureDir::new(tmp.path(), FeatureSlug::parse("017-feature").unwrap());
        let mut s = state(&["WP01", "WP02", "WP03"]);
        s.completed_wps.push(wp("WP01"));
        s.set_current_wp(wp("WP02"));
        save_state(&feature, &s).unwrap();

        let loaded = load_state(&feature).unwrap();
        assert_eq!(loaded.wp_order, s.wp_order);
        assert_eq!(loaded.completed_wps, vec![wp("WP01")]);
        assert_eq!(loaded.current_wp, Some(wp("WP02")));
    }

    #[test]
    fn load_missing_or_corrupt_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let feature = FeatureDir::new(tmp.path(), FeatureSlug::parse("017-feature").unwrap());
        assert!(load_state(&feature).is_none());

        std::fs::create_dir_all(feature.path()).unwrap();
        std::fs::write(feature.merge_state_path(), "not valid json{").unwrap();
        assert!(load_state(&feature).is_none());

        std::fs::write(feature.merge_state_path(), r#"{"feature_slug": "test"}"#).unwrap();
        assert!(load_state(&feature).is_none());
    }

    #[test]
    fn clear_state_reports_deletion() {
        let tmp = tempfile::tempdir().unwrap();
        let feature = FeatureDir::new(tmp.path(), FeatureSlug::parse("017-feature").unwrap());
        assert!(!clear_state(&feature));
        save_state(&feature, &state(&["WP01"])).unwrap();
        assert!(clear_state(&feature));
        assert!(!feature.merge_state_path().exists());
    }

    #[test]
    fn active_merge_detection() {
        let tmp = tempfile::tempdir().unwrap();
        let feature = FeatureDir::new(tmp.path(), FeatureSlug::parse("017-feature").unwrap());
        assert!(!has_active_merge(&feature));

        let mut s = state(&["WP01", "WP02"]);
        s.completed_wps.push(wp("WP01"));
        save_state(&feature, &s).unwrap();
        assert!(has_active_merge(&feature));

        s.completed_wps.push(wp("WP02"));
        save_state(&feature, &s).unwrap();
        assert!(!has_active_merge(&feature));
    }
}
