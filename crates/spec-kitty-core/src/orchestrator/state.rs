//! Transient scheduler state, persisted for crash recovery.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::feature::{FeatureDir, FeatureSlug, WpId};

/// Filename of the persisted run state inside a feature directory.
pub const RUN_STATE_FILENAME: &str = "orchestration-run.json";

/// Error recorded on WPs whose dependency set contains a failure.
pub const BLOCKED_BY_FAILED_DEPS: &str = "Blocked by failed dependencies";

/// Scheduler-level phase of one WP.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WpStatus {
    Pending,
    Ready,
    Implementation,
    Review,
    Completed,
    Failed,
}

impl WpStatus {
    /// Terminal scheduler states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// A phase that a live task should be driving.
    #[must_use]
    pub const fn is_in_phase(self) -> bool {
        matches!(self, Self::Implementation | Self::Review)
    }
}

/// Execution record for a single WP within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WpExecution {
    pub wp_id: WpId,
    pub status: WpStatus,
    #[serde(default)]
    pub implementation_retries: u32,
    #[serde(default)]
    pub review_retries: u32,
    #[serde(default)]
    pub implementation_started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub implementation_completed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub review_started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub review_completed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub assigned_agent: Option<String>,
    #[serde(default)]
    pub fallback_agents_tried: Vec<String>,
    #[serde(default)]
    pub review_feedback: Option<String>,
    #[serde(default)]
    pub workspace_path: Option<PathBuf>,
    /// Observation only; staleness never moves the lane.
    #[serde(default)]
    pub stale: bool,
}

impl WpExecution {
    #[must_use]
    pub fn new(wp_id: WpId) -> Self {
        Self {
            wp_id,
            status: WpStatus::Pending,
            implementation_retries: 0,
            review_retries: 0,
            implementation_started: None,
            implementation_completed: None,
            review_started: None,
            review_completed: None,
            last_error: None,
            assigned_agent: None,
            fallback_agents_tried: Vec::new(),
            review_feedback: None,
            workspace_path: None,
            stale: false,
        }
    }

    /// Mark failed with a reason; terminal.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = WpStatus::Failed;
        self.last_error = Some(error.into());
    }
}

/// State of one orchestration run over a feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationRun {
    pub run_id: String,
    pub feature_slug: FeatureSlug,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub work_packages: BTreeMap<WpId, WpExecution>,
    #[serde(default)]
    pub wps_total: u64,
    #[serde(default)]
    pub wps_completed: u64,
    #[serde(default)]
    pub wps_failed: u64,
}

impl OrchestrationRun {
    #[must_use]
    pub fn new(feature_slug: FeatureSlug, wp_ids: impl IntoIterator<Item = WpId>) -> Self {
        let work_packages: BTreeMap<WpId, WpExecution> = wp_ids
            .into_iter()
            .map(|id| (id.clone(), WpExecution::new(id)))
            .collect();
        let wps_total = work_packages.len() as u64;
        Self {
            run_id: format!("run-{}", ulid::Ulid::new()),
            feature_slug,
            started_at: Utc::now(),
            work_packages,
            wps_total,
            wps_completed: 0,
            wps_failed: 0,
        }
    }

    /// Every WP has reached COMPLETED or FAILED.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.work_packages.values().all(|wp| wp.status.is_terminal())
    }

    /// Recount the completion counters from per-WP status.
    pub fn refresh_counters(&mut self) {
        self.wps_completed = self
            .work_packages
            .values()
            .filter(|wp| wp.status == WpStatus::Completed)
            .count() as u64;
        self.wps_failed = self
            .work_packages
            .values()
            .filter(|wp| wp.status == WpStatus::Failed)
            .count() as u64;
    }
}

/// Persist the run state into the feature directory.
pub fn save_state(feature: &FeatureDir, run: &OrchestrationRun) -> Result<()> {
    let path = feature.path().join(RUN_STATE_FILENAME);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let raw = serde_json::to_string_pretty(run)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, raw).map_err(|e| Error::io(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| Error::io(&path, e))?;
    Ok(())
}

/// Load persisted run state, if any.
pub fn load_state(feature: &FeatureDir) -> Option<OrchestrationRun> {
    let path = feature.path().join(RUN_STATE_FILENAME);
    std::fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
}

/// Remove persisted run state; `true` when a file was deleted.
pub fn clear_state(feature: &FeatureDir) -> bool {
    std::fs::remove_file(feature.path().join(RUN_STATE_FILENAME)).is_ok()
}
