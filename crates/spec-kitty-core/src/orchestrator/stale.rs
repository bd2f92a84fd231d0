//! Stale work-package detection.
//!
//! WPs sitting in `in_progress` with no recent workspace commits usually
//! mean the agent stopped without transitioning the lane. Commit timestamps
//! on the WP's own branch act as a heartbeat; past the threshold the WP is
//! flagged for the UI and telemetry. Staleness is an observation and never
//! moves the lane.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::feature::{FeatureSlug, WpId};
use crate::vcs::Vcs;

/// Default inactivity threshold in minutes.
pub const DEFAULT_STALE_THRESHOLD_MINUTES: i64 = 10;

/// Result of checking a single WP for staleness.
#[derive(Debug, Clone, Serialize)]
pub struct StaleCheckResult {
    pub wp_id: WpId,
    pub is_stale: bool,
    pub last_commit_time: Option<DateTime<Utc>>,
    pub minutes_since_commit: Option<f64>,
    pub worktree_exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StaleCheckResult {
    fn absent(wp_id: WpId) -> Self {
        Self {
            wp_id,
            is_stale: false,
            last_commit_time: None,
            minutes_since_commit: None,
            worktree_exists: false,
            error: None,
        }
    }
}

/// Check one WP's workspace for staleness.
///
/// A WP is stale when its worktree exists and the last commit is older than
/// `threshold_minutes`. A missing worktree or an undeterminable commit time
/// is never stale.
pub async fn check_wp_staleness(
    vcs: &dyn Vcs,
    wp_id: &WpId,
    worktree_path: &Path,
    threshold_minutes: i64,
) -> StaleCheckResult {
    if !worktree_path.exists() {
        return StaleCheckResult::absent(wp_id.clone());
    }

    match vcs.get_last_commit_time(worktree_path).await {
        Ok(Some(last_commit)) => {
            let minutes_since = (Utc::now() - last_commit).num_seconds() as f64 / 60.0;
            StaleCheckResult {
                wp_id: wp_id.clone(),
                is_stale: minutes_since > threshold_minutes as f64,
                last_commit_time: Some(last_commit),
                minutes_since_commit: Some((minutes_since * 10.0).round() / 10.0),
                worktree_exists: true,
                error: None,
            }
        }
        Ok(None) => StaleCheckResult {
            wp_id: wp_id.clone(),
            is_stale: false,
            last_commit_time: None,
            minutes_since_commit: None,
            worktree_exists: true,
            error: Some("Could not determine last commit time".to_string()),
        },
        Err(err) => StaleCheckResult {
            wp_id: wp_id.clone(),
            is_stale: false,
            last_commit_time: None,
            minutes_since_commit: None,
            worktree_exists: true,
            error: Some(err.to_string()),
        },
    }
}

/// Locate the worktree for a WP under `<repo>/.worktrees/<feature>-<wp>`.
///
/// Falls back to a case-insensitive directory scan when the exact name is
/// absent.
#[must_use]
pub fn find_worktree_for_wp(
    main_repo_root: &Path,
    feature_slug: &FeatureSlug,
    wp_id: &WpId,
) -> Option<PathBuf> {
    let worktrees_dir = main_repo_root.join(".worktrees");
    if !worktrees_dir.exists() {
        return None;
    }

    let expected = format!("{feature_slug}-{wp_id}");
    let exact = worktrees_dir.join(&expected);
    if exact.exists() {
        return Some(exact);
    }

    let expected_lower = expected.to_lowercase();
    std::fs::read_dir(&worktrees_dir)
        .ok()?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .find(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.to_lowercase() == expected_lower)
        })
}
