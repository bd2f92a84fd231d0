//! Deterministic multi-parent merge base for diamond dependencies.
//!
//! When a WP depends on several WPs that share a common ancestor, its
//! workspace needs a base containing all of them. The parents are merged in
//! sorted WP-id order onto a disposable branch
//! `<feature>-<wp>-merge-base`; any true content conflict aborts the
//! attempt. The branch is cleaned up on both success and failure, and the
//! resulting tree is identical no matter the order the dependencies were
//! passed in.

use std::path::Path;

use serde::Serialize;

use crate::feature::{FeatureSlug, WpId};
use crate::vcs::run_git;

/// Result of a multi-parent base computation.
#[derive(Debug, Clone, Serialize)]
pub struct MultiParentResult {
    pub success: bool,
    pub branch_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub conflicts: Vec<String>,
}

/// Name of the disposable base branch for a WP.
#[must_use]
pub fn merge_base_branch_name(feature_slug: &FeatureSlug, wp_id: &WpId) -> String {
    format!("{feature_slug}-{wp_id}-merge-base")
}

/// Merge the parent branches of `wp_id` onto a disposable base branch.
///
/// Parents merge in sorted WP-id order so repeated runs produce the same
/// tree. On conflict the merge is aborted, the branch deleted, and the
/// conflicted paths reported.
pub async fn create_multi_parent_base(
    feature_slug: &FeatureSlug,
    wp_id: &WpId,
    dependencies: &[WpId],
    repo_root: &Path,
) -> MultiParentResult {
    let branch_name = merge_base_branch_name(feature_slug, wp_id);
    let mut parents: Vec<&WpId> = dependencies.iter().collect();
    parents.sort();

    let fail = |error: String, conflicts: Vec<String>| MultiParentResult {
        success: false,
        branch_name: branch_name.clone(),
        commit_sha: None,
        error: Some(error),
        conflicts,
    };

    let Some(first) = parents.first() else {
        return fail("Multi-parent base requires at least one dependency".to_string(), vec![]);
    };

    // Anchor the base branch at the first parent.
    let first_branch = format!("{feature_slug}-{first}");
    let out = run_git(&["branch", &branch_name, &first_branch], repo_root).await;
    if !out.success() {
        return fail(
            format!("Failed to create base branch from {first_branch}: {}", out.stderr.trim()),
            vec![],
        );
    }
    let out = run_git(&["checkout", &branch_name], repo_root).await;
    if !out.success() {
        let _ = run_git(&["branch", "-D", &branch_name], repo_root).await;
        return fail(format!("Failed to checkout base branch: {}", out.stderr.trim()), vec![]);
    }

    for parent in parents.iter().skip(1) {
        let parent_branch = format!("{feature_slug}-{parent}");
        let out = run_git(
            &[
                "merge",
                "--no-ff",
                "--no-edit",
                "-m",
                &format!("Merge {parent_branch} into {branch_name}"),
                &parent_branch,
            ],
            repo_root,
        )
        .await;
        if !out.success() {
            // Collect the conflicted paths before aborting.
            let conflicts_out =
                run_git(&["diff", "--name-only", "--diff-filter=U"], repo_root).await;
            let conflicts: Vec<String> = conflicts_out
                .stdout
                .lines()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect();
            let _ = run_git(&["merge", "--abort"], repo_root).await;
            let _ = run_git(&["checkout", "-"], repo_root).await;
            let _ = run_git(&["branch", "-D", &branch_name], repo_root).await;
            return fail(
                format!("Merge conflict while merging {parent_branch}: {}", out.stderr.trim()),
                conflicts,
            );
        }
    }

    let sha_out = run_git(&["rev-parse", "HEAD"], repo_root).await;
    let commit_sha = sha_out.success().then(|| sha_out.stdout.trim().to_string());
    let _ = run_git(&["checkout", "-"], repo_root).await;

    MultiParentResult {
        success: true,
        branch_name,
        commit_sha,
        error: None,
        conflicts: Vec::new(),
    }
}

/// Delete the disposable base branch; `true` when it existed.
pub async fn cleanup_merge_base_branch(
    feature_slug: &FeatureSlug,
    wp_id: &WpId,
    repo_root: &Path,
) -> bool {
    let branch_name = merge_base_branch_name(feature_slug, wp_id);
    run_git(&["branch", "-D", &branch_name], repo_root)
        .await
        .success()
}
