//! Ordered, resumable merge of completed WP branches into the target.
//!
//! WPs merge in topological dependency order (ties by id), one at a time;
//! the main repository is never touched by two merges at once. Before each
//! step the target is fast-forwarded from its remote when one is tracked.
//! Conflicts confined to recognized status files are auto-resolved; any
//! other conflict pauses the sequence with `has_pending_conflicts` set, and
//! a paused merge must be resolved and resumed before a new one may start.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::feature::{FeatureDir, WpId};
use crate::merge::state::{self, MergeState, MergeStrategy};
use crate::merge::status_resolver::{is_status_file, resolve_status_file};
use crate::orchestrator::graph::{build_dependency_graph, topo_order};
use crate::status::lane::Lane;
use crate::status::store::StatusStore;
use crate::vcs::preflight::run_git_preflight;
use crate::vcs::run_git;

/// Result of driving a merge sequence.
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    /// Every WP branch merged; state cleared.
    Completed { merged: Vec<WpId> },
    /// A conflict outside the status files needs a human; state saved.
    Paused {
        wp_id: WpId,
        conflict_paths: Vec<String>,
    },
}

/// Single-threaded per-feature merge driver.
pub struct MergeCoordinator {
    feature: FeatureDir,
    repo_root: PathBuf,
    store: StatusStore,
}

impl MergeCoordinator {
    #[must_use]
    pub fn new(feature: FeatureDir, repo_root: PathBuf) -> Self {
        let store = StatusStore::new(feature.clone());
        Self {
            feature,
            repo_root,
            store,
        }
    }

    /// Begin a new merge sequence over every WP in the `done` lane.
    ///
    /// Refuses when a paused merge exists: resolve its conflicts and resume
    /// instead.
    pub async fn start(
        &self,
        target_branch: &str,
        strategy: MergeStrategy,
    ) -> Result<MergeOutcome> {
        if let Some(existing) = state::load_state(&self.feature) {
            if existing.has_pending_conflicts {
                return Err(Error::Merge(format!(
                    "A merge for {} is paused on conflicts in {}; resolve them and run \
                     `spec-kitty merge --resume`",
                    existing.feature_slug,
                    existing
                        .current_wp
                        .map_or_else(|| "<unknown>".to_string(), |wp| wp.to_string())
                )));
            }
            if existing.is_active() {
                return Err(Error::Merge(
                    "A merge is already in flight for this feature; use --resume".to_string(),
                ));
            }
        }

        self.preflight("merge")?;

        let order = self.mergeable_order()?;
        if order.is_empty() {
            return Err(Error::Merge(
                "No work packages in the done lane; nothing to merge".to_string(),
            ));
        }
        let merge_state = MergeState::new(
            self.feature.slug().as_str(),
            target_branch,
            order,
        )
        .with_strategy(strategy);
        state::save_state(&self.feature, &merge_state)?;
        self.run(merge_state).await
    }

    /// Resume a previously paused or interrupted sequence.
    pub async fn resume(&self) -> Result<MergeOutcome> {
        let mut merge_state = state::load_state(&self.feature).ok_or_else(|| {
            Error::Merge("No merge in flight for this feature".to_string())
        })?;
        self.preflight("merge --resume")?;

        if merge_state.has_pending_conflicts {
            // The human resolved the conflicts; finish the interrupted step.
            let unresolved = self.conflicted_paths().await?;
            if !unresolved.is_empty() {
                return Err(Error::Merge(format!(
                    "Conflicts remain in: {}",
                    unresolved.join(", ")
                )));
            }
            if self.merge_in_progress().await {
                let out = run_git(&["commit", "--no-edit"], &self.repo_root).await;
                if !out.success() {
                    return Err(Error::Merge(format!(
                        "Failed to conclude resolved merge: {}",
                        out.stderr.trim()
                    )));
                }
            }
            if let Some(current) = merge_state.current_wp.clone() {
                merge_state.mark_wp_complete(&current);
            } else {
                merge_state.set_pending_conflicts(false);
            }
            state::save_state(&self.feature, &merge_state)?;
        }

        self.run(merge_state).await
    }

    /// Topological order over WPs whose canonical lane is `done`.
    fn mergeable_order(&self) -> Result<Vec<WpId>> {
        let graph = build_dependency_graph(&self.feature)?;
        let snapshot = self.store.load_snapshot()?;
        Ok(topo_order(&graph)?
            .into_iter()
            .filter(|wp| snapshot.lane_of(wp) == Some(Lane::Done))
            .collect())
    }

    fn preflight(&self, command: &str) -> Result<()> {
        let result = run_git_preflight(&self.repo_root, true);
        if result.passed() {
            for warning in &result.warnings {
                info!(code = warning.code, "{}", warning.message);
            }
            return Ok(());
        }
        let payload = crate::vcs::preflight::build_failure_payload(&result, command);
        Err(Error::Preflight(payload.to_string()))
    }

    async fn run(&self, mut merge_state: MergeState) -> Result<MergeOutcome> {
        let target = merge_state.target_branch.clone();
        let out = run_git(&["checkout", &target], &self.repo_root).await;
        if !out.success() {
            return Err(Error::Merge(format!(
                "Cannot checkout target branch '{target}': {}",
                out.stderr.trim()
            )));
        }

        for wp_id in merge_state.remaining_wps() {
            merge_state.set_current_wp(wp_id.clone());
            state::save_state(&self.feature, &merge_state)?;

            self.pull_ff_only(&target).await;

            let branch = self.feature.wp_branch(&wp_id);
            info!(wp = %wp_id, %branch, "merging work package branch");
            let merged = self.merge_branch(&branch, merge_state.strategy).await?;
            if !merged {
                let conflicts = self.conflicted_paths().await?;
                match self.auto_resolve_status_conflicts(&conflicts).await? {
                    true => {
                        let message = format!("Merge {branch} (status files auto-resolved)");
                        let out = run_git(&["commit", "-m", &message], &self.repo_root).await;
                        if !out.success() {
                            return Err(Error::Merge(format!(
                                "Failed to commit auto-resolved merge: {}",
                                out.stderr.trim()
                            )));
                        }
                    }
                    false => {
                        warn!(wp = %wp_id, ?conflicts, "merge paused for human resolution");
                        merge_state.set_pending_conflicts(true);
                        state::save_state(&self.feature, &merge_state)?;
                        return Ok(MergeOutcome::Paused {
                            wp_id,
                            conflict_paths: conflicts,
                        });
                    }
                }
            }

            merge_state.mark_wp_complete(&wp_id);
            state::save_state(&self.feature, &merge_state)?;
        }

        let merged = merge_state.completed_wps.clone();
        let _ = state::clear_state(&self.feature);
        info!(count = merged.len(), "merge sequence complete");
        Ok(MergeOutcome::Completed { merged })
    }

    /// `pull --ff-only` when the target tracks a remote; skip with a note
    /// otherwise.
    async fn pull_ff_only(&self, target: &str) {
        let upstream = run_git(
            &[
                "rev-parse",
                "--abbrev-ref",
                "--symbolic-full-name",
                &format!("{target}@{{upstream}}"),
            ],
            &self.repo_root,
        )
        .await;
        if !upstream.success() {
            info!(%target, "target branch tracks no remote; skipping pull");
            return;
        }
        let out = run_git(&["pull", "--ff-only"], &self.repo_root).await;
        if !out.success() {
            warn!(%target, stderr = %out.stderr.trim(), "ff-only pull failed; continuing with local state");
        }
    }

    /// Run the per-WP merge; `Ok(false)` means conflicts stopped it.
    async fn merge_branch(&self, branch: &str, strategy: MergeStrategy) -> Result<bool> {
        let out = match strategy {
            MergeStrategy::Merge => {
                run_git(
                    &["merge", "--no-ff", "--no-edit", branch],
                    &self.repo_root,
                )
                .await
            }
            MergeStrategy::Squash => {
                let squash = run_git(&["merge", "--squash", branch], &self.repo_root).await;
                if !squash.success() {
                    squash
                } else {
                    run_git(
                        &["commit", "-m", &format!("Merge {branch} (squash)")],
                        &self.repo_root,
                    )
                    .await
                }
            }
            MergeStrategy::Rebase => {
                let rebased = run_git(&["rebase", "HEAD", branch], &self.repo_root).await;
                if !rebased.success() {
                    let _ = run_git(&["rebase", "--abort"], &self.repo_root).await;
                    rebased
                } else {
                    // Back on the target, fast-forward to the rebased branch.
                    let state = state::load_state(&self.feature);
                    let target = state.map_or_else(|| "main".to_string(), |s| s.target_branch);
                    let _ = run_git(&["checkout", &target], &self.repo_root).await;
                    run_git(&["merge", "--ff-only", branch], &self.repo_root).await
                }
            }
        };
        if out.success() {
            return Ok(true);
        }
        let conflicts = self.conflicted_paths().await?;
        if conflicts.is_empty() {
            return Err(Error::Merge(format!(
                "Merge of {branch} failed without conflicts: {}",
                out.stderr.trim()
            )));
        }
        Ok(false)
    }

    async fn conflicted_paths(&self) -> Result<Vec<String>> {
        let out = run_git(
            &["diff", "--name-only", "--diff-filter=U"],
            &self.repo_root,
        )
        .await;
        if !out.success() {
            return Err(Error::Merge(format!(
                "Could not enumerate conflicts: {}",
                out.stderr.trim()
            )));
        }
        Ok(out
            .stdout
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    /// Attempt auto-resolution; `Ok(true)` when every conflict was a status
    /// file and every region resolved.
    async fn auto_resolve_status_conflicts(&self, conflicts: &[String]) -> Result<bool> {
        if conflicts.is_empty() || !conflicts.iter().all(|path| is_status_file(path)) {
            return Ok(false);
        }
        let mut resolved_files: Vec<(PathBuf, String)> = Vec::new();
        for rel in conflicts {
            let path = self.repo_root.join(rel);
            let content = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
            match resolve_status_file(&content) {
                Some(resolved) => resolved_files.push((path, resolved)),
                None => return Ok(false),
            }
        }
        // All regions resolved; only now touch the tree.
        for (path, resolved) in &resolved_files {
            std::fs::write(path, resolved).map_err(|e| Error::io(path, e))?;
        }
        for rel in conflicts {
            let out = run_git(&["add", "--", rel], &self.repo_root).await;
            if !out.success() {
                return Err(Error::Merge(format!(
                    "Failed to stage resolved file {rel}: {}",
                    out.stderr.trim()
                )));
            }
        }
        info!(count = conflicts.len(), "auto-resolved status file conflicts");
        Ok(true)
    }

    async fn merge_in_progress(&self) -> bool {
        run_git(
            &["rev-parse", "-q", "--verify", "MERGE_HEAD"],
            &self.repo_root,
        )
        .await
        .success()
    }
}
