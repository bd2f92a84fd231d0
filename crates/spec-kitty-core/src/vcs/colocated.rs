//! Colocated workspace backend (jj).
//!
//! Workspaces are named jj workspaces sharing one object store. Colocated
//! repositories keep a `.git` directory, so branch-local history queries
//! (commit timestamps, conflict-free logs) still go through git; only
//! workspace lifecycle and commit operations use the `jj` CLI.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::vcs::types::{
    ChangeInfo, ConflictInfo, VcsBackendKind, VcsCapabilities, WorkspaceBase,
    WorkspaceCreateResult, WorkspaceInfo,
};
use crate::vcs::{run_git, run_vcs_command, Vcs, VCS_COMMAND_TIMEOUT};

/// Capability set of the colocated backend.
pub const COLOCATED_CAPABILITIES: VcsCapabilities = VcsCapabilities {
    named_workspaces: true,
    shared_object_store: true,
    branch_per_workspace: true,
    conflict_detection: true,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct ColocatedVcs;

impl ColocatedVcs {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

async fn run_jj(args: &[&str], cwd: &Path) -> crate::vcs::CommandOutput {
    run_vcs_command("jj", args, cwd, VCS_COMMAND_TIMEOUT).await
}

#[async_trait]
impl Vcs for ColocatedVcs {
    fn kind(&self) -> VcsBackendKind {
        VcsBackendKind::Colocated
    }

    fn capabilities(&self) -> VcsCapabilities {
        COLOCATED_CAPABILITIES
    }

    async fn create_workspace(
        &self,
        repo_root: &Path,
        path: &Path,
        name: &str,
        base: &WorkspaceBase,
    ) -> Result<WorkspaceCreateResult> {
        for ws in self.list_workspaces(repo_root).await? {
            if ws.branch.as_deref() == Some(name) || ws.path == path {
                return Err(Error::vcs_at(
                    format!("Workspace '{name}' already exists at {}", ws.path.display()),
                    path,
                ));
            }
        }

        let path_str = path.to_string_lossy().into_owned();
        let out = run_jj(
            &[
                "workspace",
                "add",
                "--name",
                name,
                "--revision",
                base.as_ref_str(),
                &path_str,
            ],
            repo_root,
        )
        .await;
        if !out.success() {
            return Err(Error::vcs_at(
                format!("jj workspace add failed: {}", out.stderr.trim()),
                path,
            ));
        }

        // Pin the workspace to its own bookmark so downstream git-side
        // consumers (merge coordinator, staleness) see a branch.
        let out = run_jj(&["bookmark", "create", name, "-r", "@"], path).await;
        if !out.success() {
            return Err(Error::vcs_at(
                format!("jj bookmark create failed: {}", out.stderr.trim()),
                path,
            ));
        }

        Ok(WorkspaceCreateResult {
            path: path.to_path_buf(),
            branch: name.to_string(),
            base: base.as_ref_str().to_string(),
            backend: VcsBackendKind::Colocated,
        })
    }

    async fn remove_workspace(&self, repo_root: &Path, path: &Path) -> Result<()> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::vcs_at("Workspace path has no name", path))?;
        let out = run_jj(&["workspace", "forget", name], repo_root).await;
        if !out.success() {
            return Err(Error::vcs_at(
                format!("jj workspace forget failed: {}", out.stderr.trim()),
                path,
            ));
        }
        if path.exists() {
            std::fs::remove_dir_all(path).map_err(|e| Error::io(path, e))?;
        }
        Ok(())
    }

    async fn list_workspaces(&self, repo_root: &Path) -> Result<Vec<WorkspaceInfo>> {
        let out = run_jj(&["workspace", "list"], repo_root).await;
        if !out.success() {
            return Err(Error::vcs_at(
                format!("jj workspace list failed: {}", out.stderr.trim()),
                repo_root,
            ));
        }
        Ok(parse_workspace_list(repo_root, &out.stdout))
    }

    async fn get_workspace_info(&self, path: &Path) -> Result<Option<WorkspaceInfo>> {
        let all = self.list_workspaces(path).await?;
        Ok(all.into_iter().find(|ws| ws.path == path))
    }

    async fn get_last_commit_time(&self, path: &Path) -> Result<Option<DateTime<Utc>>> {
        if !path.exists() {
            return Ok(None);
        }
        // Always use git for worktree branch history; jj auto-snapshots the
        // working copy continuously and its shared history spans workspaces.
        let out = run_git(&["log", "-1", "--format=%cI"], path).await;
        if !out.success() || out.stdout.trim().is_empty() {
            return Ok(None);
        }
        Ok(DateTime::parse_from_rfc3339(out.stdout.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)))
    }

    async fn commit(
        &self,
        path: &Path,
        message: &str,
        _paths: Option<&[PathBuf]>,
    ) -> Result<Option<ChangeInfo>> {
        let out = run_jj(&["commit", "-m", message], path).await;
        if !out.success() {
            return Err(Error::vcs_at(
                format!("jj commit failed: {}", out.stderr.trim()),
                path,
            ));
        }
        let changes = self.get_changes(path, Some("-1")).await?;
        Ok(changes.into_iter().next())
    }

    async fn get_changes(&self, path: &Path, range: Option<&str>) -> Result<Vec<ChangeInfo>> {
        // git-side log keeps output shape identical across backends.
        let format = "--format=%H%x00%an%x00%cI%x00%s";
        let mut args = vec!["log", format];
        match range {
            Some("-1") => args.push("-1"),
            Some(r) => args.push(r),
            None => {}
        }
        let out = run_git(&args, path).await;
        if !out.success() {
            return Err(Error::vcs_at(
                format!("git log failed: {}", out.stderr.trim()),
                path,
            ));
        }
        Ok(super::git::parse_change_log(&out.stdout))
    }

    async fn detect_conflicts(&self, path: &Path) -> Result<Vec<ConflictInfo>> {
        let out = run_jj(&["resolve", "--list"], path).await;
        if !out.success() {
            // jj exits nonzero when there is nothing to resolve.
            if out.stderr.contains("No conflicts") || out.stdout.trim().is_empty() {
                return Ok(Vec::new());
            }
            return Err(Error::vcs_at(
                format!("jj resolve --list failed: {}", out.stderr.trim()),
                path,
            ));
        }
        Ok(out
            .stdout
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .map(|p| ConflictInfo {
                path: PathBuf::from(p),
            })
            .collect())
    }
}

fn parse_workspace_list(repo_root: &Path, stdout: &str) -> Vec<WorkspaceInfo> {
    // `jj workspace list` prints `name: <change-id> ...` per line; the
    // `default` workspace is the primary checkout at the repo root.
    stdout
        .lines()
        .filter_map(|line| {
            let (name, rest) = line.split_once(':')?;
            let name = name.trim();
            let head = rest.split_whitespace().next().map(String::from);
            let is_primary = name == "default";
            let path = if is_primary {
                repo_root.to_path_buf()
            } else {
                repo_root.join(".workspaces").join(name)
            };
            Some(WorkspaceInfo {
                path,
                branch: (!is_primary).then(|| name.to_string()),
                head,
                is_primary,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_workspace_list_lines() {
        let stdout = "default: qpvuntsm 1a2b3c4d main\n001-x-WP01: rlvkpnrz 5e6f7a8b\n";
        let list = parse_workspace_list(Path::new("/repo"), stdout);
        assert_eq!(list.len(), 2);
        assert!(list[0].is_primary);
        assert_eq!(list[0].path, PathBuf::from("/repo"));
        assert_eq!(list[1].branch.as_deref(), Some("001-x-WP01"));
    }

    #[test]
    fn capabilities_share_object_store() {
        let vcs = ColocatedVcs::new();
        assert!(vcs.capabilities().shared_object_store);
        assert!(vcs.capabilities().named_workspaces);
    }
}
