//! Git worktree backend.
//!
//! Workspaces are separate checkouts created with `git worktree add`, each on
//! its own branch. Porcelain operations shell out to git; read-side queries
//! (branch head, commit time) go through libgit2 where that is cheaper than
//! spawning a process.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::vcs::types::{
    ChangeInfo, ConflictInfo, VcsBackendKind, VcsCapabilities, WorkspaceBase,
    WorkspaceCreateResult, WorkspaceInfo,
};
use crate::vcs::{run_git, Vcs};

/// Capability set of the git-worktree backend.
pub const GIT_CAPABILITIES: VcsCapabilities = VcsCapabilities {
    named_workspaces: false,
    shared_object_store: false,
    branch_per_workspace: true,
    conflict_detection: true,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct GitWorktreeVcs;

impl GitWorktreeVcs {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// True if a local branch with this name exists.
    fn branch_exists(repo_root: &Path, name: &str) -> bool {
        git2::Repository::open(repo_root)
            .and_then(|repo| repo.find_branch(name, git2::BranchType::Local).map(|_| ()))
            .is_ok()
    }
}

#[async_trait]
impl Vcs for GitWorktreeVcs {
    fn kind(&self) -> VcsBackendKind {
        VcsBackendKind::GitWorktree
    }

    fn capabilities(&self) -> VcsCapabilities {
        GIT_CAPABILITIES
    }

    async fn create_workspace(
        &self,
        repo_root: &Path,
        path: &Path,
        name: &str,
        base: &WorkspaceBase,
    ) -> Result<WorkspaceCreateResult> {
        if Self::branch_exists(repo_root, name) {
            return Err(Error::vcs_at(
                format!("Branch '{name}' already exists; refusing to reuse it for a workspace"),
                path,
            ));
        }
        for ws in self.list_workspaces(repo_root).await? {
            if ws.branch.as_deref() == Some(name) {
                return Err(Error::vcs_at(
                    format!("Branch '{name}' is already checked out at {}", ws.path.display()),
                    path,
                ));
            }
        }

        let path_str = path.to_string_lossy().into_owned();
        let out = run_git(
            &["worktree", "add", "-b", name, &path_str, base.as_ref_str()],
            repo_root,
        )
        .await;
        if !out.success() {
            return Err(Error::vcs_at(
                format!("git worktree add failed: {}", out.stderr.trim()),
                path,
            ));
        }
        Ok(WorkspaceCreateResult {
            path: path.to_path_buf(),
            branch: name.to_string(),
            base: base.as_ref_str().to_string(),
            backend: VcsBackendKind::GitWorktree,
        })
    }

    async fn remove_workspace(&self, repo_root: &Path, path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy().into_owned();
        let out = run_git(&["worktree", "remove", "--force", &path_str], repo_root).await;
        if !out.success() {
            return Err(Error::vcs_at(
                format!("git worktree remove failed: {}", out.stderr.trim()),
                path,
            ));
        }
        let _ = run_git(&["worktree", "prune"], repo_root).await;
        Ok(())
    }

    async fn list_workspaces(&self, repo_root: &Path) -> Result<Vec<WorkspaceInfo>> {
        let out = run_git(&["worktree", "list", "--porcelain"], repo_root).await;
        if !out.success() {
            return Err(Error::vcs_at(
                format!("git worktree list failed: {}", out.stderr.trim()),
                repo_root,
            ));
        }
        Ok(parse_worktree_porcelain(&out.stdout))
    }

    async fn get_workspace_info(&self, path: &Path) -> Result<Option<WorkspaceInfo>> {
        let all = self.list_workspaces(path).await?;
        Ok(all.into_iter().find(|ws| ws.path == path))
    }

    async fn get_last_commit_time(&self, path: &Path) -> Result<Option<DateTime<Utc>>> {
        if !path.exists() {
            return Ok(None);
        }
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
        paths: Option<&[PathBuf]>,
    ) -> Result<Option<ChangeInfo>> {
        match paths {
            Some(paths) => {
                for p in paths {
                    let p = p.to_string_lossy().into_owned();
                    let out = run_git(&["add", "--", &p], path).await;
                    if !out.success() {
                        return Err(Error::vcs_at(
                            format!("git add failed: {}", out.stderr.trim()),
                            path,
                        ));
                    }
                }
            }
            None => {
                let out = run_git(&["add", "-A"], path).await;
                if !out.success() {
                    return Err(Error::vcs_at(
                        format!("git add failed: {}", out.stderr.trim()),
                        path,
                    ));
                }
            }
        }

        let out = run_git(&["commit", "-m", message], path).await;
        if !out.success() {
            // Nothing staged is not a failure; the caller gets no change.
            if out.stdout.contains("nothing to commit") || out.stderr.contains("nothing to commit")
            {
                return Ok(None);
            }
            return Err(Error::vcs_at(
                format!("git commit failed: {}", out.stderr.trim()),
                path,
            ));
        }
        let changes = self.get_changes(path, Some("-1")).await?;
        Ok(changes.into_iter().next())
    }

    async fn get_changes(&self, path: &Path, range: Option<&str>) -> Result<Vec<ChangeInfo>> {
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
        Ok(parse_change_log(&out.stdout))
    }

    async fn detect_conflicts(&self, path: &Path) -> Result<Vec<ConflictInfo>> {
        let out = run_git(&["diff", "--name-only", "--diff-filter=U"], path).await;
        if !out.success() {
            return Err(Error::vcs_at(
                format!("git diff failed: {}", out.stderr.trim()),
                path,
            ));
        }
        Ok(out
            .stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| ConflictInfo {
                path: PathBuf::from(l.trim()),
            })
            .collect())
    }
}

fn parse_worktree_porcelain(stdout: &str) -> Vec<WorkspaceInfo> {
    let mut result = Vec::new();
    let mut current: Option<WorkspaceInfo> = None;
    let mut first = true;
    for line in stdout.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(ws) = current.take() {
                result.push(ws);
            }
            current = Some(WorkspaceInfo {
                path: PathBuf::from(path),
                branch: None,
                head: None,
                is_primary: first,
            });
            first = false;
        } else if let Some(head) = line.strip_prefix("HEAD ") {
            if let Some(ws) = current.as_mut() {
                ws.head = Some(head.to_string());
            }
        } else if let Some(branch) = line.strip_prefix("branch ") {
            if let Some(ws) = current.as_mut() {
                ws.branch = Some(
                    branch
                        .strip_prefix("refs/heads/")
                        .unwrap_or(branch)
                        .to_string(),
                );
            }
        }
    }
    if let Some(ws) = current {
        result.push(ws);
    }
    result
}

pub(crate) fn parse_change_log(stdout: &str) -> Vec<ChangeInfo> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| {
            let mut parts = line.splitn(4, '\0');
            let id = parts.next()?.to_string();
            let author = parts.next()?.to_string();
            let timestamp = parts
                .next()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|dt| dt.with_timezone(&Utc));
            let summary = parts.next().unwrap_or("").to_string();
            Some(ChangeInfo {
                id,
                author,
                timestamp,
                summary,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_worktree_porcelain_output() {
        let stdout = "worktree /repo\nHEAD abc123\nbranch refs/heads/main\n\nworktree /repo/.worktrees/001-x-WP01\nHEAD def456\nbranch refs/heads/001-x-WP01\n\n";
        let list = parse_worktree_porcelain(stdout);
        assert_eq!(list.len(), 2);
        assert!(list[0].is_primary);
        assert_eq!(list[0].branch.as_deref(), Some("main"));
        assert!(!list[1].is_primary);
        assert_eq!(list[1].branch.as_deref(), Some("001-x-WP01"));
        assert_eq!(list[1].head.as_deref(), Some("def456"));
    }

    #[test]
    fn parses_change_log_lines() {
        let stdout = "abc\0Alice\02026-01-15T10:00:00+00:00\0feat: initial\n";
        let changes = parse_change_log(stdout);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].id, "abc");
        assert_eq!(changes[0].author, "Alice");
        assert_eq!(changes[0].summary, "feat: initial");
        assert!(changes[0].timestamp.is_some());
    }

    #[test]
    fn capabilities_are_branch_per_workspace() {
        let vcs = GitWorktreeVcs::new();
        assert!(vcs.capabilities().branch_per_workspace);
        assert!(!vcs.capabilities().shared_object_store);
    }
}
