//! Version-control capability surface.
//!
//! The core treats version control as a capability provider with two backend
//! shapes: separate checkouts of one repository (git worktrees) and
//! lightweight named workspaces over shared object storage (colocated jj
//! workspaces). Backends advertise capabilities; callers may feature-gate on
//! them. Pre-action repository trust checks live in [`preflight`].

pub mod colocated;
pub mod detection;
pub mod git;
pub mod preflight;
pub mod types;

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
pub use detection::{detect_backend, get_vcs};
pub use types::{
    ChangeInfo, ConflictInfo, VcsBackendKind, VcsCapabilities, WorkspaceBase,
    WorkspaceCreateResult, WorkspaceInfo,
};

/// Default timeout for a single VCS subprocess call.
pub const VCS_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Uniform operations every backend provides.
///
/// Each operation returns enough information for the scheduler to act on
/// (paths, branch names, commit ids) without knowing the backend.
#[async_trait]
pub trait Vcs: Send + Sync {
    fn kind(&self) -> VcsBackendKind;

    fn capabilities(&self) -> VcsCapabilities;

    /// Create an isolated checkout at `path` on a new branch `name`.
    ///
    /// Fails if any committed or tracked worktree already uses that branch.
    async fn create_workspace(
        &self,
        repo_root: &Path,
        path: &Path,
        name: &str,
        base: &WorkspaceBase,
    ) -> Result<WorkspaceCreateResult>;

    /// Detach and clean up a workspace.
    async fn remove_workspace(&self, repo_root: &Path, path: &Path) -> Result<()>;

    async fn list_workspaces(&self, repo_root: &Path) -> Result<Vec<WorkspaceInfo>>;

    async fn get_workspace_info(&self, path: &Path) -> Result<Option<WorkspaceInfo>>;

    /// Most recent commit timestamp on the workspace's own branch.
    ///
    /// Branch-local, never shared repo history: colocated backends keep a
    /// `.git` directory, and the shared jj history includes commits from all
    /// workspaces plus continuous auto-snapshots, so staleness must look at
    /// this worktree's branch only.
    async fn get_last_commit_time(&self, path: &Path) -> Result<Option<DateTime<Utc>>>;

    async fn commit(
        &self,
        path: &Path,
        message: &str,
        paths: Option<&[std::path::PathBuf]>,
    ) -> Result<Option<ChangeInfo>>;

    async fn get_changes(&self, path: &Path, range: Option<&str>) -> Result<Vec<ChangeInfo>>;

    async fn detect_conflicts(&self, path: &Path) -> Result<Vec<ConflictInfo>>;

    async fn has_conflicts(&self, path: &Path) -> Result<bool> {
        Ok(!self.detect_conflicts(path).await?.is_empty())
    }
}

/// Outcome of one subprocess invocation, normalized for deterministic
/// handling of missing binaries and timeouts.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub const fn success(&self) -> bool {
        self.status == 0
    }
}

/// Run a VCS binary with arguments in a working directory.
///
/// Missing executables report status 127, timeouts 124, mirroring shell
/// conventions so callers can classify without special cases.
pub async fn run_vcs_command(
    program: &str,
    args: &[&str],
    cwd: &Path,
    timeout: Duration,
) -> CommandOutput {
    let child = tokio::process::Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        },
        Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => CommandOutput {
            status: 127,
            stdout: String::new(),
            stderr: format!("{program} executable not found on PATH"),
        },
        Ok(Err(err)) => CommandOutput {
            status: -1,
            stdout: String::new(),
            stderr: err.to_string(),
        },
        Err(_) => CommandOutput {
            status: 124,
            stdout: String::new(),
            stderr: format!("{program} command timed out: {program} {}", args.join(" ")),
        },
    }
}

/// Shorthand for `git` invocations with the default timeout.
pub async fn run_git(args: &[&str], cwd: &Path) -> CommandOutput {
    run_vcs_command("git", args, cwd, VCS_COMMAND_TIMEOUT).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_reports_127() {
        let out = run_vcs_command(
            "definitely-not-a-real-vcs-binary",
            &["status"],
            Path::new("."),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(out.status, 127);
        assert!(out.stderr.contains("not found"));
    }

    #[tokio::test]
    async fn successful_command_captures_stdout() {
        let out = run_vcs_command("echo", &["hello"], Path::new("."), Duration::from_secs(5)).await;
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }
}
