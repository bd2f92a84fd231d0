//! Backend detection and the `get_vcs` factory.

use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::vcs::colocated::ColocatedVcs;
use crate::vcs::git::GitWorktreeVcs;
use crate::vcs::types::VcsBackendKind;
use crate::vcs::Vcs;

/// Detect which backend shape a repository uses.
///
/// A `.jj` directory marks a colocated workspace repository (colocated repos
/// also keep `.git`, so the jj marker is checked first); a bare `.git` marks
/// the git-worktree shape.
pub fn detect_backend(repo_root: &Path) -> Result<VcsBackendKind> {
    if repo_root.join(".jj").is_dir() {
        return Ok(VcsBackendKind::Colocated);
    }
    if repo_root.join(".git").exists() {
        return Ok(VcsBackendKind::GitWorktree);
    }
    Err(Error::vcs_at(
        "No supported VCS found: expected a .git or .jj directory",
        repo_root,
    ))
}

/// Return the backend implementation for a repository.
pub fn get_vcs(repo_root: &Path) -> Result<Arc<dyn Vcs>> {
    Ok(match detect_backend(repo_root)? {
        VcsBackendKind::GitWorktree => Arc::new(GitWorktreeVcs::new()),
        VcsBackendKind::Colocated => Arc::new(ColocatedVcs::new()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_git_repository() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join(".git")).unwrap();
        assert_eq!(detect_backend(tmp.path()).unwrap(), VcsBackendKind::GitWorktree);
    }

    #[test]
    fn jj_marker_wins_over_git() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join(".git")).unwrap();
        std::fs::create_dir(tmp.path().join(".jj")).unwrap();
        assert_eq!(detect_backend(tmp.path()).unwrap(), VcsBackendKind::Colocated);
    }

    #[test]
    fn no_vcs_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(detect_backend(tmp.path()).is_err());
    }
}
