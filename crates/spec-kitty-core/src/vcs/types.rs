//! Backend-neutral VCS result types.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two backend shapes the core coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VcsBackendKind {
    /// Separate checkouts of the same repository (git worktrees).
    GitWorktree,
    /// Lightweight named workspaces sharing object storage (jj colocated).
    Colocated,
}

impl std::fmt::Display for VcsBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GitWorktree => f.write_str("git-worktree"),
            Self::Colocated => f.write_str("colocated"),
        }
    }
}

/// Capabilities a backend advertises; components may feature-gate on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcsCapabilities {
    /// Workspaces are addressable by name, not only by path.
    pub named_workspaces: bool,
    /// Workspaces share one underlying object store.
    pub shared_object_store: bool,
    /// Each workspace carries its own branch.
    pub branch_per_workspace: bool,
    /// Backend can enumerate conflicted paths.
    pub conflict_detection: bool,
}

/// Base a workspace branches from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceBase {
    Branch(String),
    Commit(String),
}

impl WorkspaceBase {
    #[must_use]
    pub fn as_ref_str(&self) -> &str {
        match self {
            Self::Branch(name) | Self::Commit(name) => name,
        }
    }
}

/// Result of creating a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceCreateResult {
    pub path: PathBuf,
    pub branch: String,
    pub base: String,
    pub backend: VcsBackendKind,
}

/// A located workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    pub path: PathBuf,
    /// Branch checked out in this workspace, when the backend tracks one.
    pub branch: Option<String>,
    /// Head commit id.
    pub head: Option<String>,
    /// Whether this is the primary checkout rather than a WP workspace.
    pub is_primary: bool,
}

/// A single commit/change description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeInfo {
    pub id: String,
    pub author: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub summary: String,
}

/// A conflicted path reported by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub path: PathBuf,
}
