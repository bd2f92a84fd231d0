//! Command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "spec-kitty",
    version,
    about = "Multi-agent development orchestrator",
    disable_help_subcommand = true
)]
pub struct Cli {
    /// Emit a machine-readable JSON envelope instead of human output.
    #[arg(long, global = true)]
    pub json: bool,

    /// Repository root (defaults to the current directory).
    #[arg(long, global = true)]
    pub repo_root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a new feature directory under kitty-specs/.
    CreateFeature {
        /// Human name; becomes the kebab part of the NNN-slug.
        name: String,
    },

    /// Write the plan skeleton for a feature.
    SetupPlan {
        #[arg(long)]
        feature: Option<String>,
    },

    /// Validate the WP set and freeze the dependency graph.
    FinalizeTasks {
        #[arg(long)]
        feature: Option<String>,
    },

    /// Move a work package to a new lane.
    MoveTask {
        /// Work package id (WP01, WP02, ...).
        wp_id: String,

        /// Target lane (canonical name; `doing` is accepted as an alias).
        #[arg(long)]
        to: String,

        #[arg(long)]
        feature: Option<String>,

        /// Who is making the move.
        #[arg(long, default_value = "cli")]
        actor: String,

        /// Override the transition table; requires --reason.
        #[arg(long)]
        force: bool,

        #[arg(long)]
        reason: Option<String>,

        /// Review reference for for_review -> in_progress rollbacks.
        #[arg(long)]
        review_ref: Option<String>,

        /// Review approval evidence as JSON
        /// ({"reviewer": ..., "verdict": ..., "reference": ...}).
        #[arg(long)]
        evidence: Option<String>,
    },

    /// Check status integrity: snapshot drift and derived views.
    Validate {
        #[arg(long)]
        feature: Option<String>,
    },

    /// Merge completed WP branches into the target branch.
    Merge {
        /// Resume a paused merge after resolving conflicts.
        #[arg(long)]
        resume: bool,

        #[arg(long, default_value = "main")]
        target: String,

        /// merge | squash | rebase
        #[arg(long, default_value = "merge")]
        strategy: String,

        #[arg(long)]
        feature: Option<String>,
    },

    /// Offline queue synchronization.
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },

    /// Account authentication.
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },

    /// Run the WP scheduler over a feature.
    Orchestrate {
        #[arg(long)]
        feature: Option<String>,

        /// Orchestrator TOML config path.
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Managed git hook shims.
    Hooks {
        #[command(subcommand)]
        action: HooksAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum SyncAction {
    /// Drain the offline queue immediately.
    Now,
    /// Connectivity and queue diagnostics.
    Status,
}

#[derive(Debug, Subcommand)]
pub enum AuthAction {
    /// Store credentials for an account.
    Login {
        #[arg(long)]
        server: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        team: String,
        #[arg(long)]
        token: String,
        /// Switch accounts even if the previous scope has pending events.
        #[arg(long)]
        force: bool,
    },
    /// Remove stored credentials.
    Logout,
    /// Show authentication and queue state.
    Status,
}

#[derive(Debug, Subcommand)]
pub enum HooksAction {
    /// Install managed hook shims into .git/hooks.
    Install {
        /// Overwrite user-authored hooks.
        #[arg(long)]
        force: bool,
    },
    /// Remove managed hook shims.
    Remove {
        #[arg(long)]
        force: bool,
    },
}

impl Command {
    /// Canonical command name for envelopes.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateFeature { .. } => "create-feature",
            Self::SetupPlan { .. } => "setup-plan",
            Self::FinalizeTasks { .. } => "finalize-tasks",
            Self::MoveTask { .. } => "move-task",
            Self::Validate { .. } => "validate",
            Self::Merge { .. } => "merge",
            Self::Sync { .. } => "sync",
            Self::Auth { .. } => "auth",
            Self::Orchestrate { .. } => "orchestrate",
            Self::Hooks { .. } => "hooks",
        }
    }
}
