//! Core error type shared across subsystems.
//!
//! Pure computational layers (reducer, validator, clock) return these errors;
//! the CLI boundary translates them into canonical JSON envelopes. Emission
//! and queueing paths are fail-safe and log instead of propagating.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the Spec Kitty core.
#[derive(Debug, Error)]
pub enum Error {
    /// Transition guard failure, schema violation, cyclic dependencies,
    /// or Phase-2 drift.
    #[error("{message}")]
    Validation {
        /// Human-readable description of the violation.
        message: String,
        /// Field or entity the violation applies to, when known.
        field: Option<String>,
    },

    /// Git preflight failed; the payload carries remediation commands.
    #[error("git preflight failed: {0}")]
    Preflight(String),

    /// Backend-specific VCS operational failure.
    #[error("vcs error: {message}")]
    Vcs {
        message: String,
        /// Path of the workspace or repository involved.
        path: Option<PathBuf>,
    },

    /// Transport failure in sync or auth; never propagates through emission.
    #[error("network error: {0}")]
    Network(String),

    /// 401/403 from the sync endpoint, or missing/expired credentials.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Scheduler-level failure: agent invocation exhausted retries and
    /// fallbacks, or the WP was blocked by a failed dependency.
    #[error("work package {wp_id} failed: {message}")]
    WpFailed { wp_id: String, message: String },

    /// Merge cannot start or continue (pending conflicts, bad state file).
    #[error("merge error: {0}")]
    Merge(String),

    /// Invalid configuration value.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Error {
    /// Build a validation error without a field attribution.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Build a validation error attributed to a specific field.
    #[must_use]
    pub fn validation_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Build a VCS error without a path.
    #[must_use]
    pub fn vcs(message: impl Into<String>) -> Self {
        Self::Vcs {
            message: message.into(),
            path: None,
        }
    }

    /// Build a VCS error attributed to a workspace path.
    #[must_use]
    pub fn vcs_at(message: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::Vcs {
            message: message.into(),
            path: Some(path.into()),
        }
    }

    /// Wrap an I/O error with the path it occurred at.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable machine-readable code for the CLI error envelope.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Preflight(_) => "GIT_PREFLIGHT_FAILED",
            Self::Vcs { .. } => "VCS_ERROR",
            Self::Network(_) => "NETWORK_ERROR",
            Self::Auth(_) => "AUTH_ERROR",
            Self::WpFailed { .. } => "WP_FAILED",
            Self::Merge(_) => "VCS_ERROR",
            Self::InvalidConfig(_) => "USAGE_ERROR",
            Self::Io { .. } | Self::Serialization(_) | Self::Database(_) => "SYSTEM_ERROR",
        }
    }
}
