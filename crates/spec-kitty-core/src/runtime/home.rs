//! Global runtime home (`~/.kittify`) bootstrap.
//!
//! The home holds shared immutable assets: missions, templates, scripts,
//! hooks, and a cache. The managed directory set is closed;
//! `missions/custom/` is user-owned and never overwritten by any
//! bootstrap. Bootstrap runs under a file lock so N concurrent processes
//! cannot corrupt the managed directories. `cache/version.lock` records the
//! installed version.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::{Error, Result};

/// The closed set of managed directories under the runtime home.
pub const MANAGED_DIRS: &[&str] = &["missions", "templates", "scripts", "hooks", "cache"];

/// User-owned subtree the bootstrap must never overwrite.
pub const USER_OWNED_DIR: &str = "missions/custom";

/// Version sentinel inside the cache directory.
pub const VERSION_LOCK: &str = "cache/version.lock";

/// Resolve the runtime home directory.
///
/// `SPEC_KITTY_HOME` wins when set and non-empty; otherwise `~/.kittify` on
/// Unix and the platform data directory on Windows.
#[must_use]
pub fn kittify_home() -> PathBuf {
    if let Ok(custom) = std::env::var("SPEC_KITTY_HOME") {
        if !custom.trim().is_empty() {
            return PathBuf::from(custom);
        }
    }
    if cfg!(windows) {
        if let Some(dirs) = directories::ProjectDirs::from("", "", "kittify") {
            return dirs.data_local_dir().to_path_buf();
        }
    }
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".kittify"))
        .unwrap_or_else(|| PathBuf::from(".kittify"))
}

/// A bootstrapped runtime home.
#[derive(Debug, Clone)]
pub struct RuntimeHome {
    pub root: PathBuf,
    /// Whether this call created the managed layout.
    pub created: bool,
}

impl RuntimeHome {
    #[must_use]
    pub fn hooks_dir(&self) -> PathBuf {
        self.root.join("hooks")
    }

    #[must_use]
    pub fn version_lock_path(&self) -> PathBuf {
        self.root.join(VERSION_LOCK)
    }
}

/// Ensure the runtime home exists with its managed layout.
///
/// Safe to call from many processes at once: the whole bootstrap runs under
/// an exclusive lock on `.bootstrap.lock`. Existing content in
/// `missions/custom/` is left untouched.
pub fn ensure_runtime_home(root: &Path, version: &str) -> Result<RuntimeHome> {
    std::fs::create_dir_all(root).map_err(|e| Error::io(root, e))?;

    let lock_path = root.join(".bootstrap.lock");
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(|e| Error::io(&lock_path, e))?;
    lock_file
        .lock_exclusive()
        .map_err(|e| Error::io(&lock_path, e))?;

    let version_path = root.join(VERSION_LOCK);
    let already_current = std::fs::read_to_string(&version_path)
        .map(|v| v.trim() == version)
        .unwrap_or(false);

    let mut created = false;
    for dir in MANAGED_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            std::fs::create_dir_all(&path).map_err(|e| Error::io(&path, e))?;
            created = true;
        }
    }
    // The user-owned subtree exists but is never populated or cleaned here.
    let custom = root.join(USER_OWNED_DIR);
    if !custom.exists() {
        std::fs::create_dir_all(&custom).map_err(|e| Error::io(&custom, e))?;
    }

    if !already_current {
        std::fs::write(&version_path, format!("{version}\n"))
            .map_err(|e| Error::io(&version_path, e))?;
        debug!(%version, home = %root.display(), "runtime home version recorded");
    }

    Ok(RuntimeHome {
        root: root.to_path_buf(),
        created,
    })
}

/// Read the installed version from `cache/version.lock`.
#[must_use]
pub fn read_installed_version(root: &Path) -> Option<String> {
    std::fs::read_to_string(root.join(VERSION_LOCK))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
