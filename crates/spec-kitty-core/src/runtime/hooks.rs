//! Managed git hook shims.
//!
//! Repository hooks stay minimal: each `.git/hooks/<name>` is a tiny shim
//! marked with `SPEC_KITTY_MANAGED_HOOK_SHIM=1` that execs the real hook
//! script from the runtime home. Non-managed, user-authored hooks are never
//! overwritten unless forced.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

/// Marker line identifying a shim this tool owns.
pub const MANAGED_SHIM_MARKER: &str = "SPEC_KITTY_MANAGED_HOOK_SHIM=1";

/// Hooks managed by default.
pub const MANAGED_HOOKS: &[&str] = &["pre-commit", "post-commit", "post-checkout", "post-merge"];

/// Result of installing shims into one project.
#[derive(Debug, Clone, Default)]
pub struct HookInstallResult {
    pub installed: Vec<String>,
    pub updated: Vec<String>,
    pub skipped_user_hooks: Vec<String>,
    pub unchanged: Vec<String>,
}

fn render_shim(hook_name: &str, global_home: &Path) -> String {
    let target = global_home.join("hooks").join(hook_name);
    format!(
        "#!/bin/sh\n\
         # Spec Kitty managed git hook shim ({hook_name})\n\
         # {MANAGED_SHIM_MARKER}\n\
         SPEC_KITTY_HOOK_TARGET=\"{target}\"\n\
         if [ ! -x \"$SPEC_KITTY_HOOK_TARGET\" ]; then\n\
         \texit 0\n\
         fi\n\
         exec \"$SPEC_KITTY_HOOK_TARGET\" \"$@\"\n",
        target = target.display(),
    )
}

/// Is this file a shim this tool owns?
#[must_use]
pub fn is_managed_shim(path: &Path) -> bool {
    std::fs::read_to_string(path)
        .map(|content| content.contains(MANAGED_SHIM_MARKER))
        .unwrap_or(false)
}

fn set_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o755);
        std::fs::set_permissions(path, perms).map_err(|e| Error::io(path, e))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

fn hooks_dir(repo_root: &Path) -> PathBuf {
    repo_root.join(".git").join("hooks")
}

/// Install or refresh hook shims inside `.git/hooks` for one project.
///
/// Existing user-authored hooks are preserved unless `force` is set;
/// managed shims are rewritten only when their content changed.
pub fn install_project_hook_shims(
    repo_root: &Path,
    global_home: &Path,
    force: bool,
) -> Result<HookInstallResult> {
    let hooks = hooks_dir(repo_root);
    std::fs::create_dir_all(&hooks).map_err(|e| Error::io(&hooks, e))?;

    let mut result = HookInstallResult::default();
    for hook_name in MANAGED_HOOKS {
        let dest = hooks.join(hook_name);
        let shim = render_shim(hook_name, global_home);

        if dest.exists() {
            if is_managed_shim(&dest) {
                let existing = std::fs::read_to_string(&dest).unwrap_or_default();
                if existing == shim {
                    result.unchanged.push((*hook_name).to_string());
                    continue;
                }
                result.updated.push((*hook_name).to_string());
            } else if force {
                debug!(hook = hook_name, "overwriting user hook (forced)");
                result.updated.push((*hook_name).to_string());
            } else {
                result.skipped_user_hooks.push((*hook_name).to_string());
                continue;
            }
        } else {
            result.installed.push((*hook_name).to_string());
        }

        std::fs::write(&dest, &shim).map_err(|e| Error::io(&dest, e))?;
        set_executable(&dest)?;
    }
    Ok(result)
}

/// Remove managed shims; user hooks survive unless forced.
pub fn remove_project_hook_shims(repo_root: &Path, force: bool) -> Result<Vec<String>> {
    let hooks = hooks_dir(repo_root);
    let mut removed = Vec::new();
    for hook_name in MANAGED_HOOKS {
        let path = hooks.join(hook_name);
        if !path.exists() {
            continue;
        }
        if force || is_managed_shim(&path) {
            std::fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
            removed.push((*hook_name).to_string());
        }
    }
    Ok(removed)
}
