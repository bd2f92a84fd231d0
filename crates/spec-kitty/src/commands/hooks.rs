//! `hooks install|remove`: managed git hook shims.

use spec_kitty_core::runtime::home::{ensure_runtime_home, kittify_home};
use spec_kitty_core::runtime::hooks::{install_project_hook_shims, remove_project_hook_shims};
use spec_kitty_core::Result;

use crate::cli::HooksAction;
use crate::commands::Ctx;
use crate::ui;

pub fn run(ctx: &Ctx, action: &HooksAction) -> Result<serde_json::Value> {
    match action {
        HooksAction::Install { force } => {
            let home = ensure_runtime_home(&kittify_home(), env!("CARGO_PKG_VERSION"))?;
            let result = install_project_hook_shims(&ctx.repo_root, &home.root, *force)?;
            if !ctx.json {
                ui::success(&format!(
                    "{} installed, {} updated, {} unchanged",
                    result.installed.len(),
                    result.updated.len(),
                    result.unchanged.len()
                ));
                for hook in &result.skipped_user_hooks {
                    ui::warn(&format!(
                        "{hook} is user-authored; pass --force to replace it"
                    ));
                }
            }
            Ok(serde_json::json!({
                "installed": result.installed,
                "updated": result.updated,
                "unchanged": result.unchanged,
                "skipped_user_hooks": result.skipped_user_hooks,
            }))
        }
        HooksAction::Remove { force } => {
            let removed = remove_project_hook_shims(&ctx.repo_root, *force)?;
            if !ctx.json {
                ui::success(&format!("removed {} hook shim(s)", removed.len()));
            }
            Ok(serde_json::json!({ "removed": removed }))
        }
    }
}
