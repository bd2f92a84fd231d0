//! Command handlers.

mod auth;
mod feature;
mod hooks;
mod merge;
mod move_task;
mod orchestrate;
mod sync;
mod validate;

use std::path::PathBuf;
use std::sync::Arc;

use spec_kitty_core::feature::{FeatureDir, FeatureSlug, SPECS_DIR_NAME};
use spec_kitty_core::runtime::home::kittify_home;
use spec_kitty_core::sync::clock::account_clock_path;
use spec_kitty_core::sync::{
    AccountScope, AuthClient, CredentialStore, EventEmitter, LamportClock, OfflineQueue,
};
use spec_kitty_core::{Error, Result};

use crate::cli::{Cli, Command};

/// Execution context shared by handlers.
pub struct Ctx {
    pub json: bool,
    pub repo_root: PathBuf,
}

pub async fn execute(cli: Cli) -> Result<serde_json::Value> {
    let repo_root = match cli.repo_root {
        Some(root) => root,
        None => std::env::current_dir().map_err(|e| Error::io(".", e))?,
    };
    let ctx = Ctx {
        json: cli.json,
        repo_root,
    };

    match cli.command {
        Command::CreateFeature { name } => feature::create_feature(&ctx, &name).await,
        Command::SetupPlan { feature } => feature::setup_plan(&ctx, feature.as_deref()),
        Command::FinalizeTasks { feature } => feature::finalize_tasks(&ctx, feature.as_deref()),
        Command::MoveTask {
            wp_id,
            to,
            feature,
            actor,
            force,
            reason,
            review_ref,
            evidence,
        } => {
            move_task::run(
                &ctx,
                &move_task::MoveTaskArgs {
                    wp_id,
                    to,
                    feature,
                    actor,
                    force,
                    reason,
                    review_ref,
                    evidence,
                },
            )
            .await
        }
        Command::Validate { feature } => validate::run(&ctx, feature.as_deref()),
        Command::Merge {
            resume,
            target,
            strategy,
            feature,
        } => merge::run(&ctx, resume, &target, &strategy, feature.as_deref()).await,
        Command::Sync { action } => sync::run(&ctx, &action).await,
        Command::Auth { action } => auth::run(&ctx, &action).await,
        Command::Orchestrate { feature, config } => {
            orchestrate::run(&ctx, feature.as_deref(), config.as_deref()).await
        }
        Command::Hooks { action } => hooks::run(&ctx, &action),
    }
}

/// Resolve a feature directory: explicit slug, else the only feature, else
/// the newest by slug number.
pub fn resolve_feature(ctx: &Ctx, slug: Option<&str>) -> Result<FeatureDir> {
    if let Some(slug) = slug {
        let parsed = FeatureSlug::parse(slug)?;
        let dir = FeatureDir::new(&ctx.repo_root, parsed);
        if !dir.path().is_dir() {
            return Err(Error::validation(format!(
                "Feature '{slug}' not found under {SPECS_DIR_NAME}/"
            )));
        }
        return Ok(dir);
    }

    let specs_dir = ctx.repo_root.join(SPECS_DIR_NAME);
    let mut slugs: Vec<String> = Vec::new();
    if let Ok(entries) = std::fs::read_dir(&specs_dir) {
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if FeatureSlug::parse(name).is_ok() {
                    slugs.push(name.to_string());
                }
            }
        }
    }
    slugs.sort();
    let last = slugs.pop().ok_or_else(|| {
        Error::validation(format!(
            "No feature directories found under {SPECS_DIR_NAME}/; run create-feature first"
        ))
    })?;
    FeatureSlug::parse(&last).map(|slug| FeatureDir::new(&ctx.repo_root, slug))
}

/// Auth client over the runtime home's credential store.
#[must_use]
pub fn auth_client() -> AuthClient {
    AuthClient::new(CredentialStore::new(&kittify_home()))
}

/// Open the shared offline queue under the runtime home.
pub async fn open_queue() -> Result<OfflineQueue> {
    OfflineQueue::open(&kittify_home().join("queue.db")).await
}

/// Current account scope, or the anonymous local scope when logged out.
#[must_use]
pub fn current_scope(auth: &AuthClient) -> AccountScope {
    auth.current_scope().unwrap_or_else(|| AccountScope {
        server_url: "https://spec-kitty-dev.fly.dev".to_string(),
        username: "anonymous".to_string(),
        team_slug: "local".to_string(),
    })
}

/// Build a fail-safe emitter bound to the current scope.
///
/// Returns `None` when the queue cannot be opened; emission is optional and
/// must never block the primary action.
pub async fn build_emitter() -> Option<EventEmitter> {
    let auth = auth_client();
    let scope = current_scope(&auth);
    let queue = match open_queue().await {
        Ok(queue) => Arc::new(queue),
        Err(err) => {
            tracing::warn!(%err, "offline queue unavailable; events will not be recorded");
            return None;
        }
    };
    let clock = LamportClock::load(account_clock_path(&kittify_home()));
    Some(EventEmitter::new(scope, queue, Arc::new(auth), clock))
}
