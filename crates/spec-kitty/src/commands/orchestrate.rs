//! `orchestrate`: run the WP scheduler over a feature.

use std::path::Path;
use std::sync::Arc;

use spec_kitty_core::orchestrator::agents::CommandAgentInvoker;
use spec_kitty_core::orchestrator::config::OrchestratorConfig;
use spec_kitty_core::orchestrator::graph::{build_dependency_graph, finalize_graph};
use spec_kitty_core::orchestrator::scheduler::{ConcurrencyManager, Scheduler, SchedulerContext};
use spec_kitty_core::orchestrator::state::{self, OrchestrationRun, WpStatus};
use spec_kitty_core::status::store::StatusStore;
use spec_kitty_core::vcs::{get_vcs, preflight};
use spec_kitty_core::{Error, Result};

use crate::commands::{resolve_feature, Ctx};
use crate::ui;

pub async fn run(
    ctx: &Ctx,
    feature: Option<&str>,
    config_path: Option<&Path>,
) -> Result<serde_json::Value> {
    let feature = resolve_feature(ctx, feature)?;

    let preflight_result = preflight::run_git_preflight(&ctx.repo_root, true);
    if !preflight_result.passed() {
        let payload = preflight::build_failure_payload(&preflight_result, "orchestrate");
        return Err(Error::Preflight(payload.to_string()));
    }

    let config = match config_path {
        Some(path) => OrchestratorConfig::load(path)?,
        None => OrchestratorConfig::load(
            &ctx.repo_root.join(".spec-kitty").join("orchestrator.toml"),
        )?,
    };

    let graph = build_dependency_graph(&feature)?;
    if graph.is_empty() {
        return Err(Error::validation(format!(
            "Feature {} has no WP files to orchestrate",
            feature.slug()
        )));
    }
    finalize_graph(&graph)?;

    // Resume a previous interrupted run when its state is on disk.
    let run_state = state::load_state(&feature).unwrap_or_else(|| {
        OrchestrationRun::new(feature.slug().clone(), graph.keys().cloned())
    });

    let scheduler_ctx = Arc::new(SchedulerContext {
        concurrency: ConcurrencyManager::new(&config),
        invoker: Arc::new(CommandAgentInvoker::new(config.clone())),
        config,
        feature: feature.clone(),
        repo_root: ctx.repo_root.clone(),
        store: StatusStore::new(feature.clone()),
        vcs: get_vcs(&ctx.repo_root)?,
        state: tokio::sync::Mutex::new(run_state),
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    if !ctx.json {
        ui::status(&format!("orchestrating {}", feature.slug()));
    }
    let mut scheduler = Scheduler::new(Arc::clone(&scheduler_ctx), graph, shutdown_rx);
    let finished = scheduler.run().await?;

    if !ctx.json {
        for (idx, (wp_id, ex)) in finished.work_packages.iter().enumerate() {
            let detail = match ex.status {
                WpStatus::Completed => "completed".to_string(),
                WpStatus::Failed => format!(
                    "failed: {}",
                    ex.last_error.as_deref().unwrap_or("unknown error")
                ),
                other => other.to_string(),
            };
            ui::tree_item(idx + 1 == finished.work_packages.len(), wp_id.as_str(), &detail);
        }
        ui::success(&format!(
            "{} completed, {} failed",
            finished.wps_completed, finished.wps_failed
        ));
    }
    Ok(serde_json::json!({
        "feature_slug": feature.slug().as_str(),
        "run_id": finished.run_id,
        "completed": finished.wps_completed,
        "failed": finished.wps_failed,
        "work_packages": finished
            .work_packages
            .iter()
            .map(|(id, ex)| serde_json::json!({
                "wp_id": id.as_str(),
                "status": ex.status,
                "last_error": ex.last_error,
                "stale": ex.stale,
                "fallback_agents_tried": ex.fallback_agents_tried,
            }))
            .collect::<Vec<_>>(),
    }))
}
