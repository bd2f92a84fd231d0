//! `merge`: drive the merge coordinator.

use spec_kitty_core::merge::{MergeCoordinator, MergeOutcome, MergeStrategy};
use spec_kitty_core::{Error, Result};

use crate::commands::{resolve_feature, Ctx};
use crate::ui;

fn parse_strategy(raw: &str) -> Result<MergeStrategy> {
    match raw.to_ascii_lowercase().as_str() {
        "merge" => Ok(MergeStrategy::Merge),
        "squash" => Ok(MergeStrategy::Squash),
        "rebase" => Ok(MergeStrategy::Rebase),
        other => Err(Error::validation_field(
            format!("Unknown merge strategy '{other}': expected merge, squash, or rebase"),
            "strategy",
        )),
    }
}

pub async fn run(
    ctx: &Ctx,
    resume: bool,
    target: &str,
    strategy: &str,
    feature: Option<&str>,
) -> Result<serde_json::Value> {
    let feature = resolve_feature(ctx, feature)?;
    let coordinator = MergeCoordinator::new(feature.clone(), ctx.repo_root.clone());

    let outcome = if resume {
        coordinator.resume().await?
    } else {
        coordinator.start(target, parse_strategy(strategy)?).await?
    };

    match outcome {
        MergeOutcome::Completed { merged } => {
            if !ctx.json {
                ui::success(&format!(
                    "merged {} work package branch(es) into {target}",
                    merged.len()
                ));
            }
            Ok(serde_json::json!({
                "feature_slug": feature.slug().as_str(),
                "completed": true,
                "merged": merged.iter().map(ToString::to_string).collect::<Vec<_>>(),
            }))
        }
        MergeOutcome::Paused {
            wp_id,
            conflict_paths,
        } => {
            if !ctx.json {
                ui::warn(&format!(
                    "merge of {wp_id} paused on conflicts; resolve and run `spec-kitty merge --resume`"
                ));
                for path in &conflict_paths {
                    ui::tree_item(false, path, "conflicted");
                }
            }
            Ok(serde_json::json!({
                "feature_slug": feature.slug().as_str(),
                "completed": false,
                "paused_on": wp_id.as_str(),
                "conflict_paths": conflict_paths,
            }))
        }
    }
}
