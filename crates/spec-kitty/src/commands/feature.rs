//! Feature lifecycle commands: create-feature, setup-plan, finalize-tasks.

use spec_kitty_core::feature::{FeatureDir, FeatureMeta, FeatureSlug, SPECS_DIR_NAME};
use spec_kitty_core::orchestrator::graph::{build_dependency_graph, finalize_graph, topo_order};
use spec_kitty_core::{Error, Result};

use crate::commands::{build_emitter, resolve_feature, Ctx};
use crate::ui;

fn kebab(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_end_matches('-').to_string()
}

fn next_feature_number(ctx: &Ctx) -> u32 {
    let specs_dir = ctx.repo_root.join(SPECS_DIR_NAME);
    let mut max = 0u32;
    if let Ok(entries) = std::fs::read_dir(specs_dir) {
        for entry in entries.flatten() {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(number) = name.get(..3).and_then(|n| n.parse::<u32>().ok()) {
                    max = max.max(number);
                }
            }
        }
    }
    max + 1
}

pub async fn create_feature(ctx: &Ctx, name: &str) -> Result<serde_json::Value> {
    let kebab_name = kebab(name);
    if kebab_name.is_empty() {
        return Err(Error::validation_field(
            format!("Feature name '{name}' contains no usable characters"),
            "name",
        ));
    }
    let number = next_feature_number(ctx);
    let slug = FeatureSlug::parse(format!("{number:03}-{kebab_name}"))?;
    let feature = FeatureDir::new(&ctx.repo_root, slug.clone());

    std::fs::create_dir_all(feature.tasks_dir())
        .map_err(|e| Error::io(feature.tasks_dir(), e))?;
    feature.write_meta(&FeatureMeta::default())?;

    let spec_path = feature.path().join("spec.md");
    if !spec_path.exists() {
        std::fs::write(&spec_path, format!("# {name}\n\n## Overview\n\nTBD.\n"))
            .map_err(|e| Error::io(&spec_path, e))?;
    }
    let tasks_md = feature.path().join("tasks.md");
    if !tasks_md.exists() {
        std::fs::write(&tasks_md, format!("# Tasks for {slug}\n"))
            .map_err(|e| Error::io(&tasks_md, e))?;
    }

    if let Some(emitter) = build_emitter().await {
        let _ = emitter.emit_feature_created(slug.as_str()).await;
    }

    if !ctx.json {
        ui::success(&format!("created feature {slug}"));
        ui::status(&format!("edit {} to get started", spec_path.display()));
    }
    Ok(serde_json::json!({
        "feature_slug": slug.as_str(),
        "path": feature.path().display().to_string(),
    }))
}

pub fn setup_plan(ctx: &Ctx, feature: Option<&str>) -> Result<serde_json::Value> {
    let feature = resolve_feature(ctx, feature)?;
    let plan_path = feature.path().join("plan.md");
    let created = if plan_path.exists() {
        false
    } else {
        std::fs::write(
            &plan_path,
            format!(
                "# Plan for {}\n\n## Approach\n\nTBD.\n\n## Work packages\n\nTBD.\n",
                feature.slug()
            ),
        )
        .map_err(|e| Error::io(&plan_path, e))?;
        true
    };

    if !ctx.json {
        if created {
            ui::success(&format!("wrote {}", plan_path.display()));
        } else {
            ui::status(&format!("plan already present at {}", plan_path.display()));
        }
    }
    Ok(serde_json::json!({
        "feature_slug": feature.slug().as_str(),
        "plan_path": plan_path.display().to_string(),
        "created": created,
    }))
}

pub fn finalize_tasks(ctx: &Ctx, feature: Option<&str>) -> Result<serde_json::Value> {
    let feature = resolve_feature(ctx, feature)?;
    let graph = build_dependency_graph(&feature)?;
    if graph.is_empty() {
        return Err(Error::validation(format!(
            "Feature {} has no WP files under tasks/",
            feature.slug()
        )));
    }
    finalize_graph(&graph)?;
    let order = topo_order(&graph)?;

    if !ctx.json {
        ui::success(&format!(
            "{} work packages finalized for {}",
            order.len(),
            feature.slug()
        ));
        for (idx, wp) in order.iter().enumerate() {
            let deps = &graph[wp];
            let detail = if deps.is_empty() {
                "no dependencies".to_string()
            } else {
                format!(
                    "after {}",
                    deps.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
                )
            };
            ui::tree_item(idx + 1 == order.len(), wp.as_str(), &detail);
        }
    }
    Ok(serde_json::json!({
        "feature_slug": feature.slug().as_str(),
        "work_packages": order.iter().map(ToString::to_string).collect::<Vec<_>>(),
    }))
}
