//! `validate`: status integrity checks.

use spec_kitty_core::status::store::{IssueSeverity, StatusStore};
use spec_kitty_core::{Error, Result};

use crate::commands::{resolve_feature, Ctx};
use crate::ui;

pub fn run(ctx: &Ctx, feature: Option<&str>) -> Result<serde_json::Value> {
    let feature = resolve_feature(ctx, feature)?;
    let store = StatusStore::new(feature.clone());
    let phase = feature.meta().status_phase;

    let drift = store.validate_materialization_drift()?;
    let view_issues = store.validate_derived_views(phase)?;

    let mut issues: Vec<serde_json::Value> = Vec::new();
    if let Some(message) = &drift {
        issues.push(serde_json::json!({
            "severity": "error",
            "kind": "materialization_drift",
            "message": message,
        }));
    }
    for issue in &view_issues {
        issues.push(serde_json::json!({
            "severity": match issue.severity {
                IssueSeverity::Warning => "warning",
                IssueSeverity::Error => "error",
            },
            "kind": "derived_view_drift",
            "wp_id": issue.wp_id.as_str(),
            "message": issue.message,
        }));
    }

    let has_errors = drift.is_some()
        || view_issues
            .iter()
            .any(|i| i.severity == IssueSeverity::Error);

    if !ctx.json {
        if issues.is_empty() {
            ui::success(&format!("{} status is consistent", feature.slug()));
        } else {
            for issue in &view_issues {
                match issue.severity {
                    IssueSeverity::Warning => ui::warn(&issue.message),
                    IssueSeverity::Error => ui::error(&issue.message),
                }
            }
            if let Some(message) = &drift {
                ui::error(message);
            }
        }
    }

    if has_errors {
        return Err(Error::validation(format!(
            "Status validation failed with {} issue(s) for {}",
            issues.len(),
            feature.slug()
        )));
    }
    Ok(serde_json::json!({
        "feature_slug": feature.slug().as_str(),
        "status_phase": u8::from(phase),
        "issues": issues,
    }))
}
