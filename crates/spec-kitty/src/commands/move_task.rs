//! `move-task`: record a lane transition.

use spec_kitty_core::feature::WpId;
use spec_kitty_core::status::event::DoneEvidence;
use spec_kitty_core::status::lane::Lane;
use spec_kitty_core::status::store::{StatusStore, TransitionRequest};
use spec_kitty_core::{Error, Result};

use crate::commands::{build_emitter, resolve_feature, Ctx};
use crate::ui;

pub struct MoveTaskArgs {
    pub wp_id: String,
    pub to: String,
    pub feature: Option<String>,
    pub actor: String,
    pub force: bool,
    pub reason: Option<String>,
    pub review_ref: Option<String>,
    pub evidence: Option<String>,
}

pub async fn run(ctx: &Ctx, args: &MoveTaskArgs) -> Result<serde_json::Value> {
    let feature = resolve_feature(ctx, args.feature.as_deref())?;
    let wp_id = WpId::parse(&args.wp_id)?;
    let to_lane = Lane::parse(&args.to)?;

    let evidence: Option<DoneEvidence> = match args.evidence.as_deref() {
        Some(raw) => Some(serde_json::from_str(raw).map_err(|e| {
            Error::validation_field(format!("Invalid --evidence JSON: {e}"), "evidence")
        })?),
        None => None,
    };

    let store = StatusStore::new(feature.clone());
    let event = store.record_transition(
        &wp_id,
        to_lane,
        &TransitionRequest {
            actor: args.actor.clone(),
            reason: args.reason.clone(),
            review_ref: args.review_ref.clone(),
            evidence,
            // The CLI acts on behalf of a human who asserts the work state.
            workspace_context: Some(format!("cli:{}", feature.path().display())),
            subtasks_complete: true,
            implementation_evidence_present: true,
            force: args.force,
            execution_mode: Some("cli".to_string()),
            causation_id: None,
            correlation_id: None,
        },
    )?;

    if let Some(emitter) = build_emitter().await {
        let _ = emitter
            .emit_wp_status_changed(
                wp_id.as_str(),
                event.from_lane,
                event.to_lane,
                &args.actor,
                Some(feature.slug().as_str()),
                None,
            )
            .await;
    }

    if !ctx.json {
        ui::success(&format!(
            "{wp_id}: {} -> {}{}",
            event.from_lane,
            event.to_lane,
            if event.force { "  (forced)" } else { "" }
        ));
    }
    Ok(serde_json::json!({
        "feature_slug": feature.slug().as_str(),
        "wp_id": wp_id.as_str(),
        "from_lane": event.from_lane,
        "to_lane": event.to_lane,
        "force": event.force,
        "event_id": event.event_id,
    }))
}
