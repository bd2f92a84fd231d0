//! `sync now` / `sync status`.

use std::sync::Arc;
use std::time::Duration;

use spec_kitty_core::sync::{check_connectivity, BackgroundSyncService, ConnectivityStatus};
use spec_kitty_core::{Error, Result};

use crate::cli::SyncAction;
use crate::commands::{auth_client, current_scope, open_queue, Ctx};
use crate::ui;

pub async fn run(ctx: &Ctx, action: &SyncAction) -> Result<serde_json::Value> {
    match action {
        SyncAction::Now => sync_now(ctx).await,
        SyncAction::Status => status(ctx).await,
    }
}

async fn sync_now(ctx: &Ctx) -> Result<serde_json::Value> {
    let auth = auth_client();
    let scope = current_scope(&auth);
    let queue = Arc::new(open_queue().await?);
    let service = BackgroundSyncService::new(
        Arc::clone(&queue),
        Arc::new(auth),
        scope.key(),
        scope.server_url.clone(),
    );

    let result = service.sync_now().await?;
    let remaining = queue.size(&scope.key()).await?;

    if !ctx.json {
        ui::success(&format!(
            "delivered {} event(s), {} failed, {} still queued",
            result.delivered, result.failed, remaining
        ));
    }
    Ok(serde_json::json!({
        "attempted": result.attempted,
        "delivered": result.delivered,
        "failed": result.failed,
        "remaining": remaining,
    }))
}

async fn status(ctx: &Ctx) -> Result<serde_json::Value> {
    let auth = auth_client();
    let scope = current_scope(&auth);
    let queue = open_queue().await?;
    let pending = queue.size(&scope.key()).await?;

    let (connection, note) = match auth.get_access_token() {
        None => (
            "Not authenticated".to_string(),
            "Run `spec-kitty auth login` to enable sync".to_string(),
        ),
        Some(token) => {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .map_err(|e| Error::Network(e.to_string()))?;
            match check_connectivity(&client, &scope.server_url, &token).await {
                ConnectivityStatus::Connected => (
                    "Connected".to_string(),
                    "authentication valid".to_string(),
                ),
                ConnectivityStatus::AuthenticationFailed => (
                    "Authentication failed".to_string(),
                    "Run `spec-kitty auth login` to refresh credentials".to_string(),
                ),
                ConnectivityStatus::PermissionDenied => (
                    "Permission denied".to_string(),
                    "This account cannot publish to the team".to_string(),
                ),
                ConnectivityStatus::Unreachable(detail) => (
                    "Unreachable".to_string(),
                    format!("events queued for later sync ({detail})"),
                ),
            }
        }
    };

    if !ctx.json {
        ui::status(&format!("server: {connection} ({note})"));
        ui::status(&format!("queued events: {pending}"));
    }
    Ok(serde_json::json!({
        "connection": connection,
        "note": note,
        "scope": scope.key(),
        "pending_events": pending,
    }))
}
