//! `auth login|logout|status`.

use spec_kitty_core::sync::Credentials;
use spec_kitty_core::Result;

use crate::cli::AuthAction;
use crate::commands::{auth_client, current_scope, open_queue, Ctx};
use crate::ui;

pub async fn run(ctx: &Ctx, action: &AuthAction) -> Result<serde_json::Value> {
    match action {
        AuthAction::Login {
            server,
            username,
            team,
            token,
            force,
        } => login(ctx, server, username, team, token, *force).await,
        AuthAction::Logout => logout(ctx),
        AuthAction::Status => status(ctx).await,
    }
}

async fn login(
    ctx: &Ctx,
    server: &str,
    username: &str,
    team: &str,
    token: &str,
    force: bool,
) -> Result<serde_json::Value> {
    let auth = auth_client();
    let queue = open_queue().await?;
    let credentials = Credentials {
        server_url: server.trim_end_matches('/').to_string(),
        username: username.to_string(),
        team_slug: team.to_string(),
        access_token: token.to_string(),
        refresh_token: None,
    };
    auth.obtain_tokens(&credentials, &queue, force).await?;

    if !ctx.json {
        ui::success(&format!("logged in as {username} ({team}) at {server}"));
    }
    Ok(serde_json::json!({
        "scope": credentials.scope().key(),
        "username": username,
        "team_slug": team,
    }))
}

fn logout(ctx: &Ctx) -> Result<serde_json::Value> {
    let auth = auth_client();
    let removed = auth.logout()?;
    if !ctx.json {
        if removed {
            ui::success("logged out");
        } else {
            ui::status("no stored credentials");
        }
    }
    Ok(serde_json::json!({ "removed": removed }))
}

async fn status(ctx: &Ctx) -> Result<serde_json::Value> {
    let auth = auth_client();
    let authenticated = auth.is_authenticated();
    let scope = current_scope(&auth);
    let pending = open_queue().await?.size(&scope.key()).await?;

    if !ctx.json {
        if authenticated {
            ui::status(&format!(
                "authenticated as {} ({})",
                scope.username, scope.team_slug
            ));
        } else {
            ui::status("not authenticated");
        }
        ui::status(&format!("queued events in scope: {pending}"));
    }
    Ok(serde_json::json!({
        "authenticated": authenticated,
        "scope": scope.key(),
        "pending_events": pending,
    }))
}
