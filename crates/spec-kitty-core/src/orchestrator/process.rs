//! Per-WP task body: implement and review phases.
//!
//! Drives one WP from its current scheduler status to COMPLETED or an
//! error. Lane moves go through the transition validator and the event
//! store; agent invocations run under the concurrency caps with per-call
//! timeouts; every invocation leaves a telemetry record. Failed phases
//! increment their retry counter, then walk the fallback agent list, and
//! only error out when both are exhausted.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::feature::WpId;
use crate::frontmatter;
use crate::merge::multi_parent::{cleanup_merge_base_branch, create_multi_parent_base};
use crate::orchestrator::agents::{
    parse_review_outcome, AgentOutcome, AgentRequest, AgentRole, ReviewOutcome,
};
use crate::orchestrator::scheduler::SchedulerContext;
use crate::orchestrator::state::{WpStatus, WpExecution};
use crate::status::event::{DoneEvidence, ReviewApproval};
use crate::status::lane::Lane;
use crate::status::store::TransitionRequest;
use crate::telemetry::{emit_execution_event, ExecutionRecord};
use crate::vcs::types::WorkspaceBase;

/// Drive one WP until it reaches a terminal scheduler state.
///
/// Phase-dispatches on the WP's current status so a restarted orchestration
/// resumes exactly where the previous process stopped.
pub async fn process_wp(ctx: &SchedulerContext, wp_id: &WpId) -> Result<()> {
    loop {
        let status = {
            let state = ctx.state.lock().await;
            state.work_packages.get(wp_id).map(|wp| wp.status)
        };
        match status {
            Some(WpStatus::Pending | WpStatus::Ready) => {
                let mut state = ctx.state.lock().await;
                if let Some(wp) = state.work_packages.get_mut(wp_id) {
                    wp.status = WpStatus::Implementation;
                    wp.implementation_started = Some(chrono::Utc::now());
                }
                ctx.persist(&state);
            }
            Some(WpStatus::Implementation) => implement_phase(ctx, wp_id).await?,
            Some(WpStatus::Review) => review_phase(ctx, wp_id).await?,
            Some(WpStatus::Completed | WpStatus::Failed) | None => return Ok(()),
        }
    }
}

fn agent_timeout(ctx: &SchedulerContext) -> Duration {
    Duration::from_secs(ctx.config.global_timeout)
}

/// Pick the agent for the implementation phase, honoring fallbacks already
/// recorded on the execution.
fn current_implementer(ctx: &SchedulerContext, wp: &WpExecution) -> Result<String> {
    if let Some(agent) = &wp.assigned_agent {
        return Ok(agent.clone());
    }
    ctx.config.implementer().ok_or_else(|| Error::WpFailed {
        wp_id: wp.wp_id.to_string(),
        message: "No enabled agent configured for implementation".to_string(),
    })
}

/// Advance the retry/fallback bookkeeping after a failed invocation.
///
/// Returns `Ok(())` when another attempt (same agent, or the next fallback)
/// is allowed, or the terminal error when the budget is exhausted.
fn register_failure(
    ctx: &SchedulerContext,
    wp: &mut WpExecution,
    role: AgentRole,
    err: &Error,
) -> Result<()> {
    let retries = match role {
        AgentRole::Implementer => {
            wp.implementation_retries += 1;
            wp.implementation_retries
        }
        AgentRole::Reviewer => {
            wp.review_retries += 1;
            wp.review_retries
        }
    };
    wp.last_error = Some(err.to_string());
    if retries <= ctx.config.max_retries {
        debug!(wp = %wp.wp_id, retries, "phase failed; retrying");
        return Ok(());
    }

    if role == AgentRole::Implementer {
        // Retry budget exhausted: walk the fallback list.
        let next_fallback = ctx
            .config
            .fallback_agents
            .iter()
            .find(|candidate| {
                !wp.fallback_agents_tried.contains(*candidate)
                    && wp.assigned_agent.as_deref() != Some(candidate.as_str())
            })
            .cloned();
        if let Some(fallback) = next_fallback {
            info!(wp = %wp.wp_id, agent = %fallback, "switching to fallback agent");
            wp.fallback_agents_tried.push(fallback.clone());
            wp.assigned_agent = Some(fallback);
            wp.implementation_retries = 0;
            return Ok(());
        }
    }

    Err(Error::WpFailed {
        wp_id: wp.wp_id.to_string(),
        message: format!("{role} retries and fallbacks exhausted: {err}", role = role.as_str()),
    })
}

/// Build the prompt for a phase from the WP file plus review feedback.
fn build_prompt(ctx: &SchedulerContext, wp_id: &WpId, feedback: Option<&str>) -> Result<String> {
    let path = ctx
        .feature
        .wp_file(wp_id)?
        .ok_or_else(|| Error::validation(format!("No WP file found for {wp_id}")))?;
    let content = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
    let body = frontmatter::split_frontmatter(&content)
        .map_or(content.as_str(), |(_, body)| body)
        .to_string();
    match feedback {
        Some(feedback) if !feedback.trim().is_empty() => Ok(format!(
            "{body}\n\n## Review feedback to address\n\n{feedback}\n"
        )),
        _ => Ok(body),
    }
}

async fn invoke_with_telemetry(
    ctx: &SchedulerContext,
    agent: &str,
    request: &AgentRequest,
    run_id: &str,
) -> Result<AgentOutcome> {
    let permit = ctx.concurrency.acquire(agent).await?;
    let result = ctx.invoker.invoke(agent, request).await;
    drop(permit);

    let (success, duration, error) = match &result {
        Ok(outcome) => (true, outcome.duration_secs, None),
        Err(err) => (false, 0.0, Some(err.to_string())),
    };
    emit_execution_event(
        &ctx.feature,
        &ExecutionRecord {
            run_id: run_id.to_string(),
            wp_id: request.wp_id.to_string(),
            agent: agent.to_string(),
            role: request.role.as_str().to_string(),
            model: ctx.config.agent(agent).model,
            input_tokens: None,
            output_tokens: None,
            cost_usd: None,
            duration_secs: duration,
            success,
            error,
        },
    );
    result
}

/// Ensure the WP has an isolated workspace, creating one when absent.
///
/// A WP with no dependencies branches from the target; a single dependency
/// means its branch is the base; multiple dependencies get a deterministic
/// multi-parent merge base (diamond shapes), computed on a disposable
/// branch that is removed once the workspace exists.
async fn ensure_workspace(ctx: &SchedulerContext, wp_id: &WpId) -> Result<std::path::PathBuf> {
    let branch = ctx.feature.wp_branch(wp_id);
    let path = ctx.repo_root.join(".worktrees").join(&branch);
    if path.exists() {
        return Ok(path);
    }

    let dependencies = match ctx.feature.wp_file(wp_id)? {
        Some(wp_path) => frontmatter::read_dependencies(&wp_path)?,
        None => Vec::new(),
    };
    let created = match dependencies.as_slice() {
        [] => {
            ctx.vcs
                .create_workspace(
                    &ctx.repo_root,
                    &path,
                    &branch,
                    &WorkspaceBase::Branch(ctx.config.target_branch.clone()),
                )
                .await?
        }
        [only] => {
            ctx.vcs
                .create_workspace(
                    &ctx.repo_root,
                    &path,
                    &branch,
                    &WorkspaceBase::Branch(ctx.feature.wp_branch(only)),
                )
                .await?
        }
        many => {
            let base = create_multi_parent_base(
                ctx.feature.slug(),
                wp_id,
                many,
                &ctx.repo_root,
            )
            .await;
            if !base.success {
                return Err(Error::vcs(format!(
                    "Cannot build merge base for {wp_id}: {}",
                    base.error.unwrap_or_else(|| "unknown failure".to_string())
                )));
            }
            let result = ctx
                .vcs
                .create_workspace(
                    &ctx.repo_root,
                    &path,
                    &branch,
                    &WorkspaceBase::Branch(base.branch_name.clone()),
                )
                .await;
            // The disposable base branch goes away on success and failure.
            let _ = cleanup_merge_base_branch(ctx.feature.slug(), wp_id, &ctx.repo_root).await;
            result?
        }
    };
    Ok(created.path)
}

async fn implement_phase(ctx: &SchedulerContext, wp_id: &WpId) -> Result<()> {
    let (agent, feedback, run_id) = {
        let state = ctx.state.lock().await;
        let wp = state
            .work_packages
            .get(wp_id)
            .ok_or_else(|| Error::validation(format!("Unknown WP {wp_id}")))?;
        (
            current_implementer(ctx, wp)?,
            wp.review_feedback.clone(),
            state.run_id.clone(),
        )
    };

    let workspace = ensure_workspace(ctx, wp_id).await?;
    {
        let mut state = ctx.state.lock().await;
        if let Some(wp) = state.work_packages.get_mut(wp_id) {
            wp.assigned_agent = Some(agent.clone());
            wp.workspace_path = Some(workspace.clone());
        }
        ctx.persist(&state);
    }

    // Walk the lane to in_progress; a rollback re-entry is already there.
    let lane = ctx.store.current_lane(wp_id)?.unwrap_or(Lane::Planned);
    if lane == Lane::Planned {
        ctx.store.record_transition(
            wp_id,
            Lane::Claimed,
            &TransitionRequest {
                actor: agent.clone(),
                ..Default::default()
            },
        )?;
    }
    let lane = ctx.store.current_lane(wp_id)?.unwrap_or(Lane::Planned);
    if lane == Lane::Claimed {
        ctx.store.record_transition(
            wp_id,
            Lane::InProgress,
            &TransitionRequest {
                actor: agent.clone(),
                workspace_context: Some(format!("worktree:{}", workspace.display())),
                ..Default::default()
            },
        )?;
    }

    let request = AgentRequest {
        wp_id: wp_id.clone(),
        role: AgentRole::Implementer,
        prompt: build_prompt(ctx, wp_id, feedback.as_deref())?,
        workspace,
        timeout: agent_timeout(ctx),
    };

    match invoke_with_telemetry(ctx, &agent, &request, &run_id).await {
        Ok(_) => {
            ctx.store.record_transition(
                wp_id,
                Lane::ForReview,
                &TransitionRequest {
                    actor: agent,
                    subtasks_complete: true,
                    implementation_evidence_present: true,
                    ..Default::default()
                },
            )?;
            let mut state = ctx.state.lock().await;
            if let Some(wp) = state.work_packages.get_mut(wp_id) {
                wp.status = WpStatus::Review;
                wp.implementation_completed = Some(chrono::Utc::now());
                wp.review_started = Some(chrono::Utc::now());
                wp.last_error = None;
            }
            ctx.persist(&state);
            Ok(())
        }
        Err(err) => {
            warn!(wp = %wp_id, %err, "implementation attempt failed");
            let mut state = ctx.state.lock().await;
            let wp = state
                .work_packages
                .get_mut(wp_id)
                .ok_or_else(|| Error::validation(format!("Unknown WP {wp_id}")))?;
            let verdict = register_failure(ctx, wp, AgentRole::Implementer, &err);
            ctx.persist(&state);
            verdict
        }
    }
}

async fn review_phase(ctx: &SchedulerContext, wp_id: &WpId) -> Result<()> {
    let (reviewer, run_id, workspace) = {
        let state = ctx.state.lock().await;
        let wp = state
            .work_packages
            .get(wp_id)
            .ok_or_else(|| Error::validation(format!("Unknown WP {wp_id}")))?;
        let reviewer = ctx.config.reviewer().ok_or_else(|| Error::WpFailed {
            wp_id: wp_id.to_string(),
            message: "No enabled agent configured for review".to_string(),
        })?;
        let workspace = wp
            .workspace_path
            .clone()
            .unwrap_or_else(|| ctx.repo_root.join(".worktrees").join(ctx.feature.wp_branch(wp_id)));
        (reviewer, state.run_id.clone(), workspace)
    };

    let request = AgentRequest {
        wp_id: wp_id.clone(),
        role: AgentRole::Reviewer,
        prompt: build_prompt(ctx, wp_id, None)?,
        workspace,
        timeout: agent_timeout(ctx),
    };

    let outcome = match invoke_with_telemetry(ctx, &reviewer, &request, &run_id).await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(wp = %wp_id, %err, "review attempt failed");
            let mut state = ctx.state.lock().await;
            let wp = state
                .work_packages
                .get_mut(wp_id)
                .ok_or_else(|| Error::validation(format!("Unknown WP {wp_id}")))?;
            let verdict = register_failure(ctx, wp, AgentRole::Reviewer, &err);
            ctx.persist(&state);
            return verdict;
        }
    };

    match parse_review_outcome(&outcome.stdout) {
        Some(ReviewOutcome::Approved) => {
            let reference = format!("review:{run_id}:{wp_id}");
            ctx.store.record_transition(
                wp_id,
                Lane::Done,
                &TransitionRequest {
                    actor: reviewer.clone(),
                    evidence: Some(DoneEvidence {
                        review: ReviewApproval {
                            reviewer,
                            verdict: "approved".to_string(),
                            reference,
                        },
                    }),
                    ..Default::default()
                },
            )?;
            let mut state = ctx.state.lock().await;
            if let Some(wp) = state.work_packages.get_mut(wp_id) {
                wp.status = WpStatus::Completed;
                wp.review_completed = Some(chrono::Utc::now());
                wp.last_error = None;
            }
            state.refresh_counters();
            ctx.persist(&state);
            info!(wp = %wp_id, "work package completed");
            Ok(())
        }
        Some(ReviewOutcome::ChangesRequested { feedback }) => {
            let review_ref = format!("review:{run_id}:{wp_id}:{}", ulid::Ulid::new());
            ctx.store.record_transition(
                wp_id,
                Lane::InProgress,
                &TransitionRequest {
                    actor: reviewer,
                    review_ref: Some(review_ref),
                    ..Default::default()
                },
            )?;
            let mut state = ctx.state.lock().await;
            if let Some(wp) = state.work_packages.get_mut(wp_id) {
                wp.status = WpStatus::Implementation;
                wp.review_feedback = Some(feedback);
            }
            ctx.persist(&state);
            info!(wp = %wp_id, "review requested changes; returning to implementation");
            Ok(())
        }
        None => {
            let err = Error::WpFailed {
                wp_id: wp_id.to_string(),
                message: "Reviewer output carried no parsable verdict".to_string(),
            };
            warn!(wp = %wp_id, "unparsable review output counts as a review failure");
            let mut state = ctx.state.lock().await;
            let wp = state
                .work_packages
                .get_mut(wp_id)
                .ok_or_else(|| Error::validation(format!("Unknown WP {wp_id}")))?;
            let verdict = register_failure(ctx, wp, AgentRole::Reviewer, &err);
            ctx.persist(&state);
            verdict
        }
    }
}
