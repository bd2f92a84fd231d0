//! Agent invocation seam.
//!
//! The scheduler talks to coding agents through [`AgentInvoker`]; the
//! production implementation spawns the configured command with the WP
//! prompt on stdin and a per-call timeout. Tests substitute their own
//! invoker. The reviewer's stdout carries a verdict line that
//! [`parse_review_outcome`] extracts.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::feature::WpId;
use crate::orchestrator::config::OrchestratorConfig;

/// Role an agent plays for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    Implementer,
    Reviewer,
}

impl AgentRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Implementer => "implementer",
            Self::Reviewer => "reviewer",
        }
    }
}

/// One unit of agent work.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub wp_id: WpId,
    pub role: AgentRole,
    pub prompt: String,
    pub workspace: PathBuf,
    pub timeout: Duration,
}

/// What an agent produced.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub stdout: String,
    pub duration_secs: f64,
}

/// Seam between the scheduler and the outside world.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, agent: &str, request: &AgentRequest) -> Result<AgentOutcome>;
}

/// Reviewer verdict parsed from agent output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewOutcome {
    Approved,
    ChangesRequested { feedback: String },
}

/// Extract the review verdict from agent stdout.
///
/// Scans for `VERDICT: approved` / `VERDICT: changes_requested` lines
/// (case-insensitive); the last occurrence wins. Feedback is taken from a
/// `FEEDBACK:` line when present, otherwise from the remainder of the
/// output. Unparsable output returns `None`; the caller treats that as a
/// review failure, never as silent approval.
#[must_use]
pub fn parse_review_outcome(stdout: &str) -> Option<ReviewOutcome> {
    let mut verdict: Option<bool> = None;
    let mut feedback_lines: Vec<&str> = Vec::new();
    for line in stdout.lines() {
        let trimmed = line.trim();
        let lower = trimmed.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("verdict:") {
            match rest.trim() {
                "approved" => verdict = Some(true),
                "changes_requested" => verdict = Some(false),
                _ => {}
            }
        } else if let Some(rest) = trimmed
            .strip_prefix("FEEDBACK:")
            .or_else(|| trimmed.strip_prefix("feedback:"))
        {
            feedback_lines.push(rest.trim());
        }
    }
    match verdict? {
        true => Some(ReviewOutcome::Approved),
        false => {
            let feedback = if feedback_lines.is_empty() {
                stdout.trim().to_string()
            } else {
                feedback_lines.join("\n")
            };
            Some(ReviewOutcome::ChangesRequested { feedback })
        }
    }
}

/// Invoker that runs the configured agent command as a subprocess.
///
/// The prompt goes to stdin; the workspace path is the working directory.
/// On timeout the call is abandoned and reported as a failure to the
/// retry/backoff layer; the subprocess is never hard-killed mid-write by
/// the scheduler's own shutdown.
pub struct CommandAgentInvoker {
    config: OrchestratorConfig,
}

impl CommandAgentInvoker {
    #[must_use]
    pub const fn new(config: OrchestratorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AgentInvoker for CommandAgentInvoker {
    async fn invoke(&self, agent: &str, request: &AgentRequest) -> Result<AgentOutcome> {
        let agent_config = self.config.agent(agent);
        if !agent_config.enabled {
            return Err(Error::WpFailed {
                wp_id: request.wp_id.to_string(),
                message: format!("Agent '{agent}' is disabled in the orchestrator config"),
            });
        }
        let command = agent_config.command.clone().unwrap_or_else(|| agent.to_string());
        if which::which(&command).is_err() {
            return Err(Error::WpFailed {
                wp_id: request.wp_id.to_string(),
                message: format!("Agent command '{command}' not found on PATH"),
            });
        }

        let started = Instant::now();
        let mut child = tokio::process::Command::new(&command)
            .args(&agent_config.args)
            .arg("--role")
            .arg(request.role.as_str())
            .current_dir(&request.workspace)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .spawn()
            .map_err(|e| Error::WpFailed {
                wp_id: request.wp_id.to_string(),
                message: format!("Failed to spawn agent '{command}': {e}"),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.prompt.as_bytes())
                .await
                .map_err(|e| Error::WpFailed {
                    wp_id: request.wp_id.to_string(),
                    message: format!("Failed to write prompt to agent '{agent}': {e}"),
                })?;
            drop(stdin);
        }

        let output = tokio::time::timeout(request.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::WpFailed {
                wp_id: request.wp_id.to_string(),
                message: format!(
                    "Agent '{agent}' timed out after {}s",
                    request.timeout.as_secs()
                ),
            })?
            .map_err(|e| Error::WpFailed {
                wp_id: request.wp_id.to_string(),
                message: format!("Agent '{agent}' failed: {e}"),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::WpFailed {
                wp_id: request.wp_id.to_string(),
                message: format!(
                    "Agent '{agent}' exited with {}: {}",
                    output.status,
                    stderr.trim()
                ),
            });
        }

        Ok(AgentOutcome {
            stdout,
            duration_secs: started.elapsed().as_secs_f64(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approved_verdict_parsed() {
        let out = "Looked at the diff.\nVERDICT: approved\n";
        assert_eq!(parse_review_outcome(out), Some(ReviewOutcome::Approved));
    }

    #[test]
    fn changes_requested_with_feedback_line() {
        let out = "VERDICT: changes_requested\nFEEDBACK: error handling is missing\n";
        assert_eq!(
            parse_review_outcome(out),
            Some(ReviewOutcome::ChangesRequested {
                feedback: "error handling is missing".to_string()
            })
        );
    }

    #[test]
    fn last_verdict_wins() {
        let out = "VERDICT: changes_requested\nre-checked after the fix\nVERDICT: approved\n";
        assert_eq!(parse_review_outcome(out), Some(ReviewOutcome::Approved));
    }

    #[test]
    fn verdict_is_case_insensitive() {
        assert_eq!(
            parse_review_outcome("verdict: APPROVED\n"),
            Some(ReviewOutcome::Approved)
        );
    }

    #[test]
    fn unparsable_output_is_none() {
        assert_eq!(parse_review_outcome("looks good to me!"), None);
        assert_eq!(parse_review_outcome(""), None);
    }

    #[test]
    fn changes_requested_without_feedback_uses_body() {
        let out = "The tests fail on empty input.\nVERDICT: changes_requested\n";
        match parse_review_outcome(out) {
            Some(ReviewOutcome::ChangesRequested { feedback }) => {
                assert!(feedback.contains("tests fail"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn disabled_agent_rejected() {
        let mut config = OrchestratorConfig::default();
        config.agents.insert(
            "off".to_string(),
            crate::orchestrator::config::AgentConfig {
                enabled: false,
                ..Default::default()
            },
        );
        let invoker = CommandAgentInvoker::new(config);
        let request = AgentRequest {
            wp_id: WpId::parse("WP01").unwrap(),
            role: AgentRole::Implementer,
            prompt: String::new(),
            workspace: std::env::temp_dir(),
            timeout: Duration::from_secs(5),
        };
        let err = invoker.invoke("off", &request).await.unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }
}
