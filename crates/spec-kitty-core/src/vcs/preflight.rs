//! Deterministic git preflight checks for agent and merge workflows.
//!
//! Before any action that assumes repository trust, the core verifies the
//! repository is present, trusted, and enumerable, classifying failures into
//! a small closed set. Each issue carries a concrete remediation command and
//! the whole payload is surfaced to the caller verbatim so agents and humans
//! can fix the environment.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use serde::Serialize;

/// Timeout for each preflight git invocation.
const PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(15);

/// Single preflight issue with optional remediation command.
#[derive(Debug, Clone, Serialize)]
pub struct PreflightIssue {
    pub code: &'static str,
    pub check: &'static str,
    pub message: String,
    pub remediation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// Result envelope for git preflight checks.
#[derive(Debug, Clone, Serialize)]
pub struct PreflightResult {
    pub repo_root: PathBuf,
    pub errors: Vec<PreflightIssue>,
    pub warnings: Vec<PreflightIssue>,
}

impl PreflightResult {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn first_error(&self) -> Option<&PreflightIssue> {
        self.errors.first()
    }

    /// Remediation commands for every error, in order.
    #[must_use]
    pub fn remediation_commands(&self) -> Vec<String> {
        self.errors
            .iter()
            .filter_map(|issue| issue.command.clone())
            .collect()
    }
}

/// Deterministic JSON payload for preflight failures.
#[must_use]
pub fn build_failure_payload(preflight: &PreflightResult, command_name: &str) -> serde_json::Value {
    let message = preflight
        .first_error()
        .map_or_else(|| "Git preflight failed.".to_string(), |e| e.message.clone());
    serde_json::json!({
        "error_code": "GIT_PREFLIGHT_FAILED",
        "error": message,
        "command": command_name,
        "repo_root": preflight.repo_root.display().to_string(),
        "preflight": {
            "repo_root": preflight.repo_root.display().to_string(),
            "passed": preflight.passed(),
            "errors": preflight.errors,
            "warnings": preflight.warnings,
        },
        "remediation": preflight.remediation_commands(),
    })
}

struct GitCommandResult {
    status: i32,
    stdout: String,
    stderr: String,
}

fn run_git(repo_root: &Path, args: &[&str]) -> GitCommandResult {
    let mut child = match Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return GitCommandResult {
                status: 127,
                stdout: String::new(),
                stderr: "git executable not found on PATH".to_string(),
            };
        }
        Err(err) => {
            return GitCommandResult {
                status: -1,
                stdout: String::new(),
                stderr: err.to_string(),
            };
        }
    };

    let deadline = std::time::Instant::now() + PREFLIGHT_TIMEOUT;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) if std::time::Instant::now() >= deadline => {
                let _ = child.kill();
                return GitCommandResult {
                    status: 124,
                    stdout: String::new(),
                    stderr: format!("git command timed out: git {}", args.join(" ")),
                };
            }
            Ok(None) => std::thread::sleep(Duration::from_millis(20)),
            Err(err) => {
                return GitCommandResult {
                    status: -1,
                    stdout: String::new(),
                    stderr: err.to_string(),
                };
            }
        }
    }

    match child.wait_with_output() {
        Ok(output) => GitCommandResult {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        },
        Err(err) => GitCommandResult {
            status: -1,
            stdout: String::new(),
            stderr: err.to_string(),
        },
    }
}

fn is_dubious_ownership(stderr: &str) -> bool {
    let text = stderr.to_ascii_lowercase();
    text.contains("dubious ownership") || text.contains("safe.directory")
}

fn shell_quote(path: &Path) -> String {
    let raw = path.display().to_string();
    if raw
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '/' | '.' | '-' | '_'))
    {
        raw
    } else {
        format!("'{}'", raw.replace('\'', r"'\''"))
    }
}

fn safe_directory_command(repo_root: &Path) -> String {
    format!(
        "git config --global --add safe.directory {}",
        shell_quote(repo_root)
    )
}

fn first_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
        .to_string()
}

/// Run the deterministic git preflight checks.
#[must_use]
pub fn run_git_preflight(repo_root: &Path, check_worktree_list: bool) -> PreflightResult {
    let root = repo_root
        .canonicalize()
        .unwrap_or_else(|_| repo_root.to_path_buf());
    let mut result = PreflightResult {
        repo_root: root.clone(),
        errors: Vec::new(),
        warnings: Vec::new(),
    };

    let repo_check = run_git(&root, &["rev-parse", "--is-inside-work-tree"]);
    if repo_check.status != 0 || repo_check.stdout.trim().to_ascii_lowercase() != "true" {
        if is_dubious_ownership(&repo_check.stderr) {
            result.errors.push(PreflightIssue {
                code: "UNTRUSTED_REPOSITORY",
                check: "repository_trust",
                message: "Git rejected repository ownership trust (safe.directory).".to_string(),
                remediation: "Mark the repository as trusted for this machine.".to_string(),
                command: Some(safe_directory_command(&root)),
            });
        } else {
            let detail = {
                let line = first_line(&repo_check.stderr);
                if line.is_empty() {
                    "Repository is not recognized by git.".to_string()
                } else {
                    line
                }
            };
            result.errors.push(PreflightIssue {
                code: "NOT_A_GIT_REPOSITORY",
                check: "repository_presence",
                message: format!("Git repository check failed: {detail}"),
                remediation: "Run command from the repository root or set SPEC_KITTY_REPO_ROOT."
                    .to_string(),
                command: Some(format!("cd {} && git status", shell_quote(&root))),
            });
        }
        return result;
    }

    if check_worktree_list {
        let worktree_check = run_git(&root, &["worktree", "list", "--porcelain"]);
        if worktree_check.status != 0 {
            if is_dubious_ownership(&worktree_check.stderr) {
                result.errors.push(PreflightIssue {
                    code: "UNTRUSTED_REPOSITORY",
                    check: "repository_trust",
                    message: "Git rejected repository ownership trust while listing worktrees."
                        .to_string(),
                    remediation: "Mark the repository as trusted for this machine.".to_string(),
                    command: Some(safe_directory_command(&root)),
                });
            } else {
                let detail = {
                    let line = first_line(&worktree_check.stderr);
                    if line.is_empty() {
                        "Unable to enumerate git worktrees.".to_string()
                    } else {
                        line
                    }
                };
                result.errors.push(PreflightIssue {
                    code: "WORKTREE_LIST_FAILED",
                    check: "worktree_listing",
                    message: format!("Git worktree discovery failed: {detail}"),
                    remediation: "Run the worktree listing command from the primary checkout root."
                        .to_string(),
                    command: Some(format!(
                        "git -C {} worktree list --porcelain",
                        shell_quote(&root)
                    )),
                });
            }
            return result;
        }
    }

    let origin_check = run_git(&root, &["remote", "get-url", "origin"]);
    if origin_check.status != 0 {
        result.warnings.push(PreflightIssue {
            code: "MISSING_ORIGIN_REMOTE",
            check: "remote_origin",
            message: "Remote 'origin' is not configured; fetch/push steps may be skipped."
                .to_string(),
            remediation: "Configure origin if remote sync is required.".to_string(),
            command: Some(format!(
                "git -C {} remote add origin <url>",
                shell_quote(&root)
            )),
        });
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .status()
            .unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    fn init_repo(dir: &Path) {
        git(dir, &["init"]);
        git(dir, &["config", "user.email", "test@example.com"]);
        git(dir, &["config", "user.name", "Test User"]);
    }

    #[test]
    fn non_repository_classified() {
        let tmp = tempfile::tempdir().unwrap();
        let result = run_git_preflight(tmp.path(), true);
        assert!(!result.passed());
        let err = result.first_error().unwrap();
        assert_eq!(err.code, "NOT_A_GIT_REPOSITORY");
        assert!(err.command.is_some());
    }

    #[test]
    fn repository_without_origin_warns() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        let result = run_git_preflight(tmp.path(), true);
        assert!(result.passed());
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].code, "MISSING_ORIGIN_REMOTE");
    }

    #[test]
    fn repository_with_origin_is_clean() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        git(
            tmp.path(),
            &["remote", "add", "origin", "https://example.com/repo.git"],
        );
        let result = run_git_preflight(tmp.path(), true);
        assert!(result.passed());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn failure_payload_carries_remediation() {
        let tmp = tempfile::tempdir().unwrap();
        let result = run_git_preflight(tmp.path(), true);
        let payload = build_failure_payload(&result, "merge");
        assert_eq!(payload["error_code"], "GIT_PREFLIGHT_FAILED");
        assert_eq!(payload["command"], "merge");
        assert!(payload["remediation"].as_array().unwrap().len() >= 1);
        assert_eq!(payload["preflight"]["passed"], false);
    }

    #[test]
    fn dubious_ownership_detection() {
        assert!(is_dubious_ownership(
            "fatal: detected dubious ownership in repository at '/repo'"
        ));
        assert!(is_dubious_ownership("add safe.directory /repo"));
        assert!(!is_dubious_ownership("fatal: not a git repository"));
    }

    #[test]
    fn shell_quote_handles_spaces() {
        assert_eq!(shell_quote(Path::new("/plain/path")), "/plain/path");
        assert_eq!(
            shell_quote(Path::new("/has space/path")),
            "'/has space/path'"
        );
    }
}
