//! Orchestrator configuration.
//!
//! Loaded from TOML with serde defaults; the core honors whatever retry and
//! fallback policy the config exposes.
//!
//! ```toml
//! global_timeout = 300
//! max_retries = 3
//! global_max_concurrent = 4
//! stale_threshold_minutes = 10
//! target_branch = "main"
//! primary_agent = "claude"
//! reviewer_agent = "claude"
//! fallback_agents = ["codex"]
//!
//! [agents.claude]
//! enabled = true
//! max_concurrent = 2
//! command = "claude-agent"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Per-agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_agent_concurrency")]
    pub max_concurrent: u32,
    /// Executable to invoke; defaults to the agent name.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent: default_agent_concurrency(),
            command: None,
            args: Vec::new(),
            model: None,
        }
    }
}

/// Scheduler-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Per-invocation timeout in seconds for agent calls.
    #[serde(default = "default_timeout")]
    pub global_timeout: u64,
    /// Retries per phase before the fallback list is consulted.
    #[serde(default = "default_retries")]
    pub max_retries: u32,
    /// Cap on concurrently running WP tasks across all agents.
    #[serde(default = "default_global_concurrency")]
    pub global_max_concurrent: u32,
    /// Minutes without a workspace commit before a WP is flagged stale.
    #[serde(default = "default_stale_minutes")]
    pub stale_threshold_minutes: i64,
    #[serde(default = "default_target_branch")]
    pub target_branch: String,
    #[serde(default)]
    pub primary_agent: Option<String>,
    #[serde(default)]
    pub reviewer_agent: Option<String>,
    /// Agents tried, in order, after the primary exhausts its retries.
    #[serde(default)]
    pub fallback_agents: Vec<String>,
    #[serde(default)]
    pub agents: BTreeMap<String, AgentConfig>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            global_timeout: default_timeout(),
            max_retries: default_retries(),
            global_max_concurrent: default_global_concurrency(),
            stale_threshold_minutes: default_stale_minutes(),
            target_branch: default_target_branch(),
            primary_agent: None,
            reviewer_agent: None,
            fallback_agents: Vec::new(),
            agents: BTreeMap::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Load from a TOML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(err) => return Err(Error::io(path, err)),
        };
        toml::from_str(&raw)
            .map_err(|e| Error::InvalidConfig(format!("{}: {e}", path.display())))
    }

    /// Settings for one agent, defaulting when unconfigured.
    #[must_use]
    pub fn agent(&self, name: &str) -> AgentConfig {
        self.agents.get(name).cloned().unwrap_or_default()
    }

    /// The agent that implements WPs: explicit primary, else the first
    /// enabled configured agent.
    #[must_use]
    pub fn implementer(&self) -> Option<String> {
        if let Some(primary) = &self.primary_agent {
            return Some(primary.clone());
        }
        self.agents
            .iter()
            .find(|(_, cfg)| cfg.enabled)
            .map(|(name, _)| name.clone())
    }

    /// The agent that reviews WPs; falls back to the implementer.
    #[must_use]
    pub fn reviewer(&self) -> Option<String> {
        self.reviewer_agent.clone().or_else(|| self.implementer())
    }
}

const fn default_true() -> bool {
    true
}

const fn default_agent_concurrency() -> u32 {
    2
}

const fn default_timeout() -> u64 {
    300
}

const fn default_retries() -> u32 {
    3
}

const fn default_global_concurrency() -> u32 {
    4
}

const fn default_stale_minutes() -> i64 {
    10
}

fn default_target_branch() -> String {
    "main".to_string()
}
