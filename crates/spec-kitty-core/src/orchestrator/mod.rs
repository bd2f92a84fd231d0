//! Concurrent work-package scheduler.
//!
//! Advances every WP in a feature through
//! `PENDING -> READY -> IMPLEMENTATION -> REVIEW -> COMPLETED | FAILED`,
//! using the lane state machine as the authoritative substrate. One
//! scheduler runs per feature per process: a single cooperative loop
//! dispatches concurrent agent tasks, bounded by per-agent and global
//! concurrency caps, with retry, fallback, staleness observation, and
//! graceful shutdown (in-flight tasks finish; nothing new dispatches).

pub mod agents;
pub mod config;
pub mod graph;
pub mod process;
pub mod scheduler;
pub mod stale;
pub mod state;

pub use agents::{
    parse_review_outcome, AgentInvoker, AgentOutcome, AgentRequest, AgentRole,
    CommandAgentInvoker, ReviewOutcome,
};
pub use config::{AgentConfig, OrchestratorConfig};
pub use graph::{build_dependency_graph, finalize_graph, ready_wps, topo_order, DependencyGraph};
pub use process::process_wp;
pub use scheduler::{ConcurrencyManager, Scheduler, SchedulerContext};
pub use stale::{check_wp_staleness, find_worktree_for_wp, StaleCheckResult};
pub use state::{
    clear_state, load_state, save_state, OrchestrationRun, WpExecution, WpStatus,
    BLOCKED_BY_FAILED_DEPS,
};
