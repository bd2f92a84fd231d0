//! The cooperative dispatch loop.
//!
//! One supervisor consumes completion events from N concurrent worker tasks.
//! Dispatch takes the ready set minus the in-flight set; tasks for WPs whose
//! status is still mid-phase but have no live task (crash recovery,
//! mid-phase restarts) are respawned. Shutdown lets in-flight tasks run to
//! graceful completion and stops dispatching; agent subprocesses are never
//! hard-killed. A task that errors marks its WP FAILED and the run
//! continues, which is how dependent WPs get unblocked to fail rather than
//! hanging the run forever.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::feature::{FeatureDir, WpId};
use crate::orchestrator::config::OrchestratorConfig;
use crate::orchestrator::graph::{blocked_by_failure, ready_wps, DependencyGraph};
use crate::orchestrator::process;
use crate::orchestrator::stale::{check_wp_staleness, find_worktree_for_wp};
use crate::orchestrator::state::{
    save_state, OrchestrationRun, WpStatus, BLOCKED_BY_FAILED_DEPS,
};
use crate::orchestrator::agents::AgentInvoker;
use crate::status::store::StatusStore;
use crate::vcs::Vcs;

/// Per-agent semaphores plus the global cap.
pub struct ConcurrencyManager {
    global: Arc<Semaphore>,
    per_agent: std::sync::Mutex<BTreeMap<String, Arc<Semaphore>>>,
    config: OrchestratorConfig,
}

/// Both permits held for the duration of one agent invocation.
pub struct ConcurrencyPermit {
    _global: OwnedSemaphorePermit,
    _agent: OwnedSemaphorePermit,
}

impl ConcurrencyManager {
    #[must_use]
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            global: Arc::new(Semaphore::new(config.global_max_concurrent.max(1) as usize)),
            per_agent: std::sync::Mutex::new(BTreeMap::new()),
            config: config.clone(),
        }
    }

    fn agent_semaphore(&self, agent: &str) -> Arc<Semaphore> {
        let mut map = match self.per_agent.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(map.entry(agent.to_string()).or_insert_with(|| {
            Arc::new(Semaphore::new(
                self.config.agent(agent).max_concurrent.max(1) as usize,
            ))
        }))
    }

    /// Wait for a slot under both the agent's cap and the global cap.
    pub async fn acquire(&self, agent: &str) -> Result<ConcurrencyPermit> {
        let agent_sem = self.agent_semaphore(agent);
        let agent_permit = agent_sem
            .acquire_owned()
            .await
            .map_err(|_| Error::validation("concurrency manager closed"))?;
        let global_permit = Arc::clone(&self.global)
            .acquire_owned()
            .await
            .map_err(|_| Error::validation("concurrency manager closed"))?;
        Ok(ConcurrencyPermit {
            _global: global_permit,
            _agent: agent_permit,
        })
    }
}

/// Everything a WP task needs, shared by reference.
pub struct SchedulerContext {
    pub config: OrchestratorConfig,
    pub feature: FeatureDir,
    pub repo_root: PathBuf,
    pub store: StatusStore,
    pub vcs: Arc<dyn Vcs>,
    pub invoker: Arc<dyn AgentInvoker>,
    pub concurrency: ConcurrencyManager,
    /// Mutated only under this lock; tasks take it briefly, never across an
    /// agent invocation.
    pub state: Mutex<OrchestrationRun>,
}

impl SchedulerContext {
    /// Persist the run state; best-effort, logged on failure.
    pub fn persist(&self, run: &OrchestrationRun) {
        if let Err(err) = save_state(&self.feature, run) {
            warn!(%err, "failed to persist orchestration state");
        }
    }
}

/// One scheduler per feature per process.
pub struct Scheduler {
    ctx: Arc<SchedulerContext>,
    graph: DependencyGraph,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        ctx: Arc<SchedulerContext>,
        graph: DependencyGraph,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            ctx,
            graph,
            shutdown,
        }
    }

    /// Drive every WP to a terminal scheduler state.
    pub async fn run(&mut self) -> Result<OrchestrationRun> {
        let mut tasks: JoinSet<WpId> = JoinSet::new();
        let mut task_wps: HashMap<tokio::task::Id, WpId> = HashMap::new();
        let mut in_flight: BTreeSet<WpId> = BTreeSet::new();
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            self.cascade_failures().await;

            let shutting_down = *self.shutdown.borrow();
            if !shutting_down {
                for wp_id in self.dispatchable(&in_flight).await {
                    debug!(wp = %wp_id, "dispatching work package");
                    in_flight.insert(wp_id.clone());
                    let ctx = Arc::clone(&self.ctx);
                    let spawned = wp_id.clone();
                    let handle = tasks.spawn(async move {
                        if let Err(err) = process::process_wp(&ctx, &spawned).await {
                            error!(wp = %spawned, %err, "work package task failed");
                            let mut state = ctx.state.lock().await;
                            if let Some(wp) = state.work_packages.get_mut(&spawned) {
                                wp.fail(err.to_string());
                            }
                            state.refresh_counters();
                            ctx.persist(&state);
                        }
                        spawned
                    });
                    task_wps.insert(handle.id(), wp_id);
                }
            }

            {
                let mut state = self.ctx.state.lock().await;
                if state.is_complete() {
                    state.refresh_counters();
                    self.ctx.persist(&state);
                    info!(
                        completed = state.wps_completed,
                        failed = state.wps_failed,
                        "orchestration run finished"
                    );
                    return Ok(state.clone());
                }
                if in_flight.is_empty() {
                    if shutting_down {
                        self.ctx.persist(&state);
                        info!("orchestration interrupted; state saved for resume");
                        return Ok(state.clone());
                    }
                    if ready_wps(&self.graph, &state).is_empty() {
                        // Nothing running, nothing ready, and non-terminal WPs
                        // remain: the run cannot make progress.
                        let stuck: Vec<WpId> = state
                            .work_packages
                            .iter()
                            .filter(|(_, ex)| !ex.status.is_terminal())
                            .map(|(id, _)| id.clone())
                            .collect();
                        if !stuck.is_empty() {
                            for wp_id in stuck {
                                warn!(wp = %wp_id, "no progress possible; failing work package");
                                if let Some(wp) = state.work_packages.get_mut(&wp_id) {
                                    wp.fail("No progress possible: dependencies never completed");
                                }
                            }
                            state.refresh_counters();
                            self.ctx.persist(&state);
                            continue;
                        }
                    }
                }
            }

            tokio::select! {
                joined = tasks.join_next_with_id(), if !tasks.is_empty() => {
                    match joined {
                        Some(Ok((id, wp_id))) => {
                            task_wps.remove(&id);
                            in_flight.remove(&wp_id);
                        }
                        Some(Err(join_err)) => {
                            // A panicked task must not leave its WP stuck
                            // mid-phase; dependents need it terminal.
                            let wp_id = task_wps.remove(&join_err.id());
                            if let Some(wp_id) = wp_id {
                                in_flight.remove(&wp_id);
                                error!(wp = %wp_id, %join_err, "work package task panicked");
                                let mut state = self.ctx.state.lock().await;
                                if let Some(wp) = state.work_packages.get_mut(&wp_id) {
                                    wp.fail(format!("Task exception: {join_err}"));
                                }
                                state.refresh_counters();
                                self.ctx.persist(&state);
                            }
                        }
                        None => {}
                    }
                }
                _ = tick.tick() => {
                    self.observe_staleness().await;
                    let state = self.ctx.state.lock().await;
                    self.ctx.persist(&state);
                }
                _ = self.shutdown.changed() => {
                    info!("shutdown requested; letting in-flight tasks finish");
                }
            }
        }
    }

    /// Ready WPs plus mid-phase WPs with no live task (respawn after crash
    /// recovery or an orchestration restart).
    async fn dispatchable(&self, in_flight: &BTreeSet<WpId>) -> Vec<WpId> {
        let state = self.ctx.state.lock().await;
        let mut out: Vec<WpId> = ready_wps(&self.graph, &state)
            .into_iter()
            .filter(|wp| !in_flight.contains(wp))
            .collect();
        for (wp_id, ex) in &state.work_packages {
            if ex.status.is_in_phase() && !in_flight.contains(wp_id) && !out.contains(wp_id) {
                out.push(wp_id.clone());
            }
        }
        out
    }

    async fn cascade_failures(&self) {
        let mut state = self.ctx.state.lock().await;
        let blocked = blocked_by_failure(&self.graph, &state);
        if blocked.is_empty() {
            return;
        }
        for wp_id in blocked {
            warn!(wp = %wp_id, "failing work package blocked by failed dependency");
            if let Some(wp) = state.work_packages.get_mut(&wp_id) {
                wp.fail(BLOCKED_BY_FAILED_DEPS);
            }
        }
        state.refresh_counters();
        self.ctx.persist(&state);
    }

    /// Flag `in_progress` WPs with no recent workspace commits.
    ///
    /// Observation only: the lane never moves.
    async fn observe_staleness(&self) {
        let candidates: Vec<WpId> = {
            let state = self.ctx.state.lock().await;
            state
                .work_packages
                .iter()
                .filter(|(_, ex)| ex.status == WpStatus::Implementation)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for wp_id in candidates {
            let Some(worktree) = find_worktree_for_wp(
                &self.ctx.repo_root,
                self.ctx.feature.slug(),
                &wp_id,
            ) else {
                continue;
            };
            let check = check_wp_staleness(
                self.ctx.vcs.as_ref(),
                &wp_id,
                &worktree,
                self.ctx.config.stale_threshold_minutes,
            )
            .await;
            let mut state = self.ctx.state.lock().await;
            if let Some(wp) = state.work_packages.get_mut(&wp_id) {
                if check.is_stale && !wp.stale {
                    warn!(
                        wp = %wp_id,
                        minutes = ?check.minutes_since_commit,
                        "work package looks stale"
                    );
                }
                wp.stale = check.is_stale;
            }
        }
    }
}
