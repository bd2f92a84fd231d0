//! Scheduler integration tests over a scripted agent invoker and an
//! in-memory VCS, covering the happy path, the dependency failure cascade,
//! review-driven rework, and agent fallback.

#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use spec_kitty_core::error::{Error, Result};
use spec_kitty_core::feature::{FeatureDir, FeatureSlug, WpId};
use spec_kitty_core::orchestrator::agents::{AgentInvoker, AgentOutcome, AgentRequest, AgentRole};
use spec_kitty_core::orchestrator::config::OrchestratorConfig;
use spec_kitty_core::orchestrator::graph::build_dependency_graph;
use spec_kitty_core::orchestrator::scheduler::{ConcurrencyManager, Scheduler, SchedulerContext};
use spec_kitty_core::orchestrator::state::{OrchestrationRun, WpStatus, BLOCKED_BY_FAILED_DEPS};
use spec_kitty_core::status::lane::Lane;
use spec_kitty_core::status::store::StatusStore;
use spec_kitty_core::telemetry::read_execution_events;
use spec_kitty_core::vcs::types::{
    ChangeInfo, ConflictInfo, VcsBackendKind, VcsCapabilities, WorkspaceBase,
    WorkspaceCreateResult, WorkspaceInfo,
};
use spec_kitty_core::vcs::Vcs;

// ── Test doubles ─────────────────────────────────────────────────────

/// VCS that fabricates workspaces as plain directories.
struct DirVcs;

#[async_trait]
impl Vcs for DirVcs {
    fn kind(&self) -> VcsBackendKind {
        VcsBackendKind::GitWorktree
    }
    fn capabilities(&self) -> VcsCapabilities {
        VcsCapabilities {
            named_workspaces: false,
            shared_object_store: false,
            branch_per_workspace: true,
            conflict_detection: true,
        }
    }
    async fn create_workspace(
        &self,
        _repo_root: &Path,
        path: &Path,
        name: &str,
        base: &WorkspaceBase,
    ) -> Result<WorkspaceCreateResult> {
        std::fs::create_dir_all(path).map_err(|e| Error::io(path, e))?;
        Ok(WorkspaceCreateResult {
            path: path.to_path_buf(),
            branch: name.to_string(),
            base: base.as_ref_str().to_string(),
            backend: VcsBackendKind::GitWorktree,
        })
    }
    async fn remove_workspace(&self, _repo_root: &Path, path: &Path) -> Result<()> {
        let _ = std::fs::remove_dir_all(path);
        Ok(())
    }
    async fn list_workspaces(&self, _repo_root: &Path) -> Result<Vec<WorkspaceInfo>> {
        Ok(Vec::new())
    }
    async fn get_workspace_info(&self, _path: &Path) -> Result<Option<WorkspaceInfo>> {
        Ok(None)
    }
    async fn get_last_commit_time(&self, _path: &Path) -> Result<Option<DateTime<Utc>>> {
        Ok(Some(Utc::now()))
    }
    async fn commit(
        &self,
        _path: &Path,
        _message: &str,
        _paths: Option<&[PathBuf]>,
    ) -> Result<Option<ChangeInfo>> {
        Ok(None)
    }
    async fn get_changes(&self, _path: &Path, _range: Option<&str>) -> Result<Vec<ChangeInfo>> {
        Ok(Vec::new())
    }
    async fn detect_conflicts(&self, _path: &Path) -> Result<Vec<ConflictInfo>> {
        Ok(Vec::new())
    }
}

type Script = BTreeMap<(String, &'static str), Vec<std::result::Result<String, String>>>;

/// Invoker that replays scripted outcomes per (WP, role).
struct ScriptedInvoker {
    script: Script,
    cursor: std::sync::Mutex<BTreeMap<(String, &'static str), usize>>,
    calls: AtomicUsize,
}

impl ScriptedInvoker {
    fn new(script: Script) -> Self {
        Self {
            script,
            cursor: std::sync::Mutex::new(BTreeMap::new()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AgentInvoker for ScriptedInvoker {
    async fn invoke(&self, _agent: &str, request: &AgentRequest) -> Result<AgentOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = (request.wp_id.to_string(), request.role.as_str());
        let mut cursor = self.cursor.lock().unwrap();
        let idx = cursor.entry(key.clone()).or_insert(0);
        let outcomes = self.script.get(&key).unwrap_or_else(|| {
            panic!("no script for {key:?}");
        });
        let outcome = outcomes.get(*idx).unwrap_or_else(|| {
            outcomes.last().expect("script must not be empty")
        });
        *idx += 1;
        match outcome {
            Ok(stdout) => Ok(AgentOutcome {
                stdout: stdout.clone(),
                duration_secs: 0.01,
            }),
            Err(message) => Err(Error::WpFailed {
                wp_id: request.wp_id.to_string(),
                message: message.clone(),
            }),
        }
    }
}

// ── Fixture ──────────────────────────────────────────────────────────

fn write_wp(feature: &FeatureDir, id: &str, deps: &[&str]) {
    let deps_yaml = if deps.is_empty() {
        "dependencies: []".to_string()
    } else {
        let list: String = deps.iter().map(|d| format!("\n  - {d}")).collect();
        format!("dependencies:{list}")
    };
    std::fs::write(
        feature.tasks_dir().join(format!("{id}-task.md")),
        format!(
            "---\nwork_package_id: {id}\ntitle: {id} task\nlane: planned\n{deps_yaml}\n---\n\n# {id}\n\nDo the work.\n"
        ),
    )
    .unwrap();
}

fn scheduler_fixture(
    tmp: &Path,
    wps: &[(&str, &[&str])],
    invoker: Arc<dyn AgentInvoker>,
    config: OrchestratorConfig,
) -> (Arc<SchedulerContext>, Scheduler, tokio::sync::watch::Sender<bool>) {
    let feature = FeatureDir::new(tmp, FeatureSlug::parse("050-sched").unwrap());
    std::fs::create_dir_all(feature.tasks_dir()).unwrap();
    for (id, deps) in wps {
        write_wp(&feature, id, deps);
    }
    let graph = build_dependency_graph(&feature).unwrap();
    let run = OrchestrationRun::new(
        feature.slug().clone(),
        graph.keys().cloned().collect::<Vec<_>>(),
    );
    let ctx = Arc::new(SchedulerContext {
        concurrency: ConcurrencyManager::new(&config),
        config,
        feature: feature.clone(),
        repo_root: tmp.to_path_buf(),
        store: StatusStore::new(feature),
        vcs: Arc::new(DirVcs),
        invoker,
        state: tokio::sync::Mutex::new(run),
    });
    let (tx, rx) = tokio::sync::watch::channel(false);
    let scheduler = Scheduler::new(Arc::clone(&ctx), graph, rx);
    (ctx, scheduler, tx)
}

fn config_with_agent() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.primary_agent = Some("scripted".to_string());
    config.reviewer_agent = Some("scripted".to_string());
    config.max_retries = 0;
    config
}

fn ok(s: &str) -> std::result::Result<String, String> {
    Ok(s.to_string())
}

fn fail(s: &str) -> std::result::Result<String, String> {
    Err(s.to_string())
}

// ── Tests ────────────────────────────────────────────────────────────

#[tokio::test]
async fn happy_path_completes_both_wps_in_dependency_order() {
    let tmp = tempfile::tempdir().unwrap();
    let mut script = Script::new();
    for wp in ["WP01", "WP02"] {
        script.insert((wp.to_string(), "implementer"), vec![ok("done")]);
        script.insert((wp.to_string(), "reviewer"), vec![ok("VERDICT: approved")]);
    }
    let (ctx, mut scheduler, _tx) = scheduler_fixture(
        tmp.path(),
        &[("WP01", &[]), ("WP02", &["WP01"])],
        Arc::new(ScriptedInvoker::new(script)),
        config_with_agent(),
    );

    let finished = scheduler.run().await.unwrap();
    assert!(finished.is_complete());
    assert_eq!(finished.wps_completed, 2);
    assert_eq!(finished.wps_failed, 0);

    // The lane substrate reflects completion.
    let snapshot = ctx.store.load_snapshot().unwrap();
    assert_eq!(snapshot.lane_of(&WpId::parse("WP01").unwrap()), Some(Lane::Done));
    assert_eq!(snapshot.lane_of(&WpId::parse("WP02").unwrap()), Some(Lane::Done));

    // Telemetry: one implementer and one reviewer record per WP.
    let events = read_execution_events(&ctx.feature).unwrap();
    assert_eq!(events.len(), 4);
    assert!(events.iter().all(|e| e.success));
}

#[tokio::test]
async fn dependency_failure_cascade() {
    // S4: WP01's implement task raises; WP02 depends on WP01.
    let tmp = tempfile::tempdir().unwrap();
    let mut script = Script::new();
    script.insert(
        ("WP01".to_string(), "implementer"),
        vec![fail("Simulated error in WP01")],
    );
    // WP02 must never be invoked; give it a script that would pass anyway.
    script.insert(("WP02".to_string(), "implementer"), vec![ok("done")]);
    script.insert(("WP02".to_string(), "reviewer"), vec![ok("VERDICT: approved")]);

    let invoker = Arc::new(ScriptedInvoker::new(script));
    let (_ctx, mut scheduler, _tx) = scheduler_fixture(
        tmp.path(),
        &[("WP01", &[]), ("WP02", &["WP01"])],
        Arc::clone(&invoker) as Arc<dyn AgentInvoker>,
        config_with_agent(),
    );

    let finished = scheduler.run().await.unwrap();
    let wp01 = &finished.work_packages[&WpId::parse("WP01").unwrap()];
    let wp02 = &finished.work_packages[&WpId::parse("WP02").unwrap()];

    assert_eq!(wp01.status, WpStatus::Failed);
    assert!(wp01.last_error.as_deref().unwrap().contains("Simulated error in WP01"));
    assert_eq!(wp02.status, WpStatus::Failed);
    assert_eq!(wp02.last_error.as_deref(), Some(BLOCKED_BY_FAILED_DEPS));

    // Only WP01's single implementation attempt ran.
    assert_eq!(invoker.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn changes_requested_loops_back_to_implementation() {
    let tmp = tempfile::tempdir().unwrap();
    let mut script = Script::new();
    script.insert(
        ("WP01".to_string(), "implementer"),
        vec![ok("first pass"), ok("second pass")],
    );
    script.insert(
        ("WP01".to_string(), "reviewer"),
        vec![
            ok("VERDICT: changes_requested\nFEEDBACK: handle the empty case"),
            ok("VERDICT: approved"),
        ],
    );
    let invoker = Arc::new(ScriptedInvoker::new(script));
    let (ctx, mut scheduler, _tx) = scheduler_fixture(
        tmp.path(),
        &[("WP01", &[])],
        Arc::clone(&invoker) as Arc<dyn AgentInvoker>,
        config_with_agent(),
    );

    let finished = scheduler.run().await.unwrap();
    let wp01 = &finished.work_packages[&WpId::parse("WP01").unwrap()];
    assert_eq!(wp01.status, WpStatus::Completed);
    assert_eq!(wp01.review_feedback.as_deref(), Some("handle the empty case"));

    // implement, review, implement, review
    assert_eq!(invoker.calls.load(Ordering::SeqCst), 4);

    // The rollback left an audit trail in the event log: a
    // for_review -> in_progress transition with a review_ref.
    let events = spec_kitty_core::status::store::read_events(&ctx.feature).unwrap();
    assert!(events.iter().any(|e| {
        e.from_lane == Lane::ForReview
            && e.to_lane == Lane::InProgress
            && e.review_ref.is_some()
    }));
}

#[tokio::test]
async fn fallback_agent_tried_after_retries_exhausted() {
    let tmp = tempfile::tempdir().unwrap();
    let mut script = Script::new();
    // Primary fails once (max_retries = 0 exhausts it), fallback succeeds.
    script.insert(
        ("WP01".to_string(), "implementer"),
        vec![fail("primary agent crashed"), ok("fallback did it")],
    );
    script.insert(("WP01".to_string(), "reviewer"), vec![ok("VERDICT: approved")]);

    let mut config = config_with_agent();
    config.fallback_agents = vec!["backup".to_string()];

    let invoker = Arc::new(ScriptedInvoker::new(script));
    let (_ctx, mut scheduler, _tx) = scheduler_fixture(
        tmp.path(),
        &[("WP01", &[])],
        Arc::clone(&invoker) as Arc<dyn AgentInvoker>,
        config,
    );

    let finished = scheduler.run().await.unwrap();
    let wp01 = &finished.work_packages[&WpId::parse("WP01").unwrap()];
    assert_eq!(wp01.status, WpStatus::Completed);
    assert_eq!(wp01.fallback_agents_tried, vec!["backup".to_string()]);
    assert_eq!(wp01.assigned_agent.as_deref(), Some("backup"));
}

#[tokio::test]
async fn retry_within_budget_before_failing() {
    let tmp = tempfile::tempdir().unwrap();
    let mut script = Script::new();
    script.insert(
        ("WP01".to_string(), "implementer"),
        vec![fail("flaky"), ok("second try worked")],
    );
    script.insert(("WP01".to_string(), "reviewer"), vec![ok("VERDICT: approved")]);

    let mut config = config_with_agent();
    config.max_retries = 2;

    let (_ctx, mut scheduler, _tx) = scheduler_fixture(
        tmp.path(),
        &[("WP01", &[])],
        Arc::new(ScriptedInvoker::new(script)),
        config,
    );

    let finished = scheduler.run().await.unwrap();
    let wp01 = &finished.work_packages[&WpId::parse("WP01").unwrap()];
    assert_eq!(wp01.status, WpStatus::Completed);
    assert_eq!(wp01.implementation_retries, 1);
}

#[tokio::test]
async fn unparsable_review_output_fails_after_budget() {
    let tmp = tempfile::tempdir().unwrap();
    let mut script = Script::new();
    script.insert(("WP01".to_string(), "implementer"), vec![ok("done")]);
    script.insert(
        ("WP01".to_string(), "reviewer"),
        vec![ok("looks good to me!")],
    );
    let (_ctx, mut scheduler, _tx) = scheduler_fixture(
        tmp.path(),
        &[("WP01", &[])],
        Arc::new(ScriptedInvoker::new(script)),
        config_with_agent(),
    );

    let finished = scheduler.run().await.unwrap();
    let wp01 = &finished.work_packages[&WpId::parse("WP01").unwrap()];
    assert_eq!(wp01.status, WpStatus::Failed);
    assert!(wp01.last_error.as_deref().unwrap().contains("verdict"));
}
