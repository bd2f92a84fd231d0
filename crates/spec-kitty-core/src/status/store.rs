//! Append-only per-feature event log with materialized snapshots.
//!
//! Writes are serialized through an exclusive advisory lock on a sibling
//! lock file. Each write appends exactly one JSONL line, rewrites the
//! affected WP file's frontmatter lane (dual-write), and atomically
//! regenerates the snapshot (write-to-temp + rename).
//!
//! Readers never crash on a damaged log: corrupt lines are skipped with a
//! single warning per read, a missing snapshot is rebuilt from events, and
//! missing events plus missing snapshot yield the empty state.

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::warn;

use crate::error::{Error, Result};
use crate::feature::{FeatureDir, StatusPhase, WpId};
use crate::frontmatter;
use crate::status::event::{DoneEvidence, StatusEvent};
use crate::status::lane::Lane;
use crate::status::reducer::{reduce, Snapshot};
use crate::status::transitions::{validate_transition, TransitionContext};

/// Severity of a derived-view validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    Warning,
    Error,
}

/// A single drift finding from view validation.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    pub wp_id: WpId,
    pub message: String,
}

/// Inputs for recording a lane transition against the store.
#[derive(Debug, Clone, Default)]
pub struct TransitionRequest {
    pub actor: String,
    pub reason: Option<String>,
    pub review_ref: Option<String>,
    pub evidence: Option<DoneEvidence>,
    pub workspace_context: Option<String>,
    pub subtasks_complete: bool,
    pub implementation_evidence_present: bool,
    pub force: bool,
    pub execution_mode: Option<String>,
    pub causation_id: Option<String>,
    pub correlation_id: Option<String>,
}

/// Handle over one feature's event log and snapshot.
#[derive(Debug, Clone)]
pub struct StatusStore {
    feature: FeatureDir,
}

impl StatusStore {
    #[must_use]
    pub const fn new(feature: FeatureDir) -> Self {
        Self { feature }
    }

    #[must_use]
    pub const fn feature(&self) -> &FeatureDir {
        &self.feature
    }

    /// Read all events, skipping corrupt lines.
    pub fn read_events(&self) -> Result<Vec<StatusEvent>> {
        read_events(&self.feature)
    }

    /// Load the snapshot, rebuilding from events when missing.
    pub fn load_snapshot(&self) -> Result<Snapshot> {
        let path = self.feature.snapshot_path();
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(snapshot) => Ok(snapshot),
                Err(err) => {
                    warn!(path = %path.display(), %err, "corrupt snapshot; rebuilding from events");
                    self.materialize()
                }
            },
            Err(_) => self.materialize(),
        }
    }

    /// Re-run the reduce over the log and write `status.json` atomically.
    pub fn materialize(&self) -> Result<Snapshot> {
        materialize(&self.feature)
    }

    /// Current canonical lane of a WP (snapshot view).
    pub fn current_lane(&self, wp_id: &WpId) -> Result<Option<Lane>> {
        Ok(self.load_snapshot()?.lane_of(wp_id))
    }

    /// Validate and record a transition for one WP.
    ///
    /// Resolves the `from` lane from the canonical snapshot (falling back to
    /// the WP frontmatter, then `planned`, for a WP with no history), runs
    /// the transition validator, appends the event, dual-writes the
    /// frontmatter lane, and rematerializes the snapshot.
    pub fn record_transition(
        &self,
        wp_id: &WpId,
        to_lane: Lane,
        request: &TransitionRequest,
    ) -> Result<StatusEvent> {
        let from_lane = match self.current_lane(wp_id)? {
            Some(lane) => lane,
            None => self
                .feature
                .wp_file(wp_id)?
                .and_then(|path| frontmatter::read_lane(&path).ok().flatten())
                .unwrap_or(Lane::Planned),
        };

        let ctx = TransitionContext {
            actor: Some(request.actor.as_str()),
            reason: request.reason.as_deref(),
            review_ref: request.review_ref.as_deref(),
            evidence: request.evidence.as_ref(),
            workspace_context: request.workspace_context.as_deref(),
            subtasks_complete: request.subtasks_complete,
            implementation_evidence_present: request.implementation_evidence_present,
            force: request.force,
        };
        validate_transition(from_lane, to_lane, &ctx)
            .map_err(|msg| Error::validation_field(msg, "lane"))?;

        let event = StatusEvent {
            event_id: StatusEvent::new_event_id(),
            feature_slug: self.feature.slug().clone(),
            wp_id: wp_id.clone(),
            from_lane,
            to_lane,
            at: chrono::Utc::now(),
            actor: request.actor.clone(),
            force: request.force,
            execution_mode: request.execution_mode.clone(),
            reason: request.reason.clone(),
            review_ref: request.review_ref.clone(),
            evidence: request.evidence.clone(),
            causation_id: request.causation_id.clone(),
            correlation_id: request.correlation_id.clone(),
        };
        append_event(&self.feature, &event)?;
        Ok(event)
    }

    /// Re-reduce the log and compare against the snapshot on disk.
    ///
    /// Returns a description of the drift, or `None` when they agree.
    pub fn validate_materialization_drift(&self) -> Result<Option<String>> {
        let expected = reduce(&self.read_events()?);
        let path = self.feature.snapshot_path();
        let on_disk: Snapshot = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => Snapshot::default(),
        };
        if expected == on_disk {
            Ok(None)
        } else {
            Ok(Some(format!(
                "snapshot drift: disk has {} events, reduce yields {}",
                on_disk.event_count, expected.event_count
            )))
        }
    }

    /// Compare each WP file's frontmatter lane against the canonical view.
    ///
    /// Phase 1 reports drift as warnings; Phase 2 as errors.
    pub fn validate_derived_views(&self, phase: StatusPhase) -> Result<Vec<ValidationIssue>> {
        let severity = match phase {
            StatusPhase::DualWrite => IssueSeverity::Warning,
            StatusPhase::SnapshotAuthoritative => IssueSeverity::Error,
        };
        let snapshot = self.load_snapshot()?;
        let mut issues = Vec::new();
        for path in self.feature.wp_files()? {
            let fm = match frontmatter::parse_wp_file(&path) {
                Ok(fm) => fm,
                Err(err) => {
                    warn!(path = %path.display(), %err, "skipping unparsable WP file");
                    continue;
                }
            };
            let Some(raw_id) = fm.work_package_id else {
                continue;
            };
            let Ok(wp_id) = WpId::parse(&raw_id) else {
                continue;
            };
            let Some(canonical) = snapshot.lane_of(&wp_id) else {
                continue;
            };
            let view_lane = fm.lane.as_deref().map(Lane::parse).transpose()?;
            if view_lane != Some(canonical) {
                issues.push(ValidationIssue {
                    severity,
                    wp_id: wp_id.clone(),
                    message: format!(
                        "{} frontmatter lane {} drifted from canonical {}",
                        wp_id,
                        view_lane.map_or_else(|| "<missing>".to_string(), |l| l.to_string()),
                        canonical
                    ),
                });
            }
        }
        Ok(issues)
    }
}

fn lock_path(feature: &FeatureDir) -> PathBuf {
    feature.path().join("events.jsonl.lock")
}

fn acquire_lock(feature: &FeatureDir) -> Result<File> {
    let path = lock_path(feature);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .map_err(|e| Error::io(&path, e))?;
    file.lock_exclusive().map_err(|e| Error::io(&path, e))?;
    Ok(file)
}

/// Read all events from a feature's log, skipping corrupt lines.
pub fn read_events(feature: &FeatureDir) -> Result<Vec<StatusEvent>> {
    let path = feature.events_path();
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(Error::io(&path, err)),
    };
    let mut events = Vec::new();
    let mut corrupt = 0usize;
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<StatusEvent>(line) {
            Ok(event) => events.push(event),
            Err(_) => corrupt += 1,
        }
    }
    if corrupt > 0 {
        warn!(
            path = %path.display(),
            corrupt,
            "skipped corrupt event lines"
        );
    }
    Ok(events)
}

/// Append one event and regenerate derived views.
///
/// Duplicate `event_id`s are idempotent: the append becomes a no-op and the
/// existing state stands. The WP frontmatter lane is rewritten so that
/// pre-cutover consumers see a consistent view, then the snapshot is
/// atomically replaced.
pub fn append_event(feature: &FeatureDir, event: &StatusEvent) -> Result<()> {
    let _lock = acquire_lock(feature)?;

    let existing = read_events(feature)?;
    if existing.iter().any(|e| e.event_id == event.event_id) {
        return Ok(());
    }

    let path = feature.events_path();
    let line = serde_json::to_string(event)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| Error::io(&path, e))?;
    writeln!(file, "{line}").map_err(|e| Error::io(&path, e))?;
    file.sync_all().map_err(|e| Error::io(&path, e))?;

    // Dual-write: keep the WP file's frontmatter lane in step.
    if let Some(wp_path) = feature.wp_file(&event.wp_id)? {
        frontmatter::write_lane(&wp_path, event.to_lane)?;
    }

    materialize_locked(feature)?;
    Ok(())
}

/// Re-reduce the log and atomically write `status.json`.
pub fn materialize(feature: &FeatureDir) -> Result<Snapshot> {
    let _lock = acquire_lock(feature)?;
    materialize_locked(feature)
}

fn materialize_locked(feature: &FeatureDir) -> Result<Snapshot> {
    let snapshot = reduce(&read_events(feature)?);
    write_snapshot_atomic(feature, &snapshot)?;
    Ok(snapshot)
}

fn write_snapshot_atomic(feature: &FeatureDir, snapshot: &Snapshot) -> Result<()> {
    let path = feature.snapshot_path();
    let tmp = path.with_extension("json.tmp");
    let raw = serde_json::to_string_pretty(snapshot)?;
    write_file(&tmp, &raw)?;
    std::fs::rename(&tmp, &path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        Error::io(&path, e)
    })?;
    Ok(())
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    std::fs::write(path, contents).map_err(|e| Error::io(path, e))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::feature::FeatureSlug;

    fn setup_feature(tmp: &Path) -> FeatureDir {
        let feature = FeatureDir::new(tmp, FeatureSlug::parse("099-test").unwrap());
        std::fs::create_dir_all(feature.tasks_dir()).unwrap();
        std::fs::write(
            feature.tasks_dir().join("WP01-test.md"),
            "---\nwork_package_id: WP01\ntitle: Test WP\nlane: planned\ndependencies: []\n---\n\n# WP01 Content\n",
        )
        .unwrap();
        feature
    }

    fn event(feature: &FeatureDir, id: &str, minute: u32, from: Lane, to: Lane) -> StatusEvent {
        StatusEvent {
            event_id: id.to_string(),
            feature_slug: feature.slug().clone(),
            wp_id: WpId::parse("WP01").unwrap(),
            from_lane: from,
            to_lane: to,
            at: Utc.with_ymd_and_hms(2026, 1, 15, 10, minute, 0).single().unwrap(),
            actor: "agent".to_string(),
            force: false,
            execution_mode: None,
            reason: None,
            review_ref: None,
            evidence: None,
            causation_id: None,
            correlation_id: None,
        }
    }

    #[test]
    fn append_writes_log_snapshot_and_frontmatter() {
        let tmp = tempfile::tempdir().unwrap();
        let feature = setup_feature(tmp.path());
        let ev = event(&feature, "01A", 0, Lane::Planned, Lane::Claimed);
        append_event(&feature, &ev).unwrap();

        // Event in JSONL
        let log = std::fs::read_to_string(feature.events_path()).unwrap();
        assert_eq!(log.lines().count(), 1);

        // Snapshot agrees
        let store = StatusStore::new(feature.clone());
        let snapshot = store.load_snapshot().unwrap();
        assert_eq!(snapshot.lane_of(&WpId::parse("WP01").unwrap()), Some(Lane::Claimed));

        // Frontmatter agrees (dual-write)
        let wp_path = feature.wp_file(&WpId::parse("WP01").unwrap()).unwrap().unwrap();
        assert_eq!(frontmatter::read_lane(&wp_path).unwrap(), Some(Lane::Claimed));
    }

    #[test]
    fn duplicate_append_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let feature = setup_feature(tmp.path());
        let ev = event(&feature, "01A", 0, Lane::Planned, Lane::Claimed);
        append_event(&feature, &ev).unwrap();
        append_event(&feature, &ev).unwrap();
        let log = std::fs::read_to_string(feature.events_path()).unwrap();
        assert_eq!(log.lines().count(), 1);
    }

    #[test]
    fn corrupt_lines_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let feature = setup_feature(tmp.path());
        let ev = event(&feature, "01A", 0, Lane::Planned, Lane::Claimed);
        append_event(&feature, &ev).unwrap();
        // Damage the log
        let mut raw = std::fs::read_to_string(feature.events_path()).unwrap();
        raw.push_str("{not json\n");
        std::fs::write(feature.events_path(), raw).unwrap();

        let events = read_events(&feature).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn missing_everything_is_empty_state() {
        let tmp = tempfile::tempdir().unwrap();
        let feature = FeatureDir::new(tmp.path(), FeatureSlug::parse("001-empty").unwrap());
        let store = StatusStore::new(feature);
        let snapshot = store.load_snapshot().unwrap();
        assert!(snapshot.work_packages.is_empty());
        assert_eq!(snapshot.event_count, 0);
    }

    #[test]
    fn missing_snapshot_rebuilt_from_events() {
        let tmp = tempfile::tempdir().unwrap();
        let feature = setup_feature(tmp.path());
        append_event(&feature, &event(&feature, "01A", 0, Lane::Planned, Lane::Claimed)).unwrap();
        std::fs::remove_file(feature.snapshot_path()).unwrap();

        let store = StatusStore::new(feature);
        let snapshot = store.load_snapshot().unwrap();
        assert_eq!(snapshot.event_count, 1);
    }

    #[test]
    fn record_transition_validates_guards() {
        let tmp = tempfile::tempdir().unwrap();
        let feature = setup_feature(tmp.path());
        let store = StatusStore::new(feature);

        // planned -> claimed without actor is rejected
        let err = store
            .record_transition(
                &WpId::parse("WP01").unwrap(),
                Lane::Claimed,
                &TransitionRequest::default(),
            )
            .unwrap_err();
        assert!(err.to_string().to_lowercase().contains("actor"));

        // and accepted with one
        let ev = store
            .record_transition(
                &WpId::parse("WP01").unwrap(),
                Lane::Claimed,
                &TransitionRequest {
                    actor: "agent-1".to_string(),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(ev.from_lane, Lane::Planned);
        assert_eq!(ev.to_lane, Lane::Claimed);
    }

    #[test]
    fn alias_canonicalized_everywhere() {
        // S2: move to "doing" after claimed; everything reads in_progress.
        let tmp = tempfile::tempdir().unwrap();
        let feature = setup_feature(tmp.path());
        let store = StatusStore::new(feature.clone());
        let wp = WpId::parse("WP01").unwrap();

        store
            .record_transition(&wp, Lane::Claimed, &TransitionRequest {
                actor: "agent-1".to_string(),
                ..Default::default()
            })
            .unwrap();
        let to = Lane::parse("doing").unwrap();
        store
            .record_transition(&wp, to, &TransitionRequest {
                actor: "agent-1".to_string(),
                workspace_context: Some("worktree:/tmp/wt1".to_string()),
                ..Default::default()
            })
            .unwrap();

        let log = std::fs::read_to_string(feature.events_path()).unwrap();
        assert!(log.contains("\"to_lane\":\"in_progress\""));
        assert!(!log.contains("doing"));

        let wp_path = feature.wp_file(&wp).unwrap().unwrap();
        let content = std::fs::read_to_string(wp_path).unwrap();
        assert!(content.contains("lane: in_progress"));

        assert_eq!(store.load_snapshot().unwrap().lane_of(&wp), Some(Lane::InProgress));
    }

    #[test]
    fn force_override_audit_trail() {
        // S3: drive to done, then force back to in_progress.
        let tmp = tempfile::tempdir().unwrap();
        let feature = setup_feature(tmp.path());
        let store = StatusStore::new(feature);
        let wp = WpId::parse("WP01").unwrap();

        store
            .record_transition(&wp, Lane::Claimed, &TransitionRequest {
                actor: "agent-1".to_string(),
                ..Default::default()
            })
            .unwrap();
        store
            .record_transition(&wp, Lane::InProgress, &TransitionRequest {
                actor: "agent-1".to_string(),
                workspace_context: Some("worktree:/tmp/wt1".to_string()),
                ..Default::default()
            })
            .unwrap();
        store
            .record_transition(&wp, Lane::ForReview, &TransitionRequest {
                actor: "agent-1".to_string(),
                subtasks_complete: true,
                implementation_evidence_present: true,
                ..Default::default()
            })
            .unwrap();
        store
            .record_transition(&wp, Lane::Done, &TransitionRequest {
                actor: "reviewer".to_string(),
                evidence: Some(DoneEvidence {
                    review: crate::status::event::ReviewApproval {
                        reviewer: "r".to_string(),
                        verdict: "approved".to_string(),
                        reference: "PR#7".to_string(),
                    },
                }),
                ..Default::default()
            })
            .unwrap();

        let forced = store
            .record_transition(&wp, Lane::InProgress, &TransitionRequest {
                actor: "admin".to_string(),
                reason: Some("hotfix".to_string()),
                force: true,
                ..Default::default()
            })
            .unwrap();
        assert!(forced.force);
        assert_eq!(forced.reason.as_deref(), Some("hotfix"));

        let snapshot = store.load_snapshot().unwrap();
        let state = &snapshot.work_packages[&wp];
        assert_eq!(state.lane, Lane::InProgress);
        assert_eq!(state.force_count, 1);
    }

    #[test]
    fn drift_validation_detects_edits_behind_the_store() {
        let tmp = tempfile::tempdir().unwrap();
        let feature = setup_feature(tmp.path());
        let store = StatusStore::new(feature.clone());
        let wp = WpId::parse("WP01").unwrap();
        store
            .record_transition(&wp, Lane::Claimed, &TransitionRequest {
                actor: "agent-1".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert!(store.validate_materialization_drift().unwrap().is_none());

        // Tamper with the snapshot
        std::fs::write(feature.snapshot_path(), "{}").unwrap();
        assert!(store.validate_materialization_drift().unwrap().is_some());
    }

    #[test]
    fn derived_view_drift_severity_follows_phase() {
        let tmp = tempfile::tempdir().unwrap();
        let feature = setup_feature(tmp.path());
        let store = StatusStore::new(feature.clone());
        let wp = WpId::parse("WP01").unwrap();
        store
            .record_transition(&wp, Lane::Claimed, &TransitionRequest {
                actor: "agent-1".to_string(),
                ..Default::default()
            })
            .unwrap();

        // Hand-edit the frontmatter behind the store's back.
        let wp_path = feature.wp_file(&wp).unwrap().unwrap();
        frontmatter::write_lane(&wp_path, Lane::Planned).unwrap();

        let warnings = store.validate_derived_views(StatusPhase::DualWrite).unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].severity, IssueSeverity::Warning);

        let errors = store
            .validate_derived_views(StatusPhase::SnapshotAuthoritative)
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].severity, IssueSeverity::Error);
    }
}
