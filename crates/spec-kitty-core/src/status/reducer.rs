//! Pure, deterministic reduction of an event log to a snapshot.
//!
//! The reduce is total-order deterministic: deduplicate by `event_id`
//! (first occurrence wins), sort by `(at, rollback_rank desc, event_id)`,
//! apply in order. Rollback transitions out of `for_review` outrank forward
//! progression at equal timestamps, which is how "rollback beats concurrent
//! forward" is implemented.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::feature::WpId;
use crate::status::event::StatusEvent;
use crate::status::lane::Lane;

/// Per-WP state derived from the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkPackageState {
    pub lane: Lane,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    pub last_event_id: String,
    #[serde(default)]
    pub force_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_ref: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Materialized view of a feature's work packages.
///
/// Derived, not authoritative: regenerable from the event log at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Snapshot {
    #[serde(default)]
    pub work_packages: BTreeMap<WpId, WorkPackageState>,
    /// Count of work packages per lane.
    #[serde(default)]
    pub summary: BTreeMap<String, u64>,
    /// Number of unique events applied.
    #[serde(default)]
    pub event_count: u64,
}

impl Snapshot {
    /// Lane of a WP in the canonical view, if it has any events.
    #[must_use]
    pub fn lane_of(&self, wp_id: &WpId) -> Option<Lane> {
        self.work_packages.get(wp_id).map(|wp| wp.lane)
    }
}

/// Deduplicate by `event_id` (first occurrence wins) and sort by the
/// canonical ordering key.
#[must_use]
pub fn normalize(events: &[StatusEvent]) -> Vec<StatusEvent> {
    let mut unique: Vec<StatusEvent> = events
        .iter()
        .unique_by(|event| event.event_id.as_str())
        .cloned()
        .collect();
    unique.sort_by(|a, b| {
        (a.at, Reverse(a.rollback_rank()), &a.event_id)
            .cmp(&(b.at, Reverse(b.rollback_rank()), &b.event_id))
    });
    unique
}

fn fold(work_packages: &mut BTreeMap<WpId, WorkPackageState>, event: &StatusEvent) {
    let force_increment = u64::from(event.force);
    work_packages
        .entry(event.wp_id.clone())
        .and_modify(|wp| {
            wp.lane = event.to_lane;
            wp.actor = non_empty(&event.actor);
            wp.last_event_id.clone_from(&event.event_id);
            wp.force_count += force_increment;
            wp.review_ref.clone_from(&event.review_ref);
            wp.updated_at = event.at;
        })
        .or_insert_with(|| WorkPackageState {
            lane: event.to_lane,
            actor: non_empty(&event.actor),
            last_event_id: event.event_id.clone(),
            force_count: force_increment,
            review_ref: event.review_ref.clone(),
            updated_at: event.at,
        });
}

/// Apply a single event to a snapshot in place.
///
/// The caller is responsible for ordering and deduplication; this only folds
/// one event's effect into the per-WP state.
pub fn apply_event(snapshot: &mut Snapshot, event: &StatusEvent) {
    fold(&mut snapshot.work_packages, event);
    snapshot.event_count += 1;
    recompute_summary(snapshot);
}

/// Reduce an event slice to a snapshot.
///
/// Pure and deterministic: `reduce(E) == reduce(shuffle(dedup(E)))` up to the
/// documented tie-break.
#[must_use]
pub fn reduce(events: &[StatusEvent]) -> Snapshot {
    let ordered = normalize(events);
    let mut snapshot = Snapshot::default();
    for event in &ordered {
        fold(&mut snapshot.work_packages, event);
    }
    snapshot.event_count = ordered.len() as u64;
    recompute_summary(&mut snapshot);
    snapshot
}

fn recompute_summary(snapshot: &mut Snapshot) {
    let mut summary: BTreeMap<String, u64> = BTreeMap::new();
    for wp in snapshot.work_packages.values() {
        *summary.entry(wp.lane.as_str().to_string()).or_insert(0) += 1;
    }
    snapshot.summary = summary;
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
