//! Immutable status events, one JSONL line per lane transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::feature::{FeatureSlug, WpId};
use crate::status::lane::Lane;

/// Review approval carried by `for_review -> done` transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewApproval {
    pub reviewer: String,
    pub verdict: String,
    pub reference: String,
}

/// Done-specific evidence attached to a completing event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoneEvidence {
    pub review: ReviewApproval,
}

/// A single recorded lane transition.
///
/// Events are immutable once appended. Ordering during reduction is by
/// `(at, rollback_rank desc, event_id)`; deduplication is by `event_id`,
/// first occurrence wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Unique, sortable id (ULID or UUID).
    pub event_id: String,
    pub feature_slug: FeatureSlug,
    pub wp_id: WpId,
    pub from_lane: Lane,
    pub to_lane: Lane,
    /// RFC3339 UTC timestamp of the transition.
    pub at: DateTime<Utc>,
    pub actor: String,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub execution_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<DoneEvidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl StatusEvent {
    /// Rollback events outrank forward progression at equal timestamps.
    ///
    /// A rollback is a transition out of `for_review` into a non-terminal
    /// lane that carries a `review_ref`.
    #[must_use]
    pub fn rollback_rank(&self) -> u8 {
        let has_ref = self
            .review_ref
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty());
        u8::from(self.from_lane == Lane::ForReview && !self.to_lane.is_terminal() && has_ref)
    }

    /// Mint a fresh sortable event id (ULID).
    #[must_use]
    pub fn new_event_id() -> String {
        ulid::Ulid::new().to_string()
    }
}
