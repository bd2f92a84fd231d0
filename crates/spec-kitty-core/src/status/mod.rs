//! Work-package status: lanes, transitions, events, reduction, storage.
//!
//! The event log (`events.jsonl`) is the single source of truth for every
//! lane change. The snapshot (`status.json`) and WP frontmatter lanes are
//! derived views, regenerable at any time by re-running the reducer.

pub mod event;
pub mod lane;
pub mod reducer;
pub mod store;
pub mod transitions;

pub use event::{DoneEvidence, ReviewApproval, StatusEvent};
pub use lane::Lane;
pub use reducer::{reduce, Snapshot, WorkPackageState};
pub use store::{
    append_event, materialize, read_events, IssueSeverity, StatusStore, TransitionRequest,
    ValidationIssue,
};
pub use transitions::{validate_transition, TransitionContext, ALLOWED_TRANSITIONS};
