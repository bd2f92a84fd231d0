//! Multi-parent workspace merge coordination.
//!
//! Reintegrates completed WP branches into the target branch in dependency
//! order, with resumable state, auto-resolution of status-file conflicts,
//! and deterministic multi-parent base computation for diamond dependency
//! shapes.

pub mod coordinator;
pub mod multi_parent;
pub mod state;
pub mod status_resolver;

pub use coordinator::{MergeCoordinator, MergeOutcome};
pub use multi_parent::{cleanup_merge_base_branch, create_multi_parent_base, MultiParentResult};
pub use state::{
    clear_state, has_active_merge, load_state, save_state, MergeState, MergeStrategy,
};
pub use status_resolver::{
    is_status_file, parse_conflict_markers, resolve_status_file, ConflictRegion,
};
