//! Canonical lanes and alias resolution.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One of the seven canonical status values of a work package.
///
/// The alias `doing` resolves to [`Lane::InProgress`] on input; only the
/// canonical form is ever persisted.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Planned,
    Claimed,
    InProgress,
    ForReview,
    Done,
    Blocked,
    Canceled,
}

impl Lane {
    /// All canonical lanes in lifecycle order.
    #[must_use]
    pub const fn all() -> [Self; 7] {
        [
            Self::Planned,
            Self::Claimed,
            Self::InProgress,
            Self::ForReview,
            Self::Done,
            Self::Blocked,
            Self::Canceled,
        ]
    }

    /// Canonical snake_case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Claimed => "claimed",
            Self::InProgress => "in_progress",
            Self::ForReview => "for_review",
            Self::Done => "done",
            Self::Blocked => "blocked",
            Self::Canceled => "canceled",
        }
    }

    /// Parse a lane name, resolving aliases.
    ///
    /// Input is trimmed and matched case-insensitively; `doing` resolves to
    /// `in_progress`. Unknown names are rejected with a diagnostic naming the
    /// offending lane.
    pub fn parse(input: &str) -> Result<Self> {
        let normalized = input.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "planned" => Ok(Self::Planned),
            "claimed" => Ok(Self::Claimed),
            "in_progress" | "doing" => Ok(Self::InProgress),
            "for_review" => Ok(Self::ForReview),
            "done" => Ok(Self::Done),
            "blocked" => Ok(Self::Blocked),
            "canceled" => Ok(Self::Canceled),
            other => Err(Error::validation_field(
                format!("Unknown lane '{other}'"),
                "lane",
            )),
        }
    }

    /// Terminal lanes never progress without a force override.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Canceled)
    }

    /// Priority used by the merge coordinator's "more-done wins" policy:
    /// `done > for_review > in_progress > claimed > planned > blocked > canceled`.
    #[must_use]
    pub const fn merge_priority(self) -> u8 {
        match self {
            Self::Done => 6,
            Self::ForReview => 5,
            Self::InProgress => 4,
            Self::Claimed => 3,
            Self::Planned => 2,
            Self::Blocked => 1,
            Self::Canceled => 0,
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn seven_canonical_lanes() {
        assert_eq!(Lane::all().len(), 7);
        assert_eq!(Lane::iter().count(), 7);
    }

    #[test]
    fn doing_resolves_to_in_progress() {
        assert_eq!(Lane::parse("doing").unwrap(), Lane::InProgress);
    }

    #[test]
    fn passthrough_canonical_lane() {
        assert_eq!(Lane::parse("planned").unwrap(), Lane::Planned);
        assert_eq!(Lane::parse("claimed").unwrap(), Lane::Claimed);
        assert_eq!(Lane::parse("in_progress").unwrap(), Lane::InProgress);
    }

    #[test]
    fn case_insensitive_alias() {
        assert_eq!(Lane::parse("Doing").unwrap(), Lane::InProgress);
        assert_eq!(Lane::parse("DOING").unwrap(), Lane::InProgress);
    }

    #[test]
    fn strips_whitespace() {
        assert_eq!(Lane::parse("  doing  ").unwrap(), Lane::InProgress);
        assert_eq!(Lane::parse("  planned  ").unwrap(), Lane::Planned);
    }

    #[test]
    fn unknown_lane_rejected() {
        let err = Lane::parse("nonexistent").unwrap_err();
        assert!(err.to_string().contains("Unknown lane"));
    }

    #[test]
    fn terminal_lanes() {
        assert!(Lane::Done.is_terminal());
        assert!(Lane::Canceled.is_terminal());
        assert!(!Lane::InProgress.is_terminal());
        assert!(!Lane::Planned.is_terminal());
        assert!(!Lane::parse("doing").unwrap().is_terminal());
    }

    #[test]
    fn serde_uses_canonical_names() {
        assert_eq!(
            serde_json::to_string(&Lane::InProgress).unwrap(),
            "\"in_progress\""
        );
        let lane: Lane = serde_json::from_str("\"for_review\"").unwrap();
        assert_eq!(lane, Lane::ForReview);
    }

    #[test]
    fn merge_priority_ordering() {
        assert!(Lane::Done.merge_priority() > Lane::ForReview.merge_priority());
        assert!(Lane::ForReview.merge_priority() > Lane::InProgress.merge_priority());
        assert!(Lane::InProgress.merge_priority() > Lane::Planned.merge_priority());
        assert!(Lane::Planned.merge_priority() > Lane::Blocked.merge_priority());
        assert!(Lane::Blocked.merge_priority() > Lane::Canceled.merge_priority());
    }
}
