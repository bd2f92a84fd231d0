//! Lane state machine: the closed transition table and guard conditions.
//!
//! The legal transition set is an explicit 16-edge table encoding the
//! lifecycle. Guards are keyed by `(from, to)` and return either OK or a
//! concrete diagnostic. Force is an auditable capability: it relaxes guards
//! and opens every edge, but only when both `actor` and `reason` are present.

use crate::status::event::DoneEvidence;
use crate::status::lane::Lane;

use Lane::{Blocked, Canceled, Claimed, Done, ForReview, InProgress, Planned};

/// The closed set of legal lane transitions.
pub const ALLOWED_TRANSITIONS: [(Lane, Lane); 16] = [
    (Planned, Claimed),
    (Claimed, InProgress),
    (InProgress, ForReview),
    (ForReview, Done),
    (ForReview, InProgress),
    (InProgress, Planned),
    (Planned, Blocked),
    (Claimed, Blocked),
    (InProgress, Blocked),
    (ForReview, Blocked),
    (Blocked, InProgress),
    (Planned, Canceled),
    (Claimed, Canceled),
    (InProgress, Canceled),
    (ForReview, Canceled),
    (Blocked, Canceled),
];

/// Guard inputs for a proposed transition.
///
/// Callers populate whichever facts they can prove; guards check the ones
/// relevant to the edge being taken.
#[derive(Debug, Clone, Default)]
pub struct TransitionContext<'a> {
    pub actor: Option<&'a str>,
    pub reason: Option<&'a str>,
    pub review_ref: Option<&'a str>,
    pub evidence: Option<&'a DoneEvidence>,
    /// Proof that a workspace was created for the WP.
    pub workspace_context: Option<&'a str>,
    pub subtasks_complete: bool,
    pub implementation_evidence_present: bool,
    pub force: bool,
}

fn present(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

/// Validate a proposed transition between two lanes.
///
/// Returns `Ok(())` when the edge is legal and its guards are satisfied, or
/// a diagnostic string describing exactly what is missing. Aliases must be
/// resolved by the caller (`Lane::parse` does this); this function only sees
/// canonical lanes.
pub fn validate_transition(
    from: Lane,
    to: Lane,
    ctx: &TransitionContext<'_>,
) -> Result<(), String> {
    if ctx.force {
        // Force opens any edge, including terminal exits, but never without
        // an audit trail.
        if present(ctx.actor) && present(ctx.reason) {
            return Ok(());
        }
        return Err(format!(
            "Force override of {from} -> {to} requires both actor and reason"
        ));
    }

    if !ALLOWED_TRANSITIONS.contains(&(from, to)) {
        return Err(format!("Illegal transition {from} -> {to}"));
    }

    match (from, to) {
        (Planned, Claimed) => {
            if !present(ctx.actor) {
                return Err("Transition planned -> claimed requires a non-empty actor".into());
            }
        }
        (Claimed, InProgress) => {
            if !present(ctx.workspace_context) {
                return Err(
                    "Transition claimed -> in_progress requires a workspace context".into(),
                );
            }
        }
        (InProgress, ForReview) => {
            if !ctx.subtasks_complete {
                return Err(
                    "Transition in_progress -> for_review requires completed subtasks".into(),
                );
            }
            if !ctx.implementation_evidence_present {
                return Err(
                    "Transition in_progress -> for_review requires implementation evidence".into(),
                );
            }
        }
        (ForReview, Done) => {
            if ctx.evidence.is_none() {
                return Err(
                    "Transition for_review -> done requires review approval evidence".into(),
                );
            }
        }
        (ForReview, InProgress) => {
            if !present(ctx.review_ref) {
                return Err(
                    "Transition for_review -> in_progress requires a non-empty review_ref".into(),
                );
            }
        }
        (InProgress, Planned) => {
            if !present(ctx.reason) {
                return Err("Transition in_progress -> planned requires a non-empty reason".into());
            }
        }
        (_, Blocked) => {
            if !present(ctx.reason) {
                return Err(format!(
                    "Transition {from} -> blocked requires a non-empty reason"
                ));
            }
        }
        _ => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::event::ReviewApproval;

    fn evidence() -> DoneEvidence {
        DoneEvidence {
            review: ReviewApproval {
                reviewer: "r".to_string(),
                verdict: "approved".to_string(),
                reference: "ref".to_string(),
            },
        }
    }

    #[test]
    fn sixteen_edges() {
        assert_eq!(ALLOWED_TRANSITIONS.len(), 16);
    }

    #[test]
    fn legal_transitions_accepted() {
        let done_evidence = evidence();
        let cases: Vec<(Lane, Lane, TransitionContext<'_>)> = vec![
            (
                Planned,
                Claimed,
                TransitionContext {
                    actor: Some("agent-1"),
                    ..Default::default()
                },
            ),
            (
                Claimed,
                InProgress,
                TransitionContext {
                    workspace_context: Some("worktree:/tmp/wt1"),
                    ..Default::default()
                },
            ),
            (
                InProgress,
                ForReview,
                TransitionContext {
                    subtasks_complete: true,
                    implementation_evidence_present: true,
                    ..Default::default()
                },
            ),
            (
                ForReview,
                Done,
                TransitionContext {
                    evidence: Some(&done_evidence),
                    ..Default::default()
                },
            ),
            (
                ForReview,
                InProgress,
                TransitionContext {
                    review_ref: Some("feedback-123"),
                    ..Default::default()
                },
            ),
            (
                InProgress,
                Planned,
                TransitionContext {
                    reason: Some("reassigning"),
                    ..Default::default()
                },
            ),
            (
                Blocked,
                InProgress,
                TransitionContext::default(),
            ),
            (Planned, Canceled, TransitionContext::default()),
            (Claimed, Canceled, TransitionContext::default()),
            (InProgress, Canceled, TransitionContext::default()),
            (ForReview, Canceled, TransitionContext::default()),
            (Blocked, Canceled, TransitionContext::default()),
        ];
        for (from, to, ctx) in cases {
            let result = validate_transition(from, to, &ctx);
            assert!(result.is_ok(), "{from} -> {to}: {result:?}");
        }
    }

    #[test]
    fn blocked_entry_requires_reason() {
        for from in [Planned, Claimed, InProgress, ForReview] {
            let bare = validate_transition(from, Blocked, &TransitionContext::default());
            assert!(bare.is_err(), "{from} -> blocked accepted without reason");
            let with_reason = validate_transition(
                from,
                Blocked,
                &TransitionContext {
                    reason: Some("waiting on upstream fix"),
                    ..Default::default()
                },
            );
            assert!(with_reason.is_ok(), "{from} -> blocked: {with_reason:?}");
        }
    }

    #[test]
    fn illegal_transitions_rejected() {
        let cases = [
            (Planned, Done),
            (Planned, InProgress),
            (Planned, ForReview),
            (Claimed, ForReview),
            (Claimed, Done),
            (Claimed, Planned),
            (Done, Planned),
            (Done, InProgress),
            (Done, ForReview),
            (Canceled, Planned),
            (Canceled, InProgress),
            (Blocked, Planned),
            (Blocked, ForReview),
            (Blocked, Done),
        ];
        for (from, to) in cases {
            let err = validate_transition(from, to, &TransitionContext::default()).unwrap_err();
            assert!(err.contains("Illegal transition"), "{from} -> {to}: {err}");
        }
    }

    #[test]
    fn force_allows_terminal_exit() {
        let ctx = TransitionContext {
            force: true,
            actor: Some("admin"),
            reason: Some("reopening"),
            ..Default::default()
        };
        assert!(validate_transition(Done, Planned, &ctx).is_ok());
    }

    #[test]
    fn force_without_actor_rejected() {
        let ctx = TransitionContext {
            force: true,
            reason: Some("reopening"),
            ..Default::default()
        };
        let err = validate_transition(Done, Planned, &ctx).unwrap_err();
        assert!(err.contains("actor and reason"));
    }

    #[test]
    fn force_without_reason_rejected() {
        let ctx = TransitionContext {
            force: true,
            actor: Some("admin"),
            ..Default::default()
        };
        assert!(validate_transition(Done, Planned, &ctx).is_err());
    }

    #[test]
    fn force_with_empty_strings_rejected() {
        let ctx = TransitionContext {
            force: true,
            actor: Some(""),
            reason: Some("reopening"),
            ..Default::default()
        };
        assert!(validate_transition(Done, Planned, &ctx).is_err());

        let ctx = TransitionContext {
            force: true,
            actor: Some("admin"),
            reason: Some("  "),
            ..Default::default()
        };
        assert!(validate_transition(Done, Planned, &ctx).is_err());
    }

    #[test]
    fn force_on_legal_transition_bypasses_guards() {
        // for_review -> done normally requires evidence
        let ctx = TransitionContext {
            force: true,
            actor: Some("admin"),
            reason: Some("emergency override"),
            ..Default::default()
        };
        assert!(validate_transition(ForReview, Done, &ctx).is_ok());
    }

    #[test]
    fn guard_diagnostics_name_the_missing_fact() {
        let err = validate_transition(Planned, Claimed, &TransitionContext::default()).unwrap_err();
        assert!(err.to_lowercase().contains("actor"));

        let err =
            validate_transition(ForReview, InProgress, &TransitionContext::default()).unwrap_err();
        assert!(err.to_lowercase().contains("review_ref"));

        let err = validate_transition(ForReview, Done, &TransitionContext::default()).unwrap_err();
        assert!(err.to_lowercase().contains("evidence"));

        let err =
            validate_transition(Claimed, InProgress, &TransitionContext::default()).unwrap_err();
        assert!(err.to_lowercase().contains("workspace context"));
    }

    #[test]
    fn for_review_guard_checks_each_fact() {
        let only_evidence = TransitionContext {
            implementation_evidence_present: true,
            ..Default::default()
        };
        let err = validate_transition(InProgress, ForReview, &only_evidence).unwrap_err();
        assert!(err.to_lowercase().contains("completed subtasks"));

        let only_subtasks = TransitionContext {
            subtasks_complete: true,
            ..Default::default()
        };
        let err = validate_transition(InProgress, ForReview, &only_subtasks).unwrap_err();
        assert!(err.to_lowercase().contains("implementation evidence"));
    }

    #[test]
    fn alias_resolution_happens_before_validation() {
        // doing -> doing means in_progress -> in_progress, not a legal edge
        let from = Lane::parse("doing").unwrap();
        let to = Lane::parse("doing").unwrap();
        assert!(validate_transition(from, to, &TransitionContext::default()).is_err());
    }
}
