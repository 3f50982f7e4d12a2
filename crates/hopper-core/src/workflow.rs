//! Lode workflow state machine
//!
//! Pure transition logic with no I/O. The state store applies these
//! functions under its mutation lock and acts on the returned [`Effect`].
//!
//! ```text
//! mill ──advance──▶ refine ──advance──▶ ship ──advance──▶ shipped
//!   │ ▲               │ ▲                │ ▲
//!  gate resume       gate resume        gate resume
//!   ▼ │               ▼ │                ▼ │
//!  gated             gated             gated
//!
//! any non-shipped stage ──fail──▶ error ──restart──▶ same stage
//! ```

use crate::error::HopperError;
use crate::types::{Lode, LodeId, Phase, Stage};

/// A requested change to one lode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The agent finished the current stage
    Advance { output: String },
    /// Pause for human review
    Gate { doc: String },
    /// Clear the review gate
    Resume,
    /// The stage failed
    Fail { reason: String },
    /// Run the current stage again
    Restart,
    /// An agent process claimed the lode
    Attach { window_ref: Option<String> },
    /// The claiming agent process went away
    Detach,
    /// Replace the status text
    SetStatus { status: String },
    /// Leave the active collection
    Archive,
    /// Return to the active collection
    Unarchive,
}

impl Transition {
    /// Verb used in error messages and logs
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Advance { .. } => "advance",
            Transition::Gate { .. } => "gate",
            Transition::Resume => "resume",
            Transition::Fail { .. } => "fail",
            Transition::Restart => "restart",
            Transition::Attach { .. } => "attach",
            Transition::Detach => "detach",
            Transition::SetStatus { .. } => "set status of",
            Transition::Archive => "archive",
            Transition::Unarchive => "unarchive",
        }
    }
}

/// Side effect a transition asks the outside world to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Nothing to do
    None,
    /// Start an agent for the given stage
    SpawnStage(Stage),
    /// Tear down whatever runs the lode
    Release,
}

/// Build a new lode in `mill` with an agent requested
pub fn create(
    id: LodeId,
    project: &str,
    scope: &str,
    title: Option<String>,
    now: u64,
) -> Result<(Lode, Effect), HopperError> {
    if project.trim().is_empty() {
        return Err(HopperError::Validation("project is required".to_string()));
    }

    let mut lode = Lode::new(id, project, scope, now);
    lode.title = title.filter(|t| !t.trim().is_empty());
    lode.active = true;
    Ok((lode, Effect::SpawnStage(Stage::Mill)))
}

fn rejected(lode: &Lode, transition: &Transition) -> HopperError {
    let state = match lode.phase() {
        Phase::Progressing(stage) if lode.active => format!("running in {}", stage),
        phase => phase.to_string(),
    };
    HopperError::InvalidTransition {
        id: lode.id.to_string(),
        action: transition.name(),
        state,
    }
}

fn required(value: &str, field: &str) -> Result<(), HopperError> {
    if value.trim().is_empty() {
        return Err(HopperError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

/// Apply a transition to a lode in place
///
/// On error the lode is left untouched. On success `updated_at` is set to
/// `now`.
pub fn apply(lode: &mut Lode, transition: Transition, now: u64) -> Result<Effect, HopperError> {
    let phase = lode.phase();

    let effect = match (&transition, phase) {
        (Transition::Advance { output }, Phase::Progressing(stage)) => {
            let Some(next) = stage.next() else {
                return Err(rejected(lode, &transition));
            };
            if !output.is_empty() {
                lode.outputs.insert(stage, output.clone());
            }
            lode.stage = next;
            if next.is_terminal() {
                lode.active = false;
                Effect::Release
            } else {
                Effect::SpawnStage(next)
            }
        }

        (Transition::Gate { doc }, Phase::Progressing(_)) => {
            required(doc, "doc")?;
            lode.gated = true;
            lode.review_doc = Some(doc.clone());
            Effect::None
        }

        (Transition::Resume, Phase::Gated(stage)) => {
            lode.gated = false;
            Effect::SpawnStage(stage)
        }

        (Transition::Fail { reason }, Phase::Progressing(_) | Phase::Gated(_)) => {
            required(reason, "reason")?;
            lode.error = Some(reason.clone());
            lode.gated = false;
            lode.active = false;
            Effect::Release
        }

        (Transition::Restart, Phase::Errored(stage)) => {
            lode.error = None;
            lode.active = true;
            Effect::SpawnStage(stage)
        }

        (Transition::Restart, Phase::Progressing(stage) | Phase::Gated(stage)) if !lode.active => {
            lode.active = true;
            Effect::SpawnStage(stage)
        }

        (Transition::Attach { window_ref }, Phase::Progressing(_) | Phase::Gated(_)) => {
            lode.active = true;
            if window_ref.is_some() {
                lode.window_ref = window_ref.clone();
            }
            Effect::None
        }

        (Transition::Detach, _) => {
            lode.active = false;
            lode.window_ref = None;
            Effect::None
        }

        (Transition::SetStatus { status }, _) => {
            lode.status = status.clone();
            Effect::None
        }

        (Transition::Archive, _) => {
            lode.active = false;
            Effect::Release
        }

        (Transition::Unarchive, _) => {
            lode.active = false;
            Effect::None
        }

        _ => return Err(rejected(lode, &transition)),
    };

    lode.touch(now);
    Ok(effect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Terminal;

    fn fresh() -> Lode {
        create(LodeId::new("abcd1234"), "demo", "fix bug", None, 1)
            .unwrap()
            .0
    }

    fn advance(output: &str) -> Transition {
        Transition::Advance {
            output: output.to_string(),
        }
    }

    #[test]
    fn test_create_starts_in_mill() {
        let (lode, effect) = create(LodeId::new("abcd1234"), "demo", "fix bug", None, 7).unwrap();
        assert_eq!(lode.stage, Stage::Mill);
        assert!(lode.active);
        assert_eq!(lode.created_at, 7);
        assert_eq!(effect, Effect::SpawnStage(Stage::Mill));
    }

    #[test]
    fn test_create_requires_project() {
        let err = create(LodeId::new("abcd1234"), "  ", "x", None, 1).unwrap_err();
        assert!(matches!(err, HopperError::Validation(_)));
    }

    #[test]
    fn test_advance_through_workflow() {
        let mut lode = fresh();

        assert_eq!(
            apply(&mut lode, advance("scoped"), 2).unwrap(),
            Effect::SpawnStage(Stage::Refine)
        );
        assert_eq!(
            apply(&mut lode, advance("implemented"), 3).unwrap(),
            Effect::SpawnStage(Stage::Ship)
        );
        assert_eq!(apply(&mut lode, advance("merged"), 4).unwrap(), Effect::Release);

        assert_eq!(lode.stage, Stage::Shipped);
        assert!(!lode.active);
        assert_eq!(lode.updated_at, 4);
        assert_eq!(lode.outputs.get(&Stage::Mill).unwrap(), "scoped");
        assert_eq!(lode.outputs.get(&Stage::Ship).unwrap(), "merged");
        assert_eq!(lode.terminal(), Some(Terminal::Shipped));
    }

    #[test]
    fn test_advance_on_shipped_is_rejected() {
        let mut lode = fresh();
        lode.stage = Stage::Shipped;
        let before = lode.clone();

        let err = apply(&mut lode, advance("again"), 9).unwrap_err();
        assert!(matches!(err, HopperError::InvalidTransition { action: "advance", .. }));
        assert_eq!(lode, before);
    }

    #[test]
    fn test_gate_blocks_advance_until_resume() {
        let mut lode = fresh();
        apply(&mut lode, Transition::Gate { doc: "plan.md".to_string() }, 2).unwrap();
        assert!(lode.gated);
        assert_eq!(lode.review_doc.as_deref(), Some("plan.md"));

        let err = apply(&mut lode, advance("x"), 3).unwrap_err();
        assert_eq!(err.to_string(), "Cannot advance lode abcd1234: it is gated in mill");

        assert_eq!(
            apply(&mut lode, Transition::Resume, 4).unwrap(),
            Effect::SpawnStage(Stage::Mill)
        );
        assert_eq!(lode.stage, Stage::Mill);
        apply(&mut lode, advance("x"), 5).unwrap();
        assert_eq!(lode.stage, Stage::Refine);
    }

    #[test]
    fn test_gate_requires_doc_and_progressing() {
        let mut lode = fresh();
        let err = apply(&mut lode, Transition::Gate { doc: String::new() }, 2).unwrap_err();
        assert!(matches!(err, HopperError::Validation(_)));

        apply(&mut lode, Transition::Gate { doc: "d".to_string() }, 2).unwrap();
        let err = apply(&mut lode, Transition::Gate { doc: "d".to_string() }, 3).unwrap_err();
        assert!(matches!(err, HopperError::InvalidTransition { .. }));
    }

    #[test]
    fn test_resume_requires_gate() {
        let mut lode = fresh();
        let err = apply(&mut lode, Transition::Resume, 2).unwrap_err();
        assert!(matches!(err, HopperError::InvalidTransition { action: "resume", .. }));
    }

    #[test]
    fn test_fail_then_restart() {
        let mut lode = fresh();
        apply(&mut lode, Transition::Gate { doc: "d".to_string() }, 2).unwrap();
        apply(&mut lode, Transition::Fail { reason: "tests broke".to_string() }, 3).unwrap();

        assert!(!lode.active);
        assert!(!lode.gated);
        assert_eq!(lode.phase(), Phase::Errored(Stage::Mill));

        let err = apply(&mut lode, advance("x"), 4).unwrap_err();
        assert!(matches!(err, HopperError::InvalidTransition { .. }));

        assert_eq!(
            apply(&mut lode, Transition::Restart, 5).unwrap(),
            Effect::SpawnStage(Stage::Mill)
        );
        assert!(lode.active);
        assert!(lode.error.is_none());
    }

    #[test]
    fn test_restart_rules() {
        let mut lode = fresh();
        // Running lodes cannot be restarted
        assert!(apply(&mut lode, Transition::Restart, 2).is_err());

        apply(&mut lode, Transition::Detach, 3).unwrap();
        assert!(apply(&mut lode, Transition::Restart, 4).is_ok());

        lode.stage = Stage::Shipped;
        lode.active = false;
        assert!(apply(&mut lode, Transition::Restart, 5).is_err());
    }

    #[test]
    fn test_attach_and_detach() {
        let mut lode = fresh();
        apply(&mut lode, Transition::Detach, 2).unwrap();
        assert!(!lode.active);

        apply(
            &mut lode,
            Transition::Attach {
                window_ref: Some("@3".to_string()),
            },
            3,
        )
        .unwrap();
        assert!(lode.active);
        assert_eq!(lode.window_ref.as_deref(), Some("@3"));

        apply(&mut lode, Transition::Detach, 4).unwrap();
        assert!(lode.window_ref.is_none());

        apply(&mut lode, Transition::Fail { reason: "x".to_string() }, 5).unwrap();
        let err = apply(&mut lode, Transition::Attach { window_ref: None }, 6).unwrap_err();
        assert!(matches!(err, HopperError::InvalidTransition { action: "attach", .. }));
    }

    #[test]
    fn test_status_allowed_in_any_phase() {
        let mut lode = fresh();
        lode.stage = Stage::Shipped;
        apply(&mut lode, Transition::SetStatus { status: "done".to_string() }, 2).unwrap();
        assert_eq!(lode.status, "done");
    }

    fn candidates() -> Vec<Transition> {
        vec![
            advance("out"),
            Transition::Gate { doc: "doc".to_string() },
            Transition::Resume,
            Transition::Fail { reason: "boom".to_string() },
            Transition::Restart,
            Transition::Attach { window_ref: None },
            Transition::Detach,
            Transition::SetStatus { status: "s".to_string() },
        ]
    }

    fn explore(lode: &Lode, depth: usize, visited: &mut usize) {
        if depth == 0 {
            return;
        }
        for transition in candidates() {
            let mut next = lode.clone();
            let before_stage = next.stage;
            let was_shipped = before_stage == Stage::Shipped;
            let is_advance = matches!(transition, Transition::Advance { .. });

            match apply(&mut next, transition, 100) {
                Ok(_) => {
                    *visited += 1;
                    assert!(next.stage >= before_stage, "stage moved backwards");
                    if next.stage != before_stage {
                        assert_eq!(before_stage.next(), Some(next.stage), "stage skipped");
                    }
                    assert!(!(next.gated && next.error.is_some()), "gated and errored");
                    assert!(!(was_shipped && is_advance), "advanced past shipped");
                    explore(&next, depth - 1, visited);
                }
                Err(err) => {
                    assert_eq!(&next, lode, "failed transition mutated the lode");
                    if was_shipped && is_advance {
                        assert!(matches!(err, HopperError::InvalidTransition { .. }));
                    }
                }
            }
        }
    }

    #[test]
    fn test_stage_only_moves_forward_for_all_short_histories() {
        let mut visited = 0;
        explore(&fresh(), 5, &mut visited);
        assert!(visited > 100);
    }
}
