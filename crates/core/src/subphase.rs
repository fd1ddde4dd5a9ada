//! Sub-phase state machine for (area, level) evaluation tracks.
//!
//! ```text
//! NO_INICIADA -> EN_EVALUACION -> FINALIZADA
//! ```
//!
//! Transitions are forward-only. A sub-phase may only start once its
//! predecessor in the same track (`order - 1`) is finalized; tracks of
//! different (area, level) pairs never constrain each other.
//!
//! Everything here is pure. The database layer re-runs [`transition`]
//! against freshly read rows inside the write transaction, so a guard is
//! never trusted from an earlier read.

use tracing::debug;

use crate::errors::TransitionError;
use crate::models::{SubPhase, SubPhaseStatus};

/// Progress reported for a finalized sub-phase.
pub const FINALIZED_PROGRESS: u8 = 100;

/// `true` if `sub_phase` may move to `EN_EVALUACION`.
pub fn can_start(sub_phase: &SubPhase, siblings: &[SubPhase]) -> bool {
    sub_phase.status == SubPhaseStatus::NoIniciada
        && blocking_predecessor(sub_phase, siblings).is_none()
}

/// `true` if `sub_phase` may move to `FINALIZADA`.
pub fn can_finalize(sub_phase: &SubPhase) -> bool {
    sub_phase.status == SubPhaseStatus::EnEvaluacion
}

/// The transition currently available for `sub_phase`, if any.
pub fn available_transition(sub_phase: &SubPhase, siblings: &[SubPhase]) -> Option<SubPhaseStatus> {
    if can_start(sub_phase, siblings) {
        Some(SubPhaseStatus::EnEvaluacion)
    } else if can_finalize(sub_phase) {
        Some(SubPhaseStatus::Finalizada)
    } else {
        None
    }
}

/// Apply `target` to `sub_phase`, re-validating the guard.
///
/// `siblings` is the sub-phase's track as currently persisted; entries
/// from other tracks are ignored.
pub fn transition(
    sub_phase: &SubPhase,
    siblings: &[SubPhase],
    target: SubPhaseStatus,
) -> Result<SubPhase, TransitionError> {
    let invalid = || TransitionError::InvalidState {
        sub_phase: sub_phase.name.clone(),
        from: sub_phase.status.to_string(),
        to: target.to_string(),
    };

    let mut next = sub_phase.clone();
    match (sub_phase.status, target) {
        (SubPhaseStatus::NoIniciada, SubPhaseStatus::EnEvaluacion) => {
            if let Some(blocking) = blocking_predecessor(sub_phase, siblings) {
                return Err(TransitionError::SequenceViolation {
                    sub_phase: sub_phase.name.clone(),
                    blocking,
                });
            }
            next.status = SubPhaseStatus::EnEvaluacion;
        }
        (SubPhaseStatus::EnEvaluacion, SubPhaseStatus::Finalizada) => {
            next.status = SubPhaseStatus::Finalizada;
            next.progress_percent = FINALIZED_PROGRESS;
        }
        _ => return Err(invalid()),
    }

    debug!(
        sub_phase_id = sub_phase.id,
        from = %sub_phase.status,
        to = %next.status,
        "sub-phase transition accepted"
    );
    Ok(next)
}

/// Order for a sub-phase appended to a track.
pub fn next_order(siblings: &[SubPhase]) -> u32 {
    siblings.iter().map(|s| s.order).max().unwrap_or(0) + 1
}

/// Name of the predecessor blocking `sub_phase` from starting, if any.
///
/// A missing predecessor row blocks as well; it is reported by its order.
fn blocking_predecessor(sub_phase: &SubPhase, siblings: &[SubPhase]) -> Option<String> {
    if sub_phase.order <= 1 {
        return None;
    }
    let wanted = sub_phase.order - 1;
    let predecessor = siblings.iter().find(|s| {
        s.area_id == sub_phase.area_id && s.level_id == sub_phase.level_id && s.order == wanted
    });
    match predecessor {
        Some(p) if p.status == SubPhaseStatus::Finalizada => None,
        Some(p) => Some(p.name.clone()),
        None => Some(format!("#{}", wanted)),
    }
}
