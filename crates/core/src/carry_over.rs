//! Historical import of a past cycle's configuration.
//!
//! Carry-over is an explicit, one-shot operation: it copies area/level
//! enrolments and the phase permission matrix of an earlier gestión into
//! the current one. Phases and actions are matched by `code`, never by id,
//! since ids differ across cycles. Nothing in the current cycle keeps a
//! reference to the source afterwards.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{Action, GlobalPhase};
use crate::permissions::Cell;

/// A phase permission cell of the source cycle, keyed by codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCell {
    pub phase_code: String,
    pub action_code: String,
    pub enabled: bool,
}

/// Outcome of a carry-over import.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportReport {
    pub from_year: i32,
    pub to_year: i32,
    pub enrolments_copied: usize,
    pub permissions_copied: usize,
    /// Source phase codes with no counterpart in the target cycle.
    pub unmatched_phases: Vec<String>,
    /// Source action codes no longer in the catalog.
    pub unmatched_actions: Vec<String>,
}

/// Cells to write into the target phase matrix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatrixPlan {
    pub cells: Vec<Cell>,
    pub unmatched_phases: Vec<String>,
    pub unmatched_actions: Vec<String>,
}

/// Translate source cells into target `(phase id, action id, enabled)` cells.
///
/// Cells whose phase or action code has no match are skipped and reported
/// once per code, in first-seen order.
pub fn plan_phase_matrix(
    source: &[SourceCell],
    target_phases: &[GlobalPhase],
    actions: &[Action],
) -> MatrixPlan {
    let phase_ids: HashMap<&str, i64> = target_phases
        .iter()
        .map(|p| (p.code.as_str(), p.id))
        .collect();
    let action_ids: HashMap<&str, i64> = actions.iter().map(|a| (a.code.as_str(), a.id)).collect();

    let mut plan = MatrixPlan::default();
    for cell in source {
        let phase = phase_ids.get(cell.phase_code.as_str());
        let action = action_ids.get(cell.action_code.as_str());
        if phase.is_none() && !plan.unmatched_phases.contains(&cell.phase_code) {
            plan.unmatched_phases.push(cell.phase_code.clone());
        }
        if action.is_none() && !plan.unmatched_actions.contains(&cell.action_code) {
            plan.unmatched_actions.push(cell.action_code.clone());
        }
        if let (Some(&phase_id), Some(&action_id)) = (phase, action) {
            plan.cells.push((phase_id, action_id, cell.enabled));
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phase(id: i64, code: &str) -> GlobalPhase {
        GlobalPhase {
            id,
            gestion_id: 2,
            code: code.into(),
            name: code.into(),
            order: id as u32,
        }
    }

    fn action(id: i64, code: &str) -> Action {
        Action {
            id,
            code: code.into(),
            name: code.into(),
            description: String::new(),
        }
    }

    fn cell(phase: &str, action: &str, enabled: bool) -> SourceCell {
        SourceCell {
            phase_code: phase.into(),
            action_code: action.into(),
            enabled,
        }
    }

    #[test]
    fn test_matches_by_code() {
        let plan = plan_phase_matrix(
            &[
                cell("EVALUACION", "LOAD_GRADES", true),
                cell("FINAL", "LOAD_GRADES", false),
            ],
            &[phase(21, "EVALUACION"), phase(22, "FINAL")],
            &[action(7, "LOAD_GRADES")],
        );
        assert_eq!(plan.cells, vec![(21, 7, true), (22, 7, false)]);
        assert!(plan.unmatched_phases.is_empty());
        assert!(plan.unmatched_actions.is_empty());
    }

    #[test]
    fn test_unmatched_codes_reported_once() {
        let plan = plan_phase_matrix(
            &[
                cell("PREMIACION", "LOAD_GRADES", true),
                cell("PREMIACION", "PUBLISH_RESULTS", true),
                cell("FINAL", "RETIRED_ACTION", true),
            ],
            &[phase(22, "FINAL")],
            &[action(7, "LOAD_GRADES"), action(8, "PUBLISH_RESULTS")],
        );
        assert!(plan.cells.is_empty());
        assert_eq!(plan.unmatched_phases, vec!["PREMIACION"]);
        assert_eq!(plan.unmatched_actions, vec!["RETIRED_ACTION"]);
    }
}
