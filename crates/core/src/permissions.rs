//! Phase and role permission matrices.
//!
//! Two independent boolean grids answer "may this action run": one keyed by
//! global phase, one keyed by role. The effective decision is the role grant
//! (union over the caller's roles) AND the grant of the active phase, with
//! phase gating skipped while no phase is active.
//!
//! Matrices are always stored as the full cross product. A missing cell is a
//! data-integrity fault: reads treat it as `false` and log a warning.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::MatrixError;
use crate::models::{PhasePermission, RolePermission};

/// Which grid a set of cells belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatrixKind {
    Phase,
    Role,
}

impl MatrixKind {
    fn key_name(self) -> &'static str {
        match self {
            Self::Phase => "phase",
            Self::Role => "role",
        }
    }
}

impl std::fmt::Display for MatrixKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Phase => write!(f, "phase_permissions"),
            Self::Role => write!(f, "role_permissions"),
        }
    }
}

/// One cell of either grid: `(row key, action id, allowed)`.
pub type Cell = (i64, i64, bool);

// ---------------------------------------------------------------------------
// Grid
// ---------------------------------------------------------------------------

/// A boolean grid keyed by `(row key, action id)`.
#[derive(Debug, Clone)]
pub struct PermissionGrid {
    kind: MatrixKind,
    cells: HashMap<(i64, i64), bool>,
}

impl PermissionGrid {
    pub fn new(kind: MatrixKind, cells: impl IntoIterator<Item = Cell>) -> Self {
        Self {
            kind,
            cells: cells.into_iter().map(|(k, a, v)| ((k, a), v)).collect(),
        }
    }

    pub fn kind(&self) -> MatrixKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Look up a cell. Absence reads as `false`.
    pub fn get(&self, key: i64, action_id: i64) -> bool {
        match self.cells.get(&(key, action_id)) {
            Some(&allowed) => allowed,
            None => {
                warn!(
                    matrix = %self.kind,
                    key,
                    action_id,
                    "permission cell missing, treating as denied"
                );
                false
            }
        }
    }

    /// Count cells absent from the `keys × actions` cross product.
    pub fn missing_cells(&self, keys: &[i64], actions: &[i64]) -> usize {
        keys.iter()
            .flat_map(|k| actions.iter().map(move |a| (*k, *a)))
            .filter(|cell| !self.cells.contains_key(cell))
            .count()
    }

    /// Fail with [`MatrixError::Integrity`] if any cell is missing.
    pub fn check_integrity(&self, keys: &[i64], actions: &[i64]) -> Result<(), MatrixError> {
        match self.missing_cells(keys, actions) {
            0 => Ok(()),
            missing => Err(MatrixError::Integrity {
                matrix: self.kind.to_string(),
                missing,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Composite matrix
// ---------------------------------------------------------------------------

/// Both grids of the current cycle.
#[derive(Debug, Clone)]
pub struct PermissionMatrix {
    phases: PermissionGrid,
    roles: PermissionGrid,
}

impl PermissionMatrix {
    pub fn new(phase_cells: &[PhasePermission], role_cells: &[RolePermission]) -> Self {
        Self {
            phases: PermissionGrid::new(
                MatrixKind::Phase,
                phase_cells
                    .iter()
                    .map(|c| (c.global_phase_id, c.action_id, c.enabled)),
            ),
            roles: PermissionGrid::new(
                MatrixKind::Role,
                role_cells.iter().map(|c| (c.role_id, c.action_id, c.active)),
            ),
        }
    }

    pub fn phases(&self) -> &PermissionGrid {
        &self.phases
    }

    pub fn roles(&self) -> &PermissionGrid {
        &self.roles
    }

    pub fn is_phase_allowed(&self, phase_id: i64, action_id: i64) -> bool {
        self.phases.get(phase_id, action_id)
    }

    /// `true` if any of `role_ids` grants the action.
    pub fn is_role_allowed(&self, role_ids: &[i64], action_id: i64) -> bool {
        role_ids.iter().any(|&role| self.roles.get(role, action_id))
    }

    /// Role grant AND phase grant. With no active phase only roles count.
    pub fn effective_allowed(
        &self,
        role_ids: &[i64],
        action_id: i64,
        active_phase_id: Option<i64>,
    ) -> bool {
        let by_role = self.is_role_allowed(role_ids, action_id);
        let by_phase = match active_phase_id {
            Some(phase_id) => self.is_phase_allowed(phase_id, action_id),
            None => true,
        };
        debug!(
            roles = ?role_ids,
            action_id,
            active_phase_id = ?active_phase_id,
            by_role,
            by_phase,
            "evaluated effective permission"
        );
        by_role && by_phase
    }
}

// ---------------------------------------------------------------------------
// Replacement
// ---------------------------------------------------------------------------

/// Expand a submitted matrix into the full `keys × actions` cross product.
///
/// Cells absent from `submitted` become `false`. Submitting the same cell
/// twice with different values, or referencing an unknown key or action,
/// is rejected before anything is written.
pub fn materialize(
    kind: MatrixKind,
    keys: &[i64],
    actions: &[i64],
    submitted: &[Cell],
) -> Result<Vec<Cell>, MatrixError> {
    let known_keys: HashSet<i64> = keys.iter().copied().collect();
    let known_actions: HashSet<i64> = actions.iter().copied().collect();

    let mut explicit: HashMap<(i64, i64), bool> = HashMap::with_capacity(submitted.len());
    for &(key, action_id, allowed) in submitted {
        if !known_keys.contains(&key) {
            return Err(MatrixError::UnknownKey {
                key_kind: kind.key_name().to_string(),
                id: key,
            });
        }
        if !known_actions.contains(&action_id) {
            return Err(MatrixError::UnknownAction(action_id));
        }
        if let Some(previous) = explicit.insert((key, action_id), allowed) {
            if previous != allowed {
                return Err(MatrixError::DuplicateCell { key, action_id });
            }
        }
    }

    let mut full: BTreeMap<(i64, i64), bool> = BTreeMap::new();
    for &key in keys {
        for &action_id in actions {
            let allowed = explicit.get(&(key, action_id)).copied().unwrap_or(false);
            full.insert((key, action_id), allowed);
        }
    }

    debug!(
        matrix = %kind,
        submitted = submitted.len(),
        total = full.len(),
        "materialized permission matrix"
    );

    Ok(full.into_iter().map(|((k, a), v)| (k, a, v)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVAL: i64 = 2;
    const FINAL: i64 = 3;
    const LOAD_GRADES: i64 = 20;
    const PUBLISH: i64 = 30;
    const ADMIN: i64 = 100;
    const EVALUADOR: i64 = 101;
    const RESPONSABLE: i64 = 102;

    fn scenario_matrix() -> PermissionMatrix {
        let phases = vec![
            PhasePermission {
                global_phase_id: EVAL,
                action_id: LOAD_GRADES,
                enabled: true,
            },
            PhasePermission {
                global_phase_id: EVAL,
                action_id: PUBLISH,
                enabled: false,
            },
            PhasePermission {
                global_phase_id: FINAL,
                action_id: LOAD_GRADES,
                enabled: false,
            },
            PhasePermission {
                global_phase_id: FINAL,
                action_id: PUBLISH,
                enabled: true,
            },
        ];
        let roles = vec![
            RolePermission {
                role_id: ADMIN,
                action_id: LOAD_GRADES,
                active: false,
            },
            RolePermission {
                role_id: ADMIN,
                action_id: PUBLISH,
                active: true,
            },
            RolePermission {
                role_id: EVALUADOR,
                action_id: LOAD_GRADES,
                active: true,
            },
            RolePermission {
                role_id: EVALUADOR,
                action_id: PUBLISH,
                active: false,
            },
            RolePermission {
                role_id: RESPONSABLE,
                action_id: LOAD_GRADES,
                active: false,
            },
            RolePermission {
                role_id: RESPONSABLE,
                action_id: PUBLISH,
                active: false,
            },
        ];
        PermissionMatrix::new(&phases, &roles)
    }

    #[test]
    fn test_effective_allowed_follows_active_phase() {
        let m = scenario_matrix();
        assert!(m.effective_allowed(&[EVALUADOR], LOAD_GRADES, Some(EVAL)));
        assert!(!m.effective_allowed(&[EVALUADOR], LOAD_GRADES, Some(FINAL)));
    }

    #[test]
    fn test_no_active_phase_uses_roles_only() {
        let m = scenario_matrix();
        assert!(m.effective_allowed(&[EVALUADOR], LOAD_GRADES, None));
        assert!(!m.effective_allowed(&[RESPONSABLE], LOAD_GRADES, None));
    }

    #[test]
    fn test_role_union_semantics() {
        let m = scenario_matrix();
        for action in [LOAD_GRADES, PUBLISH] {
            let either =
                m.is_role_allowed(&[ADMIN], action) || m.is_role_allowed(&[EVALUADOR], action);
            assert_eq!(m.is_role_allowed(&[ADMIN, EVALUADOR], action), either);
        }
        assert!(m.is_role_allowed(&[ADMIN, EVALUADOR], LOAD_GRADES));
        assert!(m.is_role_allowed(&[ADMIN, EVALUADOR], PUBLISH));
        assert!(!m.is_role_allowed(&[], PUBLISH));
    }

    #[test]
    fn test_missing_cell_is_denied() {
        let m = PermissionMatrix::new(&[], &[]);
        assert!(!m.is_phase_allowed(EVAL, LOAD_GRADES));
        assert!(!m.is_role_allowed(&[ADMIN], LOAD_GRADES));
        // A role grant alone never survives a missing phase cell.
        let roles = [RolePermission {
            role_id: ADMIN,
            action_id: LOAD_GRADES,
            active: true,
        }];
        let m = PermissionMatrix::new(&[], &roles);
        assert!(!m.effective_allowed(&[ADMIN], LOAD_GRADES, Some(EVAL)));
    }

    #[test]
    fn test_materialize_is_total() {
        let keys = [EVAL, FINAL];
        let actions = [LOAD_GRADES, PUBLISH];
        let full = materialize(
            MatrixKind::Phase,
            &keys,
            &actions,
            &[(EVAL, LOAD_GRADES, true)],
        )
        .unwrap();
        assert_eq!(full.len(), keys.len() * actions.len());
        assert!(full.contains(&(EVAL, LOAD_GRADES, true)));
        assert!(full.contains(&(FINAL, PUBLISH, false)));

        let grid = PermissionGrid::new(MatrixKind::Phase, full);
        assert_eq!(grid.missing_cells(&keys, &actions), 0);
        assert!(grid.check_integrity(&keys, &actions).is_ok());
    }

    #[test]
    fn test_materialize_rejects_bad_rows() {
        let keys = [ADMIN];
        let actions = [LOAD_GRADES];
        assert_eq!(
            materialize(MatrixKind::Role, &keys, &actions, &[(999, LOAD_GRADES, true)]),
            Err(MatrixError::UnknownKey {
                key_kind: "role".into(),
                id: 999,
            })
        );
        assert_eq!(
            materialize(MatrixKind::Role, &keys, &actions, &[(ADMIN, 999, true)]),
            Err(MatrixError::UnknownAction(999))
        );
        assert_eq!(
            materialize(
                MatrixKind::Role,
                &keys,
                &actions,
                &[(ADMIN, LOAD_GRADES, true), (ADMIN, LOAD_GRADES, false)],
            ),
            Err(MatrixError::DuplicateCell {
                key: ADMIN,
                action_id: LOAD_GRADES,
            })
        );
        // Identical duplicates are harmless.
        assert!(materialize(
            MatrixKind::Role,
            &keys,
            &actions,
            &[(ADMIN, LOAD_GRADES, true), (ADMIN, LOAD_GRADES, true)]
        )
        .is_ok());
    }

    #[test]
    fn test_integrity_reports_missing_count() {
        let grid = PermissionGrid::new(MatrixKind::Role, [(ADMIN, LOAD_GRADES, true)]);
        assert_eq!(
            grid.check_integrity(&[ADMIN, EVALUADOR], &[LOAD_GRADES, PUBLISH]),
            Err(MatrixError::Integrity { matrix: "role_permissions".into(), missing: 3 })
        );
    }
}
