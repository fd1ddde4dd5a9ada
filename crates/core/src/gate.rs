//! Access gate for the presentation layer.
//!
//! [`AccessGate`] composes a [`CycleSnapshot`] (cycle, phase catalog,
//! schedules, permission matrices) with the caller's roles and today's date
//! into a single decision: can the user enter the application, may they
//! open a given route, and which actions are enabled for them right now.
//!
//! A denial is an ordinary outcome carrying the user's roles and the active
//! phase name so callers can render a diagnostic without re-deriving them.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{Action, Gestion, GlobalPhase, PhaseWithSchedule, Role, SessionState};
use crate::permissions::PermissionMatrix;
use crate::schedule::ScheduleAllocator;

/// Action codes the orchestrator itself gates on.
pub mod actions {
    pub const MANAGE_CYCLE: &str = "MANAGE_CYCLE";
    pub const MANAGE_SCHEDULE: &str = "MANAGE_SCHEDULE";
    pub const MANAGE_PERMISSIONS: &str = "MANAGE_PERMISSIONS";
    pub const MANAGE_SUBPHASES: &str = "MANAGE_SUBPHASES";
    pub const REGISTER_STUDENT: &str = "REGISTER_STUDENT";
    pub const LOAD_GRADES: &str = "LOAD_GRADES";
    pub const PUBLISH_RESULTS: &str = "PUBLISH_RESULTS";
    pub const VIEW_AUDIT: &str = "VIEW_AUDIT";
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Everything a gate decision reads, fetched once per request.
#[derive(Debug, Clone)]
pub struct CycleSnapshot {
    pub gestion: Option<Gestion>,
    pub phases: Vec<PhaseWithSchedule>,
    pub actions: Vec<Action>,
    pub roles: Vec<Role>,
    pub matrix: PermissionMatrix,
}

impl CycleSnapshot {
    pub fn action_id(&self, code: &str) -> Option<i64> {
        self.actions.iter().find(|a| a.code == code).map(|a| a.id)
    }

    /// Resolve role names to ids. Unknown names are dropped.
    pub fn role_ids(&self, names: &[String]) -> Vec<i64> {
        names
            .iter()
            .filter_map(|name| {
                let found = self.roles.iter().find(|r| &r.name == name).map(|r| r.id);
                if found.is_none() {
                    debug!(role = %name, "session role not in catalog, ignoring");
                }
                found
            })
            .collect()
    }
}

/// Derive whether the app can be entered or which setup flow is forced.
pub fn session_state(
    gestion: Option<&Gestion>,
    phases: &[PhaseWithSchedule],
    baseline_codes: &[String],
) -> SessionState {
    if gestion.is_none() {
        return SessionState::NoCycle;
    }
    let all_scheduled = baseline_codes.iter().all(|code| {
        phases
            .iter()
            .any(|p| &p.phase.code == code && p.schedule.is_some())
    });
    if all_scheduled {
        SessionState::Ready
    } else {
        SessionState::AwaitingSchedule
    }
}

// ---------------------------------------------------------------------------
// Routes and decisions
// ---------------------------------------------------------------------------

/// What a route needs before it can be entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteSpec {
    pub required_action: Option<&'static str>,
    /// Reachable before the session is `READY` (cycle setup screens).
    pub during_setup: bool,
}

impl RouteSpec {
    /// No action required.
    pub const fn open() -> Self {
        Self {
            required_action: None,
            during_setup: false,
        }
    }

    pub const fn requires(action: &'static str) -> Self {
        Self {
            required_action: Some(action),
            during_setup: false,
        }
    }

    pub const fn during_setup(self) -> Self {
        Self {
            during_setup: true,
            ..self
        }
    }
}

/// Why entry was refused.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenialReason {
    /// The session is still in a setup flow and the route is not part of it.
    SetupRequired { state: SessionState },
    /// Neither role nor phase (or not both) grant the action.
    MissingPermission { action: String },
    /// The route names an action absent from the catalog.
    UnknownAction { action: String },
}

/// Diagnostic payload of a denial.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessDenied {
    pub reason: DenialReason,
    pub roles: Vec<String>,
    pub active_phase: Option<String>,
    pub session_state: SessionState,
}

/// Outcome of a gate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    Denied(AccessDenied),
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Per-request access decisions for one user.
pub struct AccessGate<'a> {
    snapshot: &'a CycleSnapshot,
    user_roles: Vec<String>,
    role_ids: Vec<i64>,
    state: SessionState,
    active_phase: Option<GlobalPhase>,
}

impl<'a> AccessGate<'a> {
    pub fn new(
        snapshot: &'a CycleSnapshot,
        today: NaiveDate,
        user_roles: &[String],
        baseline_codes: &[String],
    ) -> Self {
        let state = session_state(snapshot.gestion.as_ref(), &snapshot.phases, baseline_codes);
        let active_phase = ScheduleAllocator::new(today)
            .current_active_phase(&snapshot.phases)
            .cloned();
        Self {
            snapshot,
            user_roles: user_roles.to_vec(),
            role_ids: snapshot.role_ids(user_roles),
            state,
            active_phase,
        }
    }

    pub fn session_state(&self) -> SessionState {
        self.state
    }

    pub fn roles(&self) -> &[String] {
        &self.user_roles
    }

    pub fn active_phase(&self) -> Option<&GlobalPhase> {
        self.active_phase.as_ref()
    }

    /// Effective permission for one action code. Unknown codes are denied.
    pub fn can_enter_route(&self, required_action: &str) -> bool {
        match self.snapshot.action_id(required_action) {
            Some(action_id) => self.snapshot.matrix.effective_allowed(
                &self.role_ids,
                action_id,
                self.active_phase.as_ref().map(|p| p.id),
            ),
            None => false,
        }
    }

    /// Full route check: setup flow first, then the required action.
    pub fn check(&self, route: &RouteSpec) -> GateDecision {
        self.decide(route.required_action, route.during_setup)
    }

    /// Check a regular (non-setup) route guarded by `action`.
    pub fn check_action(&self, action: &str) -> GateDecision {
        self.decide(Some(action), false)
    }

    fn decide(&self, required_action: Option<&str>, during_setup: bool) -> GateDecision {
        if self.state != SessionState::Ready && !during_setup {
            return self.deny(DenialReason::SetupRequired { state: self.state });
        }
        let Some(action) = required_action else {
            return GateDecision::Allowed;
        };
        if self.snapshot.action_id(action).is_none() {
            return self.deny(DenialReason::UnknownAction {
                action: action.to_string(),
            });
        }
        if self.can_enter_route(action) {
            GateDecision::Allowed
        } else {
            self.deny(DenialReason::MissingPermission {
                action: action.to_string(),
            })
        }
    }

    /// Codes of every catalog action currently allowed for this user.
    pub fn enabled_actions(&self) -> Vec<String> {
        self.snapshot
            .actions
            .iter()
            .filter(|a| self.can_enter_route(&a.code))
            .map(|a| a.code.clone())
            .collect()
    }

    fn deny(&self, reason: DenialReason) -> GateDecision {
        debug!(
            reason = ?reason,
            roles = ?self.user_roles,
            active_phase = ?self.active_phase.as_ref().map(|p| &p.code),
            "access denied"
        );
        GateDecision::Denied(AccessDenied {
            reason,
            roles: self.user_roles.clone(),
            active_phase: self.active_phase.as_ref().map(|p| p.name.clone()),
            session_state: self.state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PhasePermission, PhaseSchedule, RolePermission};

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn baseline() -> Vec<String> {
        vec!["CONFIGURACION".into(), "EVALUACION".into(), "FINAL".into()]
    }

    fn gestion() -> Gestion {
        Gestion {
            id: 1,
            year: 2025,
            is_current: true,
            created_at: "2025-01-01T00:00:00Z".into(),
        }
    }

    fn phase(
        id: i64,
        code: &str,
        name: &str,
        order: u32,
        window: Option<(&str, &str)>,
    ) -> PhaseWithSchedule {
        PhaseWithSchedule {
            phase: GlobalPhase {
                id,
                gestion_id: 1,
                code: code.into(),
                name: name.into(),
                order,
            },
            schedule: window.map(|(s, e)| PhaseSchedule {
                id,
                global_phase_id: id,
                start_date: day(s),
                end_date: day(e),
            }),
        }
    }

    /// EVAL enables LOAD_GRADES, FINAL does not; Evaluador holds LOAD_GRADES.
    fn snapshot(gestion: Option<Gestion>, scheduled: bool) -> CycleSnapshot {
        let w = |s, e| if scheduled { Some((s, e)) } else { None };
        let phases = vec![
            phase(1, "CONFIGURACION", "Configuración", 1, w("2025-01-01", "2025-01-31")),
            phase(2, "EVALUACION", "Evaluación", 2, w("2025-02-01", "2025-02-28")),
            phase(3, "FINAL", "Final", 3, w("2025-03-01", "2025-03-31")),
        ];
        let actions = vec![
            Action {
                id: 10,
                code: actions::LOAD_GRADES.into(),
                name: "Cargar notas".into(),
                description: String::new(),
            },
            Action {
                id: 11,
                code: actions::MANAGE_SCHEDULE.into(),
                name: "Cronograma".into(),
                description: String::new(),
            },
        ];
        let roles = vec![
            Role { id: 100, name: "Admin".into() },
            Role { id: 101, name: "Evaluador".into() },
        ];
        let mut phase_cells = Vec::new();
        for p in &phases {
            for a in &actions {
                let enabled = match (p.phase.code.as_str(), a.code.as_str()) {
                    ("EVALUACION", actions::LOAD_GRADES) => true,
                    (_, actions::MANAGE_SCHEDULE) => true,
                    _ => false,
                };
                phase_cells.push(PhasePermission {
                    global_phase_id: p.phase.id,
                    action_id: a.id,
                    enabled,
                });
            }
        }
        let role_cells = vec![
            RolePermission {
                role_id: 100,
                action_id: 10,
                active: false,
            },
            RolePermission {
                role_id: 100,
                action_id: 11,
                active: true,
            },
            RolePermission {
                role_id: 101,
                action_id: 10,
                active: true,
            },
            RolePermission {
                role_id: 101,
                action_id: 11,
                active: false,
            },
        ];
        CycleSnapshot {
            gestion,
            phases,
            actions,
            roles,
            matrix: PermissionMatrix::new(&phase_cells, &role_cells),
        }
    }

    #[test]
    fn test_no_gestion_is_no_cycle() {
        let snap = snapshot(None, false);
        let gate = AccessGate::new(&snap, day("2025-02-10"), &["Admin".into()], &baseline());
        assert_eq!(gate.session_state(), SessionState::NoCycle);
    }

    #[test]
    fn test_unscheduled_baseline_awaits_schedule() {
        let snap = snapshot(Some(gestion()), false);
        assert_eq!(
            session_state(snap.gestion.as_ref(), &snap.phases, &baseline()),
            SessionState::AwaitingSchedule
        );
        let snap = snapshot(Some(gestion()), true);
        assert_eq!(
            session_state(snap.gestion.as_ref(), &snap.phases, &baseline()),
            SessionState::Ready
        );
    }

    #[test]
    fn test_route_follows_active_phase() {
        let snap = snapshot(Some(gestion()), true);
        let roles = vec!["Evaluador".to_string()];
        let route = RouteSpec::requires(actions::LOAD_GRADES);

        let in_eval = AccessGate::new(&snap, day("2025-02-10"), &roles, &baseline());
        assert_eq!(in_eval.check(&route), GateDecision::Allowed);

        let in_final = AccessGate::new(&snap, day("2025-03-10"), &roles, &baseline());
        match in_final.check(&route) {
            GateDecision::Denied(denied) => {
                assert_eq!(denied.roles, roles);
                assert_eq!(denied.active_phase.as_deref(), Some("Final"));
                assert_eq!(
                    denied.reason,
                    DenialReason::MissingPermission { action: actions::LOAD_GRADES.into() }
                );
            }
            GateDecision::Allowed => panic!("LOAD_GRADES must be closed during FINAL"),
        }
    }

    #[test]
    fn test_setup_flow_blocks_regular_routes() {
        let snap = snapshot(Some(gestion()), false);
        let gate = AccessGate::new(&snap, day("2025-02-10"), &["Admin".into()], &baseline());

        let denied = gate.check(&RouteSpec::open());
        assert!(matches!(
            denied,
            GateDecision::Denied(AccessDenied {
                reason: DenialReason::SetupRequired { state: SessionState::AwaitingSchedule },
                ..
            })
        ));
        // No phase is active yet, so only the role grant counts.
        let setup = RouteSpec::requires(actions::MANAGE_SCHEDULE).during_setup();
        assert!(gate.check(&setup).is_allowed());
    }

    #[test]
    fn test_open_route_enterable_once_ready() {
        let snap = snapshot(Some(gestion()), true);
        let gate = AccessGate::new(&snap, day("2025-02-10"), &[], &baseline());
        assert!(gate.check(&RouteSpec::open()).is_allowed());
    }

    #[test]
    fn test_unknown_action_and_role_are_denied() {
        let snap = snapshot(Some(gestion()), true);
        let gate = AccessGate::new(&snap, day("2025-02-10"), &["Fantasma".into()], &baseline());
        assert!(!gate.can_enter_route(actions::LOAD_GRADES));
        assert!(matches!(
            gate.check(&RouteSpec::requires("NOT_A_CODE")),
            GateDecision::Denied(AccessDenied { reason: DenialReason::UnknownAction { .. }, .. })
        ));
    }

    #[test]
    fn test_enabled_actions_union_of_roles() {
        let snap = snapshot(Some(gestion()), true);
        let gate = AccessGate::new(
            &snap,
            day("2025-02-10"),
            &["Admin".into(), "Evaluador".into()],
            &baseline(),
        );
        assert_eq!(
            gate.enabled_actions(),
            vec![actions::LOAD_GRADES.to_string(), actions::MANAGE_SCHEDULE.to_string()]
        );
    }
}
