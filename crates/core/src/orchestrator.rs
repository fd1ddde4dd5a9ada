//! The competition lifecycle orchestrator.
//!
//! [`Orchestrator`] is the single entry point used by the web API, the
//! server's phase watcher and the CLI. It owns the database handle, the
//! clock and the lifecycle policy, fetches snapshots for the pure decision
//! components, and records an audit entry for every mutating operation.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::calendar::Clock;
use crate::carry_over::ImportReport;
use crate::config::PolicyConfig;
use crate::db::queries::AuditLogEntry;
use crate::db::Database;
use crate::errors::{CoreError, CycleError, MatrixError, RangeError};
use crate::gate::{AccessGate, CycleSnapshot};
use crate::models::{
    Action, Area, AuditEntry, Gestion, GlobalPhase, Level, NewSubPhase, PhasePermission,
    PhaseSchedule, PhaseWithSchedule, Role, RolePermission, ScheduleInput, ScheduleStatus,
    SessionState, SubPhase, SubPhaseStatus,
};
use crate::permissions::{MatrixKind, PermissionGrid, PermissionMatrix};
use crate::schedule::{ScheduleAllocator, ScheduleConstraints};
use crate::subphase;

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// A global phase with its schedule and derived display status.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PhaseView {
    #[serde(flatten)]
    pub phase: GlobalPhase,
    pub schedule: Option<PhaseSchedule>,
    pub status: ScheduleStatus,
}

/// The phase matrix of the current cycle with its row and column catalogs.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseMatrixView {
    pub phases: Vec<GlobalPhase>,
    pub actions: Vec<Action>,
    pub cells: Vec<PhasePermission>,
}

/// The role matrix with its row and column catalogs.
#[derive(Debug, Clone, Serialize)]
pub struct RoleMatrixView {
    pub roles: Vec<Role>,
    pub actions: Vec<Action>,
    pub cells: Vec<RolePermission>,
}

/// A sub-phase together with the transition currently open to it.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SubPhaseView {
    #[serde(flatten)]
    pub sub_phase: SubPhase,
    pub available_transition: Option<SubPhaseStatus>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    policy: PolicyConfig,
}

impl Orchestrator {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>, policy: PolicyConfig) -> Self {
        Self { db, clock, policy }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    /// Today in the reference timezone.
    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    fn allocator(&self) -> ScheduleAllocator {
        ScheduleAllocator::new(self.today())
    }

    // -- snapshots & gate ---------------------------------------------------

    /// Read everything a gate decision needs in one pass.
    pub fn snapshot(&self) -> Result<CycleSnapshot, CoreError> {
        let gestion = self.db.current_gestion()?;
        let (phases, phase_cells) = match &gestion {
            Some(g) => (
                self.db.phases_with_schedules(g.id)?,
                self.db.phase_permissions(g.id)?,
            ),
            None => (Vec::new(), Vec::new()),
        };
        let role_cells = self.db.role_permissions()?;
        Ok(CycleSnapshot {
            gestion,
            phases,
            actions: self.db.list_actions()?,
            roles: self.db.list_roles()?,
            matrix: PermissionMatrix::new(&phase_cells, &role_cells),
        })
    }

    /// Build the access gate for a user's roles over `snapshot`.
    pub fn gate<'a>(&self, snapshot: &'a CycleSnapshot, roles: &[String]) -> AccessGate<'a> {
        AccessGate::new(snapshot, self.today(), roles, &self.policy.baseline_phases)
    }

    pub fn session_state(&self) -> Result<SessionState, CoreError> {
        let gestion = self.db.current_gestion()?;
        let phases = match &gestion {
            Some(g) => self.db.phases_with_schedules(g.id)?,
            None => Vec::new(),
        };
        Ok(crate::gate::session_state(
            gestion.as_ref(),
            &phases,
            &self.policy.baseline_phases,
        ))
    }

    // -- cycle --------------------------------------------------------------

    /// The current gestión, or [`CycleError::NoCurrentCycle`].
    pub fn current_gestion(&self) -> Result<Gestion, CoreError> {
        self.db
            .current_gestion()?
            .ok_or_else(|| CycleError::NoCurrentCycle.into())
    }

    pub fn list_gestiones(&self) -> Result<Vec<Gestion>, CoreError> {
        Ok(self.db.list_gestiones()?)
    }

    /// Create the gestión for `year`, seed its baseline phases and phase
    /// matrix, and optionally schedule its first phase.
    pub fn initialize_cycle(
        &self,
        year: i32,
        first_schedule: Option<ScheduleInput>,
        actor: Option<&str>,
    ) -> Result<Gestion, CoreError> {
        let result = self.try_initialize_cycle(year, first_schedule);
        let details = format!("year={}", year);
        self.record("cycle_initialized", actor, None, &details, &result);
        if let Ok(g) = &result {
            info!(year, gestion_id = g.id, "initialized new cycle");
        }
        result
    }

    fn try_initialize_cycle(
        &self,
        year: i32,
        first_schedule: Option<ScheduleInput>,
    ) -> Result<Gestion, CoreError> {
        if !(2000..=9999).contains(&year) {
            return Err(CycleError::InvalidValue {
                field: "year".into(),
                detail: format!("{} is not a plausible cycle year", year),
            }
            .into());
        }
        if let Some(window) = &first_schedule {
            // A fresh cycle has no scheduled neighbors.
            let constraints = ScheduleConstraints {
                min_start: self.today(),
                max_end: None,
            };
            self.allocator().validate(window, &constraints)?;
        }
        Ok(self.db.create_gestion(
            year,
            &self.policy.baseline_phase_names(),
            &self.policy.initial_phase_grants,
            first_schedule,
        )?)
    }

    /// Import enrolments and the phase matrix of the cycle for `from_year`
    /// into the current cycle.
    pub fn carry_over(
        &self,
        from_year: i32,
        actor: Option<&str>,
    ) -> Result<ImportReport, CoreError> {
        let current = self.current_gestion()?;
        let result = self.try_carry_over(from_year, &current);
        let details = format!("from={} to={}", from_year, current.year);
        self.record("cycle_imported", actor, Some(current.id), &details, &result);
        if let Ok(report) = &result {
            if !report.unmatched_phases.is_empty() {
                warn!(
                    phases = ?report.unmatched_phases,
                    "carry-over skipped phases with no counterpart"
                );
            }
        }
        result
    }

    fn try_carry_over(&self, from_year: i32, current: &Gestion) -> Result<ImportReport, CoreError> {
        let source = self
            .db
            .get_gestion_by_year(from_year)?
            .ok_or_else(|| CycleError::NotFound {
                entity: "gestion".into(),
                id: from_year.to_string(),
            })?;
        Ok(self.db.import_from_gestion(source.id, current.id)?)
    }

    // -- phases & schedules -------------------------------------------------

    /// Phases of the current cycle with schedules and derived status.
    pub fn phase_overview(&self) -> Result<Vec<PhaseView>, CoreError> {
        let gestion = self.current_gestion()?;
        let allocator = self.allocator();
        let views = self
            .db
            .phases_with_schedules(gestion.id)?
            .into_iter()
            .map(|p| PhaseView {
                status: allocator.derive_status(p.schedule.as_ref()),
                phase: p.phase,
                schedule: p.schedule,
            })
            .collect();
        Ok(views)
    }

    /// The phase whose window covers today, if any.
    pub fn active_phase(&self) -> Result<Option<GlobalPhase>, CoreError> {
        let Some(gestion) = self.db.current_gestion()? else {
            return Ok(None);
        };
        let phases = self.db.phases_with_schedules(gestion.id)?;
        Ok(self.allocator().current_active_phase(&phases).cloned())
    }

    /// Allowed date window for a phase of the current cycle.
    pub fn schedule_constraints(&self, phase_id: i64) -> Result<ScheduleConstraints, CoreError> {
        let (phase, all) = self.phase_in_current_cycle(phase_id)?;
        Ok(self.allocator().compute_constraints(&phase, &all))
    }

    fn phase_in_current_cycle(
        &self,
        phase_id: i64,
    ) -> Result<(GlobalPhase, Vec<PhaseWithSchedule>), CoreError> {
        let gestion = self.current_gestion()?;
        let all = self.db.phases_with_schedules(gestion.id)?;
        let phase = all
            .iter()
            .find(|p| p.phase.id == phase_id)
            .map(|p| p.phase.clone())
            .ok_or_else(|| CycleError::NotFound {
                entity: "global_phase".into(),
                id: phase_id.to_string(),
            })?;
        Ok((phase, all))
    }

    /// Validate and store the date window of a phase of the current cycle.
    pub fn schedule_phase(
        &self,
        phase_id: i64,
        input: ScheduleInput,
        actor: Option<&str>,
    ) -> Result<PhaseSchedule, CoreError> {
        let gestion = self.current_gestion()?;
        let allocator = self.allocator();
        let allow_finalized = self.policy.allow_reschedule_finalized;

        let result = self
            .db
            .save_schedule(phase_id, &input, |phase, all| {
                if phase.gestion_id != gestion.id {
                    return Err(CycleError::NotFound {
                        entity: "global_phase".into(),
                        id: phase_id.to_string(),
                    }
                    .into());
                }
                let existing = all
                    .iter()
                    .find(|p| p.phase.id == phase.id)
                    .and_then(|p| p.schedule.as_ref());
                if !allow_finalized
                    && allocator.derive_status(existing) == ScheduleStatus::Finalizada
                {
                    return Err(RangeError::PhaseFinalized {
                        phase: phase.name.clone(),
                    }
                    .into());
                }
                let constraints = allocator.compute_constraints(phase, all);
                allocator.validate(&input, &constraints)?;
                allocator.check_non_overlap(phase, &input, all)?;
                Ok(())
            })
            .map_err(CoreError::from);

        let details = format!(
            "phase_id={} start={} end={}",
            phase_id, input.start_date, input.end_date
        );
        self.record("schedule_saved", actor, Some(gestion.id), &details, &result);
        result
    }

    /// Append a global phase to the current cycle.
    pub fn add_global_phase(
        &self,
        code: &str,
        name: &str,
        actor: Option<&str>,
    ) -> Result<GlobalPhase, CoreError> {
        let gestion = self.current_gestion()?;
        let result = if code.trim().is_empty() {
            Err(CycleError::InvalidValue {
                field: "code".into(),
                detail: "phase code must not be empty".into(),
            }
            .into())
        } else {
            self.db
                .add_global_phase(gestion.id, code, name)
                .map_err(CoreError::from)
        };
        self.record("phase_added", actor, Some(gestion.id), &format!("code={}", code), &result);
        result
    }

    // -- permission matrices ------------------------------------------------

    pub fn phase_matrix(&self) -> Result<PhaseMatrixView, CoreError> {
        let gestion = self.current_gestion()?;
        let view = PhaseMatrixView {
            phases: self.db.global_phases(gestion.id)?,
            actions: self.db.list_actions()?,
            cells: self.db.phase_permissions(gestion.id)?,
        };
        self.report_integrity(
            MatrixKind::Phase,
            view.cells.iter().map(|c| (c.global_phase_id, c.action_id, c.enabled)),
            &view.phases.iter().map(|p| p.id).collect::<Vec<_>>(),
            &view.actions,
        );
        Ok(view)
    }

    pub fn role_matrix(&self) -> Result<RoleMatrixView, CoreError> {
        let view = RoleMatrixView {
            roles: self.db.list_roles()?,
            actions: self.db.list_actions()?,
            cells: self.db.role_permissions()?,
        };
        self.report_integrity(
            MatrixKind::Role,
            view.cells.iter().map(|c| (c.role_id, c.action_id, c.active)),
            &view.roles.iter().map(|r| r.id).collect::<Vec<_>>(),
            &view.actions,
        );
        Ok(view)
    }

    fn report_integrity(
        &self,
        kind: MatrixKind,
        cells: impl Iterator<Item = (i64, i64, bool)>,
        keys: &[i64],
        actions: &[Action],
    ) {
        let action_ids: Vec<i64> = actions.iter().map(|a| a.id).collect();
        if let Err(err) = PermissionGrid::new(kind, cells).check_integrity(keys, &action_ids) {
            warn!(error = %err, "permission matrix is not total; missing cells read as false");
        }
    }

    /// Atomically replace the phase matrix of the current cycle.
    pub fn replace_phase_matrix(
        &self,
        cells: &[PhasePermission],
        actor: Option<&str>,
    ) -> Result<usize, CoreError> {
        let gestion = self.current_gestion()?;
        let submitted: Vec<_> = cells
            .iter()
            .map(|c| (c.global_phase_id, c.action_id, c.enabled))
            .collect();
        let result = self
            .db
            .replace_phase_permissions(gestion.id, &submitted)
            .map_err(CoreError::from);
        let details = format!("submitted={}", cells.len());
        self.record("phase_matrix_replaced", actor, Some(gestion.id), &details, &result);
        result
    }

    /// Atomically replace the role matrix.
    pub fn replace_role_matrix(
        &self,
        cells: &[RolePermission],
        actor: Option<&str>,
    ) -> Result<usize, CoreError> {
        let gestion_id = self.db.current_gestion()?.map(|g| g.id);
        let submitted: Vec<_> = cells
            .iter()
            .map(|c| (c.role_id, c.action_id, c.active))
            .collect();
        let result = self
            .db
            .replace_role_permissions(&submitted)
            .map_err(CoreError::from);
        let details = format!("submitted={}", cells.len());
        self.record("role_matrix_replaced", actor, gestion_id, &details, &result);
        result
    }

    /// Insert `false` for every missing matrix cell. Returns cells added.
    pub fn backfill_matrices(&self) -> Result<usize, CoreError> {
        let added = self.db.backfill_matrices()?;
        if added > 0 {
            let err = MatrixError::Integrity {
                matrix: "phase_permissions+role_permissions".into(),
                missing: added,
            };
            warn!(error = %err, added, "backfilled missing permission cells with false");
        }
        Ok(added)
    }

    // -- catalogs -----------------------------------------------------------

    pub fn actions(&self) -> Result<Vec<Action>, CoreError> {
        Ok(self.db.list_actions()?)
    }

    pub fn roles(&self) -> Result<Vec<Role>, CoreError> {
        Ok(self.db.list_roles()?)
    }

    pub fn areas(&self) -> Result<Vec<Area>, CoreError> {
        Ok(self.db.list_areas()?)
    }

    pub fn levels(&self) -> Result<Vec<Level>, CoreError> {
        Ok(self.db.list_levels()?)
    }

    pub fn add_area(&self, name: &str) -> Result<Area, CoreError> {
        Ok(self.db.insert_area(name)?)
    }

    pub fn add_level(&self, name: &str) -> Result<Level, CoreError> {
        Ok(self.db.insert_level(name)?)
    }

    pub fn add_role(&self, name: &str, actor: Option<&str>) -> Result<Role, CoreError> {
        let result = self.db.insert_role(name).map_err(CoreError::from);
        self.record("role_added", actor, None, &format!("name={}", name), &result);
        result
    }

    pub fn add_action(
        &self,
        code: &str,
        name: &str,
        description: &str,
        actor: Option<&str>,
    ) -> Result<Action, CoreError> {
        let result = self
            .db
            .insert_action(code, name, description)
            .map_err(CoreError::from);
        self.record("action_added", actor, None, &format!("code={}", code), &result);
        result
    }

    // -- sub-phases ---------------------------------------------------------

    /// The (area, level) track of the current cycle, in order.
    pub fn sub_phases(&self, area_id: i64, level_id: i64) -> Result<Vec<SubPhaseView>, CoreError> {
        let gestion = self.current_gestion()?;
        let track = self.db.sub_phases(gestion.id, area_id, level_id)?;
        Ok(views_of(&track))
    }

    /// Every sub-phase of the current cycle.
    pub fn all_sub_phases(&self) -> Result<Vec<SubPhaseView>, CoreError> {
        let gestion = self.current_gestion()?;
        let all = self.db.list_sub_phases(gestion.id)?;
        Ok(views_of(&all))
    }

    pub fn create_sub_phase(
        &self,
        new: &NewSubPhase,
        actor: Option<&str>,
    ) -> Result<SubPhase, CoreError> {
        let gestion = self.current_gestion()?;
        let result = self
            .db
            .create_sub_phase(gestion.id, new)
            .map_err(CoreError::from);
        let details = format!(
            "area_id={} level_id={} name={}",
            new.area_id, new.level_id, new.name
        );
        self.record("sub_phase_created", actor, Some(gestion.id), &details, &result);
        result
    }

    /// Move a sub-phase to `target`, guarded and compare-and-swapped.
    pub fn change_sub_phase_status(
        &self,
        id: i64,
        target: SubPhaseStatus,
        actor: Option<&str>,
    ) -> Result<SubPhase, CoreError> {
        let gestion = self.current_gestion()?;
        let result = self
            .db
            .transition_sub_phase(gestion.id, id, target)
            .map_err(CoreError::from);
        let details = format!("sub_phase_id={} target={}", id, target);
        self.record("sub_phase_transition", actor, Some(gestion.id), &details, &result);
        if let Ok(sp) = &result {
            info!(sub_phase_id = id, name = %sp.name, status = %sp.status, "sub-phase moved");
        }
        result
    }

    pub fn update_progress(
        &self,
        id: i64,
        percent: u8,
        actor: Option<&str>,
    ) -> Result<SubPhase, CoreError> {
        let gestion = self.current_gestion()?;
        let result = self
            .db
            .update_sub_phase_progress(gestion.id, id, percent)
            .map_err(CoreError::from);
        let details = format!("sub_phase_id={} percent={}", id, percent);
        self.record("sub_phase_progress", actor, Some(gestion.id), &details, &result);
        result
    }

    // -- audit --------------------------------------------------------------

    pub fn audit_log(
        &self,
        limit: u32,
        action: Option<&str>,
    ) -> Result<Vec<AuditLogEntry>, CoreError> {
        Ok(self.db.list_audit_log(limit, action)?)
    }

    /// Record that the active phase changed from `previous` to `current`.
    pub fn record_phase_change(
        &self,
        previous: Option<&GlobalPhase>,
        current: Option<&GlobalPhase>,
    ) {
        let code = |p: Option<&GlobalPhase>| {
            p.map(|p| p.code.clone()).unwrap_or_else(|| "-".into())
        };
        let details = format!("from={} to={}", code(previous), code(current));
        let gestion_id = current.or(previous).map(|p| p.gestion_id);
        let entry = AuditEntry::success("phase_changed", None, &details);
        if let Err(e) = self.db.insert_audit_entry(&entry, gestion_id) {
            warn!(error = %e, "failed to write audit entry");
        }
    }

    fn record<T>(
        &self,
        action: &str,
        actor: Option<&str>,
        gestion_id: Option<i64>,
        details: &str,
        result: &Result<T, CoreError>,
    ) {
        let entry = match result {
            Ok(_) => AuditEntry::success(action, actor, details),
            Err(err) => {
                warn!(action, error = %err, "operation rejected");
                AuditEntry::failure(action, actor, &format!("{} error={}", details, err))
            }
        };
        if let Err(e) = self.db.insert_audit_entry(&entry, gestion_id) {
            warn!(error = %e, action, "failed to write audit entry");
        }
    }
}

fn views_of(sub_phases: &[SubPhase]) -> Vec<SubPhaseView> {
    sub_phases
        .iter()
        .map(|sp| SubPhaseView {
            sub_phase: sp.clone(),
            available_transition: subphase::available_transition(sp, sub_phases),
        })
        .collect()
}
