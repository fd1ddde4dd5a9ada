//! Typed query helpers for every table in the Olimpiada database.
//!
//! Guarded writes (schedules, matrix replaces, sub-phase transitions) read
//! their inputs and write inside one transaction. Guard failures abort the
//! transaction as [`DatabaseError::Rejected`] before anything is written.

use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::debug;

use super::Database;
use crate::carry_over::{self, ImportReport, SourceCell};
use crate::errors::{CoreError, CycleError, DatabaseError, TransitionError};
use crate::models::{
    Action, Area, AuditEntry, Gestion, GlobalPhase, Level, NewSubPhase, PhasePermission,
    PhaseSchedule, PhaseWithSchedule, Role, RolePermission, ScheduleInput, SubPhase,
    SubPhaseStatus,
};
use crate::permissions::{self, Cell, MatrixKind};
use crate::subphase;

/// Storage format of calendar days.
const DATE_FORMAT: &str = "%Y-%m-%d";

const GESTION_COLUMNS: &str = "id, year, is_current, created_at";
const PHASE_COLUMNS: &str = "id, gestion_id, code, name, phase_order";
const SUB_PHASE_COLUMNS: &str = "id, area_id, level_id, name, sub_order, status, \
     student_count, evaluator_count, progress_percent, gestion_id";

// ---------------------------------------------------------------------------
// Domain structs returned by queries
// ---------------------------------------------------------------------------

/// A row from the `audit_log` table.
#[derive(Debug, Clone, Serialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub action: String,
    pub actor: Option<String>,
    pub gestion_id: Option<i64>,
    pub details: Option<String>,
    pub success: bool,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn map_gestion(row: &Row<'_>) -> rusqlite::Result<Gestion> {
    Ok(Gestion {
        id: row.get(0)?,
        year: row.get(1)?,
        is_current: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn map_phase(row: &Row<'_>) -> rusqlite::Result<GlobalPhase> {
    Ok(GlobalPhase {
        id: row.get(0)?,
        gestion_id: row.get(1)?,
        code: row.get(2)?,
        name: row.get(3)?,
        order: row.get(4)?,
    })
}

fn map_sub_phase(row: &Row<'_>) -> rusqlite::Result<SubPhase> {
    let status: String = row.get(5)?;
    Ok(SubPhase {
        id: row.get(0)?,
        area_id: row.get(1)?,
        level_id: row.get(2)?,
        name: row.get(3)?,
        order: row.get(4)?,
        status: status.parse::<SubPhaseStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, e.into())
        })?,
        student_count: row.get(6)?,
        evaluator_count: row.get(7)?,
        progress_percent: row.get(8)?,
    })
}

fn map_audit(row: &Row<'_>) -> rusqlite::Result<AuditLogEntry> {
    Ok(AuditLogEntry {
        id: row.get(0)?,
        action: row.get(1)?,
        actor: row.get(2)?,
        gestion_id: row.get(3)?,
        details: row.get(4)?,
        success: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn parse_date(idx: usize, raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn format_date(day: NaiveDate) -> String {
    day.format(DATE_FORMAT).to_string()
}

fn not_found(entity: &str, id: impl ToString) -> impl FnOnce(rusqlite::Error) -> DatabaseError {
    let entity = entity.to_string();
    let id = id.to_string();
    move |e| match e {
        rusqlite::Error::QueryReturnedNoRows => DatabaseError::NotFound { entity, id },
        other => other.into(),
    }
}

// ---------------------------------------------------------------------------
// Connection-level helpers (usable inside transactions)
// ---------------------------------------------------------------------------

fn current_gestion_in(conn: &Connection) -> Result<Option<Gestion>, DatabaseError> {
    let sql = format!("SELECT {} FROM gestion WHERE is_current = 1", GESTION_COLUMNS);
    Ok(conn.query_row(&sql, [], map_gestion).optional()?)
}

fn gestion_in(conn: &Connection, id: i64) -> Result<Gestion, DatabaseError> {
    let sql = format!("SELECT {} FROM gestion WHERE id = ?1", GESTION_COLUMNS);
    conn.query_row(&sql, params![id], map_gestion)
        .map_err(not_found("gestion", id))
}

fn phase_in(conn: &Connection, id: i64) -> Result<GlobalPhase, DatabaseError> {
    let sql = format!("SELECT {} FROM global_phase WHERE id = ?1", PHASE_COLUMNS);
    conn.query_row(&sql, params![id], map_phase)
        .map_err(not_found("global_phase", id))
}

fn phases_in(conn: &Connection, gestion_id: i64) -> Result<Vec<GlobalPhase>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM global_phase WHERE gestion_id = ?1 ORDER BY phase_order",
        PHASE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let phases = stmt
        .query_map(params![gestion_id], map_phase)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(phases)
}

fn phases_with_schedules_in(
    conn: &Connection,
    gestion_id: i64,
) -> Result<Vec<PhaseWithSchedule>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT p.id, p.gestion_id, p.code, p.name, p.phase_order,
                s.id, s.start_date, s.end_date
         FROM global_phase p
         LEFT JOIN phase_schedule s ON s.global_phase_id = p.id
         WHERE p.gestion_id = ?1
         ORDER BY p.phase_order",
    )?;
    let rows = stmt
        .query_map(params![gestion_id], |row| {
            let phase = map_phase(row)?;
            let schedule_id: Option<i64> = row.get(5)?;
            let schedule = match schedule_id {
                Some(id) => {
                    let start: String = row.get(6)?;
                    let end: String = row.get(7)?;
                    Some(PhaseSchedule {
                        id,
                        global_phase_id: phase.id,
                        start_date: parse_date(6, &start)?,
                        end_date: parse_date(7, &end)?,
                    })
                }
                None => None,
            };
            Ok(PhaseWithSchedule { phase, schedule })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn upsert_schedule_in(
    conn: &Connection,
    phase_id: i64,
    input: &ScheduleInput,
) -> Result<PhaseSchedule, DatabaseError> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO phase_schedule (global_phase_id, start_date, end_date, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(global_phase_id) DO UPDATE SET
            start_date = excluded.start_date,
            end_date = excluded.end_date,
            updated_at = excluded.updated_at",
        params![
            phase_id,
            format_date(input.start_date),
            format_date(input.end_date),
            now
        ],
    )?;
    let id: i64 = conn.query_row(
        "SELECT id FROM phase_schedule WHERE global_phase_id = ?1",
        params![phase_id],
        |row| row.get(0),
    )?;
    Ok(PhaseSchedule {
        id,
        global_phase_id: phase_id,
        start_date: input.start_date,
        end_date: input.end_date,
    })
}

fn actions_in(conn: &Connection) -> Result<Vec<Action>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT id, code, name, description FROM action ORDER BY id")?;
    let actions = stmt
        .query_map([], |row| {
            Ok(Action {
                id: row.get(0)?,
                code: row.get(1)?,
                name: row.get(2)?,
                description: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(actions)
}

fn ids_in(
    conn: &Connection,
    sql: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<i64>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map(args, |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(ids)
}

fn exists_in(
    conn: &Connection,
    sql: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<bool, DatabaseError> {
    Ok(conn.query_row(sql, args, |row| row.get(0))?)
}

fn sub_phase_in(conn: &Connection, id: i64) -> Result<(i64, SubPhase), DatabaseError> {
    let sql = format!("SELECT {} FROM sub_phase WHERE id = ?1", SUB_PHASE_COLUMNS);
    conn.query_row(&sql, params![id], |row| Ok((row.get(9)?, map_sub_phase(row)?)))
        .map_err(not_found("sub_phase", id))
}

/// A sub-phase that must belong to `gestion_id`; other cycles' rows are
/// reported as not found.
fn sub_phase_of_gestion_in(
    conn: &Connection,
    gestion_id: i64,
    id: i64,
) -> Result<SubPhase, DatabaseError> {
    match sub_phase_in(conn, id)? {
        (owner, sub_phase) if owner == gestion_id => Ok(sub_phase),
        _ => Err(DatabaseError::rejected(CycleError::NotFound {
            entity: "sub_phase".into(),
            id: id.to_string(),
        })),
    }
}

fn track_in(
    conn: &Connection,
    gestion_id: i64,
    area_id: i64,
    level_id: i64,
) -> Result<Vec<SubPhase>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM sub_phase
         WHERE gestion_id = ?1 AND area_id = ?2 AND level_id = ?3
         ORDER BY sub_order",
        SUB_PHASE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let track = stmt
        .query_map(params![gestion_id, area_id, level_id], map_sub_phase)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(track)
}

/// Insert `false` for every missing matrix cell. Returns cells added.
fn backfill_in(conn: &Connection) -> Result<usize, DatabaseError> {
    let phase_cells = conn.execute(
        "INSERT OR IGNORE INTO phase_permission (global_phase_id, action_id, enabled)
         SELECT p.id, a.id, 0 FROM global_phase p CROSS JOIN action a",
        [],
    )?;
    let role_cells = conn.execute(
        "INSERT OR IGNORE INTO role_permission (role_id, action_id, active)
         SELECT r.id, a.id, 0 FROM role r CROSS JOIN action a",
        [],
    )?;
    Ok(phase_cells + role_cells)
}

fn write_cells(conn: &Connection, kind: MatrixKind, cells: &[Cell]) -> Result<(), DatabaseError> {
    let sql = match kind {
        MatrixKind::Phase => {
            "INSERT INTO phase_permission (global_phase_id, action_id, enabled) VALUES (?1, ?2, ?3)
             ON CONFLICT(global_phase_id, action_id) DO UPDATE SET enabled = excluded.enabled"
        }
        MatrixKind::Role => {
            "INSERT INTO role_permission (role_id, action_id, active) VALUES (?1, ?2, ?3)
             ON CONFLICT(role_id, action_id) DO UPDATE SET active = excluded.active"
        }
    };
    let mut stmt = conn.prepare(sql)?;
    for (key, action_id, allowed) in cells {
        stmt.execute(params![key, action_id, allowed])?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    // -- gestion ------------------------------------------------------------

    /// The gestión marked as current, if any.
    pub fn current_gestion(&self) -> Result<Option<Gestion>, DatabaseError> {
        current_gestion_in(&self.conn())
    }

    pub fn get_gestion(&self, id: i64) -> Result<Gestion, DatabaseError> {
        gestion_in(&self.conn(), id)
    }

    pub fn get_gestion_by_year(&self, year: i32) -> Result<Option<Gestion>, DatabaseError> {
        let sql = format!("SELECT {} FROM gestion WHERE year = ?1", GESTION_COLUMNS);
        Ok(self.conn().query_row(&sql, params![year], map_gestion).optional()?)
    }

    /// All gestiones, most recent year first.
    pub fn list_gestiones(&self) -> Result<Vec<Gestion>, DatabaseError> {
        let conn = self.conn();
        let sql = format!("SELECT {} FROM gestion ORDER BY year DESC", GESTION_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], map_gestion)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Create a new current gestión with its seeded phases and phase matrix.
    ///
    /// The previous current gestión (if any) is demoted in the same
    /// transaction. Phase cells are `true` exactly for `initial_grants`.
    /// `first_schedule`, when given, is stored for the first phase; it must
    /// already have been validated by the caller.
    pub fn create_gestion(
        &self,
        year: i32,
        phases: &[(String, String)],
        initial_grants: &[String],
        first_schedule: Option<ScheduleInput>,
    ) -> Result<Gestion, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let gestion = self.transaction(|conn| {
            if exists_in(conn, "SELECT EXISTS(SELECT 1 FROM gestion WHERE year = ?1)", &[&year])? {
                return Err(DatabaseError::rejected(CycleError::DuplicateYear(year)));
            }
            conn.execute("UPDATE gestion SET is_current = 0 WHERE is_current = 1", [])?;
            conn.execute(
                "INSERT INTO gestion (year, is_current, created_at) VALUES (?1, 1, ?2)",
                params![year, now],
            )?;
            let gestion_id = conn.last_insert_rowid();

            let actions = actions_in(conn)?;
            let mut first_phase_id = None;
            for (idx, (code, name)) in phases.iter().enumerate() {
                conn.execute(
                    "INSERT INTO global_phase (gestion_id, code, name, phase_order)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![gestion_id, code, name, idx as u32 + 1],
                )?;
                let phase_id = conn.last_insert_rowid();
                if first_phase_id.is_none() {
                    first_phase_id = Some(phase_id);
                }
                let cells: Vec<Cell> = actions
                    .iter()
                    .map(|a| (phase_id, a.id, initial_grants.contains(&a.code)))
                    .collect();
                write_cells(conn, MatrixKind::Phase, &cells)?;
            }

            if let (Some(window), Some(phase_id)) = (first_schedule, first_phase_id) {
                upsert_schedule_in(conn, phase_id, &window)?;
            }

            Ok(Gestion {
                id: gestion_id,
                year,
                is_current: true,
                created_at: now.clone(),
            })
        })?;
        debug!(id = gestion.id, year, phases = phases.len(), "created gestion");
        Ok(gestion)
    }

    // -- global phases & schedules -----------------------------------------

    pub fn global_phases(&self, gestion_id: i64) -> Result<Vec<GlobalPhase>, DatabaseError> {
        phases_in(&self.conn(), gestion_id)
    }

    pub fn get_global_phase(&self, id: i64) -> Result<GlobalPhase, DatabaseError> {
        phase_in(&self.conn(), id)
    }

    /// Every phase of a gestión, ordered, each with its schedule if set.
    pub fn phases_with_schedules(
        &self,
        gestion_id: i64,
    ) -> Result<Vec<PhaseWithSchedule>, DatabaseError> {
        phases_with_schedules_in(&self.conn(), gestion_id)
    }

    /// Append a global phase at the next dense order and backfill its
    /// matrix row with `false`.
    pub fn add_global_phase(
        &self,
        gestion_id: i64,
        code: &str,
        name: &str,
    ) -> Result<GlobalPhase, DatabaseError> {
        let phase = self.transaction(|conn| {
            gestion_in(conn, gestion_id)?;
            if exists_in(
                conn,
                "SELECT EXISTS(SELECT 1 FROM global_phase WHERE gestion_id = ?1 AND code = ?2)",
                &[&gestion_id, &code],
            )? {
                return Err(DatabaseError::rejected(CycleError::InvalidValue {
                    field: "code".into(),
                    detail: format!("phase code '{}' already exists", code),
                }));
            }
            let order: u32 = conn.query_row(
                "SELECT COALESCE(MAX(phase_order), 0) + 1 FROM global_phase WHERE gestion_id = ?1",
                params![gestion_id],
                |row| row.get(0),
            )?;
            conn.execute(
                "INSERT INTO global_phase (gestion_id, code, name, phase_order)
                 VALUES (?1, ?2, ?3, ?4)",
                params![gestion_id, code, name, order],
            )?;
            let id = conn.last_insert_rowid();
            conn.execute(
                "INSERT OR IGNORE INTO phase_permission (global_phase_id, action_id, enabled)
                 SELECT ?1, id, 0 FROM action",
                params![id],
            )?;
            Ok(GlobalPhase {
                id,
                gestion_id,
                code: code.to_string(),
                name: name.to_string(),
                order,
            })
        })?;
        debug!(id = phase.id, code, order = phase.order, "added global phase");
        Ok(phase)
    }

    /// Store a schedule for `phase_id` after `check` accepts it.
    ///
    /// `check` sees the phase and every phase of its gestión as read inside
    /// the write transaction, so concurrent edits of neighbors cannot slip
    /// past it.
    pub fn save_schedule<F>(
        &self,
        phase_id: i64,
        input: &ScheduleInput,
        check: F,
    ) -> Result<PhaseSchedule, DatabaseError>
    where
        F: FnOnce(&GlobalPhase, &[PhaseWithSchedule]) -> Result<(), CoreError>,
    {
        let saved = self.transaction(|conn| {
            let phase = phase_in(conn, phase_id)?;
            let all = phases_with_schedules_in(conn, phase.gestion_id)?;
            check(&phase, &all).map_err(DatabaseError::rejected)?;
            upsert_schedule_in(conn, phase_id, input)
        })?;
        debug!(
            phase_id,
            start = %saved.start_date,
            end = %saved.end_date,
            "saved phase schedule"
        );
        Ok(saved)
    }

    // -- catalogs -----------------------------------------------------------

    pub fn list_actions(&self) -> Result<Vec<Action>, DatabaseError> {
        actions_in(&self.conn())
    }

    /// Add an action and backfill both matrices with `false` for it.
    pub fn insert_action(
        &self,
        code: &str,
        name: &str,
        description: &str,
    ) -> Result<Action, DatabaseError> {
        let action = self.transaction(|conn| {
            if exists_in(conn, "SELECT EXISTS(SELECT 1 FROM action WHERE code = ?1)", &[&code])? {
                return Err(DatabaseError::rejected(CycleError::InvalidValue {
                    field: "code".into(),
                    detail: format!("action code '{}' already exists", code),
                }));
            }
            conn.execute(
                "INSERT INTO action (code, name, description) VALUES (?1, ?2, ?3)",
                params![code, name, description],
            )?;
            let id = conn.last_insert_rowid();
            backfill_in(conn)?;
            Ok(Action {
                id,
                code: code.to_string(),
                name: name.to_string(),
                description: description.to_string(),
            })
        })?;
        debug!(id = action.id, code, "inserted action");
        Ok(action)
    }

    pub fn list_roles(&self) -> Result<Vec<Role>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, name FROM role ORDER BY id")?;
        let roles = stmt
            .query_map([], |row| {
                Ok(Role {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(roles)
    }

    /// Add a role and backfill its matrix row with `false`.
    pub fn insert_role(&self, name: &str) -> Result<Role, DatabaseError> {
        let role = self.transaction(|conn| {
            if exists_in(conn, "SELECT EXISTS(SELECT 1 FROM role WHERE name = ?1)", &[&name])? {
                return Err(DatabaseError::rejected(CycleError::InvalidValue {
                    field: "name".into(),
                    detail: format!("role '{}' already exists", name),
                }));
            }
            conn.execute("INSERT INTO role (name) VALUES (?1)", params![name])?;
            let id = conn.last_insert_rowid();
            backfill_in(conn)?;
            Ok(Role {
                id,
                name: name.to_string(),
            })
        })?;
        debug!(id = role.id, name, "inserted role");
        Ok(role)
    }

    pub fn list_areas(&self) -> Result<Vec<Area>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, name FROM area ORDER BY name")?;
        let areas = stmt
            .query_map([], |row| {
                Ok(Area {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(areas)
    }

    /// Insert an area, or return the existing one with the same name.
    pub fn insert_area(&self, name: &str) -> Result<Area, DatabaseError> {
        let conn = self.conn();
        conn.execute("INSERT OR IGNORE INTO area (name) VALUES (?1)", params![name])?;
        let id: i64 = conn.query_row("SELECT id FROM area WHERE name = ?1", params![name], |row| {
            row.get(0)
        })?;
        debug!(id, name, "upserted area");
        Ok(Area {
            id,
            name: name.to_string(),
        })
    }

    pub fn list_levels(&self) -> Result<Vec<Level>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, name FROM level ORDER BY name")?;
        let levels = stmt
            .query_map([], |row| {
                Ok(Level {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(levels)
    }

    /// Insert a level, or return the existing one with the same name.
    pub fn insert_level(&self, name: &str) -> Result<Level, DatabaseError> {
        let conn = self.conn();
        conn.execute("INSERT OR IGNORE INTO level (name) VALUES (?1)", params![name])?;
        let id: i64 = conn.query_row("SELECT id FROM level WHERE name = ?1", params![name], |row| {
            row.get(0)
        })?;
        debug!(id, name, "upserted level");
        Ok(Level {
            id,
            name: name.to_string(),
        })
    }

    /// `(area_id, level_id)` pairs competing in a gestión.
    pub fn list_enrolments(&self, gestion_id: i64) -> Result<Vec<(i64, i64)>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT area_id, level_id FROM gestion_area_level
             WHERE gestion_id = ?1 ORDER BY area_id, level_id",
        )?;
        let pairs = stmt
            .query_map(params![gestion_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pairs)
    }

    pub fn enrol_area_level(
        &self,
        gestion_id: i64,
        area_id: i64,
        level_id: i64,
    ) -> Result<(), DatabaseError> {
        self.conn().execute(
            "INSERT OR IGNORE INTO gestion_area_level (gestion_id, area_id, level_id)
             VALUES (?1, ?2, ?3)",
            params![gestion_id, area_id, level_id],
        )?;
        Ok(())
    }

    // -- permission matrices ------------------------------------------------

    /// Phase matrix cells for every phase of a gestión.
    pub fn phase_permissions(
        &self,
        gestion_id: i64,
    ) -> Result<Vec<PhasePermission>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT pp.global_phase_id, pp.action_id, pp.enabled
             FROM phase_permission pp
             JOIN global_phase p ON p.id = pp.global_phase_id
             WHERE p.gestion_id = ?1
             ORDER BY p.phase_order, pp.action_id",
        )?;
        let cells = stmt
            .query_map(params![gestion_id], |row| {
                Ok(PhasePermission {
                    global_phase_id: row.get(0)?,
                    action_id: row.get(1)?,
                    enabled: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(cells)
    }

    pub fn role_permissions(&self) -> Result<Vec<RolePermission>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT role_id, action_id, active FROM role_permission ORDER BY role_id, action_id",
        )?;
        let cells = stmt
            .query_map([], |row| {
                Ok(RolePermission {
                    role_id: row.get(0)?,
                    action_id: row.get(1)?,
                    active: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(cells)
    }

    /// Atomically replace the phase matrix of a gestión.
    ///
    /// The submission is expanded to the full cross product (absent cells
    /// become `false`) against the catalogs as read inside the transaction.
    /// Returns the number of cells written.
    pub fn replace_phase_permissions(
        &self,
        gestion_id: i64,
        submitted: &[Cell],
    ) -> Result<usize, DatabaseError> {
        let written = self.transaction(|conn| {
            let keys = ids_in(
                conn,
                "SELECT id FROM global_phase WHERE gestion_id = ?1 ORDER BY phase_order",
                &[&gestion_id],
            )?;
            let actions = ids_in(conn, "SELECT id FROM action ORDER BY id", &[])?;
            let full = permissions::materialize(MatrixKind::Phase, &keys, &actions, submitted)
                .map_err(DatabaseError::rejected)?;
            conn.execute(
                "DELETE FROM phase_permission
                 WHERE global_phase_id IN (SELECT id FROM global_phase WHERE gestion_id = ?1)",
                params![gestion_id],
            )?;
            write_cells(conn, MatrixKind::Phase, &full)?;
            Ok(full.len())
        })?;
        debug!(gestion_id, written, "replaced phase permission matrix");
        Ok(written)
    }

    /// Atomically replace the role matrix. Same contract as
    /// [`replace_phase_permissions`](Self::replace_phase_permissions).
    pub fn replace_role_permissions(&self, submitted: &[Cell]) -> Result<usize, DatabaseError> {
        let written = self.transaction(|conn| {
            let keys = ids_in(conn, "SELECT id FROM role ORDER BY id", &[])?;
            let actions = ids_in(conn, "SELECT id FROM action ORDER BY id", &[])?;
            let full = permissions::materialize(MatrixKind::Role, &keys, &actions, submitted)
                .map_err(DatabaseError::rejected)?;
            conn.execute("DELETE FROM role_permission", [])?;
            write_cells(conn, MatrixKind::Role, &full)?;
            Ok(full.len())
        })?;
        debug!(written, "replaced role permission matrix");
        Ok(written)
    }

    /// Insert `false` for every missing cell of both matrices.
    pub fn backfill_matrices(&self) -> Result<usize, DatabaseError> {
        let added = self.transaction(backfill_in)?;
        debug!(added, "backfilled permission matrices");
        Ok(added)
    }

    // -- sub-phases ---------------------------------------------------------

    /// The ordered track of one (area, level) pair.
    pub fn sub_phases(
        &self,
        gestion_id: i64,
        area_id: i64,
        level_id: i64,
    ) -> Result<Vec<SubPhase>, DatabaseError> {
        track_in(&self.conn(), gestion_id, area_id, level_id)
    }

    /// Every sub-phase of a gestión, grouped by track.
    pub fn list_sub_phases(&self, gestion_id: i64) -> Result<Vec<SubPhase>, DatabaseError> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM sub_phase WHERE gestion_id = ?1
             ORDER BY area_id, level_id, sub_order",
            SUB_PHASE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![gestion_id], map_sub_phase)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_sub_phase(&self, id: i64) -> Result<SubPhase, DatabaseError> {
        sub_phase_in(&self.conn(), id).map(|(_, sub_phase)| sub_phase)
    }

    /// Append a sub-phase to its track at the next order and enrol the
    /// (area, level) pair in the gestión.
    pub fn create_sub_phase(
        &self,
        gestion_id: i64,
        new: &NewSubPhase,
    ) -> Result<SubPhase, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let created = self.transaction(|conn| {
            if new.name.trim().is_empty() {
                return Err(DatabaseError::rejected(CycleError::InvalidValue {
                    field: "name".into(),
                    detail: "sub-phase name must not be empty".into(),
                }));
            }
            if !exists_in(
                conn,
                "SELECT EXISTS(SELECT 1 FROM area WHERE id = ?1)",
                &[&new.area_id],
            )? {
                return Err(DatabaseError::rejected(CycleError::NotFound {
                    entity: "area".into(),
                    id: new.area_id.to_string(),
                }));
            }
            if !exists_in(
                conn,
                "SELECT EXISTS(SELECT 1 FROM level WHERE id = ?1)",
                &[&new.level_id],
            )? {
                return Err(DatabaseError::rejected(CycleError::NotFound {
                    entity: "level".into(),
                    id: new.level_id.to_string(),
                }));
            }

            let track = track_in(conn, gestion_id, new.area_id, new.level_id)?;
            let order = subphase::next_order(&track);
            conn.execute(
                "INSERT INTO sub_phase (gestion_id, area_id, level_id, name, sub_order, status,
                                        student_count, evaluator_count, progress_percent, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9)",
                params![
                    gestion_id,
                    new.area_id,
                    new.level_id,
                    new.name,
                    order,
                    SubPhaseStatus::NoIniciada.as_str(),
                    new.student_count,
                    new.evaluator_count,
                    now
                ],
            )?;
            let id = conn.last_insert_rowid();
            conn.execute(
                "INSERT OR IGNORE INTO gestion_area_level (gestion_id, area_id, level_id)
                 VALUES (?1, ?2, ?3)",
                params![gestion_id, new.area_id, new.level_id],
            )?;
            Ok(SubPhase {
                id,
                area_id: new.area_id,
                level_id: new.level_id,
                name: new.name.clone(),
                order,
                status: SubPhaseStatus::NoIniciada,
                student_count: new.student_count,
                evaluator_count: new.evaluator_count,
                progress_percent: 0,
            })
        })?;
        debug!(id = created.id, order = created.order, "created sub-phase");
        Ok(created)
    }

    /// Move a sub-phase to `target` with compare-and-swap on its status.
    ///
    /// The guard is re-evaluated against the track as read inside the
    /// transaction; the update only applies if the persisted status still
    /// equals the one the guard saw.
    pub fn transition_sub_phase(
        &self,
        gestion_id: i64,
        id: i64,
        target: SubPhaseStatus,
    ) -> Result<SubPhase, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let (from, next) = self.transaction(|conn| {
            let current = sub_phase_of_gestion_in(conn, gestion_id, id)?;
            let track = track_in(conn, gestion_id, current.area_id, current.level_id)?;
            let next = subphase::transition(&current, &track, target)
                .map_err(DatabaseError::rejected)?;

            let changed = conn.execute(
                "UPDATE sub_phase SET status = ?1, progress_percent = ?2, updated_at = ?3
                 WHERE id = ?4 AND status = ?5",
                params![
                    next.status.as_str(),
                    next.progress_percent,
                    now,
                    id,
                    current.status.as_str()
                ],
            )?;
            if changed == 0 {
                return Err(DatabaseError::rejected(TransitionError::StaleStatus {
                    sub_phase: current.name.clone(),
                    expected: current.status.to_string(),
                }));
            }
            Ok((current.status, next))
        })?;
        debug!(id, %from, to = %next.status, "sub-phase status updated");
        Ok(next)
    }

    /// Record evaluation progress. Finalized sub-phases are frozen at 100.
    pub fn update_sub_phase_progress(
        &self,
        gestion_id: i64,
        id: i64,
        percent: u8,
    ) -> Result<SubPhase, DatabaseError> {
        if percent > subphase::FINALIZED_PROGRESS {
            return Err(DatabaseError::rejected(CycleError::InvalidValue {
                field: "progress_percent".into(),
                detail: format!("{} is not within 0..=100", percent),
            }));
        }
        let now = Utc::now().to_rfc3339();
        let updated = self.transaction(|conn| {
            let mut current = sub_phase_of_gestion_in(conn, gestion_id, id)?;
            if current.status == SubPhaseStatus::Finalizada {
                return Err(DatabaseError::rejected(CycleError::InvalidValue {
                    field: "progress_percent".into(),
                    detail: format!("sub-phase '{}' is already finalized", current.name),
                }));
            }
            conn.execute(
                "UPDATE sub_phase SET progress_percent = ?1, updated_at = ?2
                 WHERE id = ?3 AND status != 'FINALIZADA'",
                params![percent, now, id],
            )?;
            current.progress_percent = percent;
            Ok(current)
        })?;
        debug!(id, percent, "sub-phase progress updated");
        Ok(updated)
    }

    // -- carry-over ---------------------------------------------------------

    /// Copy enrolments and phase permissions of `from_gestion_id` into
    /// `to_gestion_id`, matching phases and actions by code.
    pub fn import_from_gestion(
        &self,
        from_gestion_id: i64,
        to_gestion_id: i64,
    ) -> Result<ImportReport, DatabaseError> {
        let report = self.transaction(|conn| {
            if from_gestion_id == to_gestion_id {
                return Err(DatabaseError::rejected(CycleError::InvalidValue {
                    field: "from".into(),
                    detail: "cannot import a cycle into itself".into(),
                }));
            }
            let from = gestion_in(conn, from_gestion_id)?;
            let to = gestion_in(conn, to_gestion_id)?;

            let enrolments_copied = conn.execute(
                "INSERT OR IGNORE INTO gestion_area_level (gestion_id, area_id, level_id)
                 SELECT ?1, area_id, level_id FROM gestion_area_level WHERE gestion_id = ?2",
                params![to.id, from.id],
            )?;

            let source = {
                let mut stmt = conn.prepare(
                    "SELECT p.code, a.code, pp.enabled
                     FROM phase_permission pp
                     JOIN global_phase p ON p.id = pp.global_phase_id
                     JOIN action a ON a.id = pp.action_id
                     WHERE p.gestion_id = ?1
                     ORDER BY p.phase_order, a.id",
                )?;
                let rows = stmt
                    .query_map(params![from.id], |row| {
                        Ok(SourceCell {
                            phase_code: row.get(0)?,
                            action_code: row.get(1)?,
                            enabled: row.get(2)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };

            let plan = carry_over::plan_phase_matrix(
                &source,
                &phases_in(conn, to.id)?,
                &actions_in(conn)?,
            );
            write_cells(conn, MatrixKind::Phase, &plan.cells)?;

            Ok(ImportReport {
                from_year: from.year,
                to_year: to.year,
                enrolments_copied,
                permissions_copied: plan.cells.len(),
                unmatched_phases: plan.unmatched_phases,
                unmatched_actions: plan.unmatched_actions,
            })
        })?;
        debug!(
            from = report.from_year,
            to = report.to_year,
            enrolments = report.enrolments_copied,
            permissions = report.permissions_copied,
            "imported past cycle"
        );
        Ok(report)
    }

    // -- audit_log ----------------------------------------------------------

    /// Insert an audit entry from a model struct.
    pub fn insert_audit_entry(
        &self,
        entry: &AuditEntry,
        gestion_id: Option<i64>,
    ) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO audit_log (action, actor, gestion_id, details, success, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.action,
                entry.actor,
                gestion_id,
                entry.details,
                entry.success,
                entry.timestamp.to_rfc3339()
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, action = %entry.action, "inserted audit_log entry");
        Ok(id)
    }

    /// Recent audit entries, newest first, optionally filtered by action.
    pub fn list_audit_log(
        &self,
        limit: u32,
        action: Option<&str>,
    ) -> Result<Vec<AuditLogEntry>, DatabaseError> {
        let conn = self.conn();
        let entries = match action {
            Some(act) => {
                let mut stmt = conn.prepare(
                    "SELECT id, action, actor, gestion_id, details, success, created_at
                     FROM audit_log WHERE action = ?1 ORDER BY id DESC LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(params![act, limit], map_audit)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, action, actor, gestion_id, details, success, created_at
                     FROM audit_log ORDER BY id DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map(params![limit], map_audit)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(entries)
    }

    /// Count total audit-log entries.
    pub fn count_audit_log(&self) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;
        Ok(count)
    }
}
