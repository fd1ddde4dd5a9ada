//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The `schema_version`
//! user-version pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
/// Versions start at 1. The current schema version is stored in the SQLite
/// `user_version` pragma.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "initial schema",
        r#"
        CREATE TABLE IF NOT EXISTS gestion (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            year        INTEGER NOT NULL UNIQUE,
            is_current  INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT    NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_gestion_single_current
            ON gestion (is_current) WHERE is_current = 1;

        CREATE TABLE IF NOT EXISTS global_phase (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            gestion_id  INTEGER NOT NULL REFERENCES gestion (id) ON DELETE CASCADE,
            code        TEXT    NOT NULL,
            name        TEXT    NOT NULL,
            phase_order INTEGER NOT NULL CHECK (phase_order >= 1),
            UNIQUE (gestion_id, phase_order),
            UNIQUE (gestion_id, code)
        );

        CREATE TABLE IF NOT EXISTS phase_schedule (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            global_phase_id INTEGER NOT NULL UNIQUE REFERENCES global_phase (id) ON DELETE CASCADE,
            start_date      TEXT    NOT NULL,
            end_date        TEXT    NOT NULL,
            updated_at      TEXT    NOT NULL,
            CHECK (end_date >= start_date)
        );

        CREATE TABLE IF NOT EXISTS action (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            code        TEXT NOT NULL UNIQUE,
            name        TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS role (
            id      INTEGER PRIMARY KEY AUTOINCREMENT,
            name    TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS phase_permission (
            global_phase_id INTEGER NOT NULL REFERENCES global_phase (id) ON DELETE CASCADE,
            action_id       INTEGER NOT NULL REFERENCES action (id) ON DELETE CASCADE,
            enabled         INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (global_phase_id, action_id)
        );

        CREATE TABLE IF NOT EXISTS role_permission (
            role_id     INTEGER NOT NULL REFERENCES role (id) ON DELETE CASCADE,
            action_id   INTEGER NOT NULL REFERENCES action (id) ON DELETE CASCADE,
            active      INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (role_id, action_id)
        );

        CREATE TABLE IF NOT EXISTS area (
            id      INTEGER PRIMARY KEY AUTOINCREMENT,
            name    TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS level (
            id      INTEGER PRIMARY KEY AUTOINCREMENT,
            name    TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS gestion_area_level (
            gestion_id  INTEGER NOT NULL REFERENCES gestion (id) ON DELETE CASCADE,
            area_id     INTEGER NOT NULL REFERENCES area (id),
            level_id    INTEGER NOT NULL REFERENCES level (id),
            PRIMARY KEY (gestion_id, area_id, level_id)
        );

        CREATE TABLE IF NOT EXISTS sub_phase (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            gestion_id       INTEGER NOT NULL REFERENCES gestion (id) ON DELETE CASCADE,
            area_id          INTEGER NOT NULL REFERENCES area (id),
            level_id         INTEGER NOT NULL REFERENCES level (id),
            name             TEXT    NOT NULL,
            sub_order        INTEGER NOT NULL CHECK (sub_order >= 1),
            status           TEXT    NOT NULL DEFAULT 'NO_INICIADA'
                             CHECK (status IN ('NO_INICIADA', 'EN_EVALUACION', 'FINALIZADA')),
            student_count    INTEGER NOT NULL DEFAULT 0,
            evaluator_count  INTEGER NOT NULL DEFAULT 0,
            progress_percent INTEGER NOT NULL DEFAULT 0
                             CHECK (progress_percent BETWEEN 0 AND 100),
            updated_at       TEXT    NOT NULL,
            UNIQUE (gestion_id, area_id, level_id, sub_order)
        );

        CREATE INDEX IF NOT EXISTS idx_sub_phase_track
            ON sub_phase (gestion_id, area_id, level_id);

        CREATE TABLE IF NOT EXISTS audit_log (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            action      TEXT    NOT NULL,
            actor       TEXT,
            gestion_id  INTEGER,
            details     TEXT,
            success     INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_log_created_at ON audit_log (created_at);
        CREATE INDEX IF NOT EXISTS idx_audit_log_action ON audit_log (action);
        "#,
    ),
    (
        2,
        "seed action and role catalogs",
        r#"
        INSERT OR IGNORE INTO action (code, name, description) VALUES
            ('MANAGE_CYCLE',       'Gestionar gestión',      'Initialize a cycle and import a past one'),
            ('MANAGE_SCHEDULE',    'Configurar cronograma',  'Set the date window of global phases'),
            ('MANAGE_PERMISSIONS', 'Configurar permisos',    'Edit the phase and role permission matrices'),
            ('MANAGE_SUBPHASES',   'Configurar subfases',    'Create sub-phases and change their status'),
            ('REGISTER_STUDENT',   'Inscribir estudiantes',  'Register competitors in an area and level'),
            ('LOAD_GRADES',        'Cargar notas',           'Record evaluation grades and progress'),
            ('PUBLISH_RESULTS',    'Publicar resultados',    'Publish final results'),
            ('VIEW_AUDIT',         'Ver auditoría',          'Read the audit log');

        INSERT OR IGNORE INTO role (name) VALUES ('Admin'), ('Responsable'), ('Evaluador');

        INSERT OR IGNORE INTO role_permission (role_id, action_id, active)
        SELECT r.id, a.id,
               CASE
                   WHEN r.name = 'Admin' THEN 1
                   WHEN r.name = 'Responsable'
                        AND a.code IN ('MANAGE_SUBPHASES', 'REGISTER_STUDENT', 'PUBLISH_RESULTS') THEN 1
                   WHEN r.name = 'Evaluador' AND a.code = 'LOAD_GRADES' THEN 1
                   ELSE 0
               END
        FROM role r CROSS JOIN action a;
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

/// Read the current schema version from the SQLite `user_version` pragma.
pub fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Set the schema version via the SQLite `user_version` pragma.
fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
