//! Domain model types used throughout Olimpiada.
//!
//! These types bridge the decision components, the database layer, and the
//! web API.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Codes of the phases every cycle is seeded with, in order.
pub const BASELINE_PHASES: [(&str, &str); 3] = [
    ("CONFIGURACION", "Configuración"),
    ("EVALUACION", "Evaluación"),
    ("FINAL", "Final"),
];

// ---------------------------------------------------------------------------
// Gestión
// ---------------------------------------------------------------------------

/// One yearly run of the olympiad. Scopes every other entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Gestion {
    pub id: i64,
    pub year: i32,
    pub is_current: bool,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Global phases and schedules
// ---------------------------------------------------------------------------

/// A top-level, ordered stage of a cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GlobalPhase {
    pub id: i64,
    pub gestion_id: i64,
    pub code: String,
    pub name: String,
    pub order: u32,
}

/// The calendar window (cronograma) of a global phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhaseSchedule {
    pub id: i64,
    pub global_phase_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// A requested date window, before it has been validated and stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleInput {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// A phase together with its schedule, if one has been programmed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhaseWithSchedule {
    pub phase: GlobalPhase,
    pub schedule: Option<PhaseSchedule>,
}

/// Display state of a phase schedule. Derived from dates, never stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    SinConfigurar,
    Pendiente,
    Activa,
    Finalizada,
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SinConfigurar => write!(f, "SIN_CONFIGURAR"),
            Self::Pendiente => write!(f, "PENDIENTE"),
            Self::Activa => write!(f, "ACTIVA"),
            Self::Finalizada => write!(f, "FINALIZADA"),
        }
    }
}

// ---------------------------------------------------------------------------
// Catalogs
// ---------------------------------------------------------------------------

/// A system-level operation gated by role and active phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Action {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub description: String,
}

/// A user role (Admin, Responsable, Evaluador, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Role {
    pub id: i64,
    pub name: String,
}

/// A competition area (Matemática, Física, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Area {
    pub id: i64,
    pub name: String,
}

/// A competition level (Primero de secundaria, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Level {
    pub id: i64,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Permission cells
// ---------------------------------------------------------------------------

/// One (phase, action) cell of the phase permission matrix.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhasePermission {
    pub global_phase_id: i64,
    pub action_id: i64,
    pub enabled: bool,
}

/// One (role, action) cell of the role permission matrix.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RolePermission {
    pub role_id: i64,
    pub action_id: i64,
    pub active: bool,
}

// ---------------------------------------------------------------------------
// Sub-phases
// ---------------------------------------------------------------------------

/// Persisted status of a sub-phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubPhaseStatus {
    NoIniciada,
    EnEvaluacion,
    Finalizada,
}

impl SubPhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoIniciada => "NO_INICIADA",
            Self::EnEvaluacion => "EN_EVALUACION",
            Self::Finalizada => "FINALIZADA",
        }
    }
}

impl std::fmt::Display for SubPhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubPhaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NO_INICIADA" => Ok(Self::NoIniciada),
            "EN_EVALUACION" => Ok(Self::EnEvaluacion),
            "FINALIZADA" => Ok(Self::Finalizada),
            other => Err(format!("unknown sub-phase status '{}'", other)),
        }
    }
}

/// An ordered evaluation stage local to one (area, level) track.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubPhase {
    pub id: i64,
    pub area_id: i64,
    pub level_id: i64,
    pub name: String,
    pub order: u32,
    pub status: SubPhaseStatus,
    pub student_count: u32,
    pub evaluator_count: u32,
    pub progress_percent: u8,
}

/// Fields needed to append a sub-phase to a track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubPhase {
    pub area_id: i64,
    pub level_id: i64,
    pub name: String,
    #[serde(default)]
    pub student_count: u32,
    #[serde(default)]
    pub evaluator_count: u32,
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Whether the application can be entered, or which setup flow is forced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    NoCycle,
    AwaitingSchedule,
    Ready,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoCycle => write!(f, "NO_CYCLE"),
            Self::AwaitingSchedule => write!(f, "AWAITING_SCHEDULE"),
            Self::Ready => write!(f, "READY"),
        }
    }
}

// ---------------------------------------------------------------------------
// Audit Entry
// ---------------------------------------------------------------------------

/// An audit-log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub actor: Option<String>,
    pub details: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    /// Create a success audit entry.
    pub fn success(action: &str, actor: Option<&str>, details: &str) -> Self {
        Self {
            action: action.to_string(),
            actor: actor.map(str::to_string),
            details: details.to_string(),
            success: true,
            timestamp: Utc::now(),
        }
    }

    /// Create a failure audit entry.
    pub fn failure(action: &str, actor: Option<&str>, details: &str) -> Self {
        Self {
            action: action.to_string(),
            actor: actor.map(str::to_string),
            details: details.to_string(),
            success: false,
            timestamp: Utc::now(),
        }
    }
}
