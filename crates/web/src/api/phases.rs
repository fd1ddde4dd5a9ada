//! Global phase and schedule (cronograma) endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use olimpiada_core::gate::{actions, RouteSpec};
use olimpiada_core::models::{GlobalPhase, PhaseSchedule, ScheduleInput};
use olimpiada_core::orchestrator::PhaseView;
use olimpiada_core::schedule::ScheduleConstraints;

use crate::api::auth::{authorize, current_caller};
use crate::api::status::AppError;
use crate::ws::publish;
use crate::AppState;

const MANAGE_SCHEDULE: RouteSpec = RouteSpec::requires(actions::MANAGE_SCHEDULE).during_setup();
const MANAGE_CYCLE: RouteSpec = RouteSpec::requires(actions::MANAGE_CYCLE).during_setup();

#[derive(Deserialize)]
pub struct NewPhaseRequest {
    pub code: String,
    pub name: String,
}

#[derive(Serialize)]
struct ScheduleSaved {
    schedule: PhaseSchedule,
    phases: Vec<PhaseView>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/phases", get(list_phases).post(add_phase))
        .route("/api/phases/:id/constraints", get(get_constraints))
        .route("/api/phases/:id/schedule", put(save_schedule))
}

async fn list_phases(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<PhaseView>>, AppError> {
    current_caller(&state, &headers).await?;
    Ok(Json(state.orchestrator.phase_overview()?))
}

async fn add_phase(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<NewPhaseRequest>,
) -> Result<Json<GlobalPhase>, AppError> {
    let caller = authorize(&state, &headers, MANAGE_CYCLE).await?;
    let phase = state
        .orchestrator
        .add_global_phase(&body.code, &body.name, caller.actor())?;
    Ok(Json(phase))
}

async fn get_constraints(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ScheduleConstraints>, AppError> {
    authorize(&state, &headers, MANAGE_SCHEDULE).await?;
    Ok(Json(state.orchestrator.schedule_constraints(id)?))
}

async fn save_schedule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<ScheduleInput>,
) -> Result<Json<ScheduleSaved>, AppError> {
    let caller = authorize(&state, &headers, MANAGE_SCHEDULE).await?;
    let orch = &state.orchestrator;
    let schedule = orch.schedule_phase(id, body, caller.actor())?;
    let phases = orch.phase_overview()?;
    publish(&state.ws_broadcast, "schedule_saved", &schedule);
    Ok(Json(ScheduleSaved { schedule, phases }))
}
