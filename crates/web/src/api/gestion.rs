//! Cycle (gestión) endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use olimpiada_core::carry_over::ImportReport;
use olimpiada_core::gate::{actions, RouteSpec};
use olimpiada_core::models::{Gestion, ScheduleInput, SessionState};

use crate::api::auth::authorize;
use crate::api::status::AppError;
use crate::ws::publish;
use crate::AppState;

const MANAGE_CYCLE: RouteSpec = RouteSpec::requires(actions::MANAGE_CYCLE).during_setup();

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct CreateGestionRequest {
    pub year: i32,
    /// Optional window for the first phase.
    pub first_schedule: Option<ScheduleInput>,
}

#[derive(Deserialize)]
pub struct CarryOverRequest {
    pub from_year: i32,
}

#[derive(Serialize)]
struct CurrentResponse {
    gestion: Option<Gestion>,
    session_state: SessionState,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/gestion", get(list_gestiones).post(create_gestion))
        .route("/api/gestion/current", get(current_gestion))
        .route("/api/gestion/carry-over", post(carry_over))
}

async fn current_gestion(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CurrentResponse>, AppError> {
    let snapshot = state.orchestrator.snapshot()?;
    let session_state = state.orchestrator.gate(&snapshot, &[]).session_state();
    Ok(Json(CurrentResponse {
        gestion: snapshot.gestion,
        session_state,
    }))
}

async fn list_gestiones(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Gestion>>, AppError> {
    Ok(Json(state.orchestrator.list_gestiones()?))
}

async fn create_gestion(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateGestionRequest>,
) -> Result<Json<Gestion>, AppError> {
    let caller = authorize(&state, &headers, MANAGE_CYCLE).await?;
    let gestion = state
        .orchestrator
        .initialize_cycle(body.year, body.first_schedule, caller.actor())?;
    publish(&state.ws_broadcast, "cycle_initialized", &gestion);
    Ok(Json(gestion))
}

async fn carry_over(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CarryOverRequest>,
) -> Result<Json<ImportReport>, AppError> {
    let caller = authorize(&state, &headers, MANAGE_CYCLE).await?;
    let report = state.orchestrator.carry_over(body.from_year, caller.actor())?;
    Ok(Json(report))
}
