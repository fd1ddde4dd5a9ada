//! Sub-phase track endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, patch};
use axum::{Json, Router};
use serde::Deserialize;

use olimpiada_core::gate::{actions, RouteSpec};
use olimpiada_core::models::{NewSubPhase, SubPhase, SubPhaseStatus};
use olimpiada_core::orchestrator::SubPhaseView;

use crate::api::auth::authorize;
use crate::api::status::AppError;
use crate::ws::publish;
use crate::AppState;

const VIEW: RouteSpec = RouteSpec::open();
const MANAGE_SUBPHASES: RouteSpec = RouteSpec::requires(actions::MANAGE_SUBPHASES);
const LOAD_GRADES: RouteSpec = RouteSpec::requires(actions::LOAD_GRADES);

#[derive(Deserialize)]
pub struct TrackQuery {
    pub area_id: Option<i64>,
    pub level_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct StatusChange {
    pub status: SubPhaseStatus,
}

#[derive(Deserialize)]
pub struct ProgressChange {
    pub progress_percent: u8,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/subphases", get(list_sub_phases).post(create_sub_phase))
        .route("/api/subphases/:id/status", patch(change_status))
        .route("/api/subphases/:id/progress", patch(update_progress))
}

async fn list_sub_phases(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<TrackQuery>,
) -> Result<Json<Vec<SubPhaseView>>, AppError> {
    authorize(&state, &headers, VIEW).await?;
    let orch = &state.orchestrator;
    let views = match (query.area_id, query.level_id) {
        (Some(area_id), Some(level_id)) => orch.sub_phases(area_id, level_id)?,
        (None, None) => orch.all_sub_phases()?,
        _ => {
            return Err(AppError::BadRequest(
                "area_id and level_id must be given together".into(),
            ))
        }
    };
    Ok(Json(views))
}

async fn create_sub_phase(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<NewSubPhase>,
) -> Result<Json<SubPhase>, AppError> {
    let caller = authorize(&state, &headers, MANAGE_SUBPHASES).await?;
    if body.name.trim().is_empty() {
        return Err(AppError::BadRequest("name must not be empty".into()));
    }
    let sp = state.orchestrator.create_sub_phase(&body, caller.actor())?;
    publish(&state.ws_broadcast, "sub_phase_changed", &sp);
    Ok(Json(sp))
}

async fn change_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<StatusChange>,
) -> Result<Json<SubPhase>, AppError> {
    let caller = authorize(&state, &headers, MANAGE_SUBPHASES).await?;
    let sp = state
        .orchestrator
        .change_sub_phase_status(id, body.status, caller.actor())?;
    publish(&state.ws_broadcast, "sub_phase_changed", &sp);
    Ok(Json(sp))
}

async fn update_progress(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<ProgressChange>,
) -> Result<Json<SubPhase>, AppError> {
    let caller = authorize(&state, &headers, LOAD_GRADES).await?;
    let sp = state
        .orchestrator
        .update_progress(id, body.progress_percent, caller.actor())?;
    publish(&state.ws_broadcast, "sub_phase_changed", &sp);
    Ok(Json(sp))
}
