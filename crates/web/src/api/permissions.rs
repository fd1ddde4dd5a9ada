//! Phase and role permission matrix endpoints.
//!
//! Both matrices are read and replaced as a whole. A PUT body may omit
//! cells; omitted cells are stored as `false` so the persisted matrix stays
//! total.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use olimpiada_core::gate::{actions, RouteSpec};
use olimpiada_core::models::{PhasePermission, RolePermission};
use olimpiada_core::orchestrator::{PhaseMatrixView, RoleMatrixView};

use crate::api::auth::authorize;
use crate::api::status::AppError;
use crate::ws::publish;
use crate::AppState;

const MANAGE_PERMISSIONS: RouteSpec = RouteSpec::requires(actions::MANAGE_PERMISSIONS);

#[derive(Deserialize)]
pub struct PhaseMatrixUpdate {
    pub cells: Vec<PhasePermission>,
}

#[derive(Deserialize)]
pub struct RoleMatrixUpdate {
    pub cells: Vec<RolePermission>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/permissions/phases",
            get(get_phase_matrix).put(put_phase_matrix),
        )
        .route(
            "/api/permissions/roles",
            get(get_role_matrix).put(put_role_matrix),
        )
}

async fn get_phase_matrix(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<PhaseMatrixView>, AppError> {
    authorize(&state, &headers, MANAGE_PERMISSIONS).await?;
    Ok(Json(state.orchestrator.phase_matrix()?))
}

async fn put_phase_matrix(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PhaseMatrixUpdate>,
) -> Result<Json<PhaseMatrixView>, AppError> {
    let caller = authorize(&state, &headers, MANAGE_PERMISSIONS).await?;
    let orch = &state.orchestrator;
    orch.replace_phase_matrix(&body.cells, caller.actor())?;
    publish(
        &state.ws_broadcast,
        "permissions_changed",
        &serde_json::json!({ "matrix": "phase" }),
    );
    Ok(Json(orch.phase_matrix()?))
}

async fn get_role_matrix(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<RoleMatrixView>, AppError> {
    authorize(&state, &headers, MANAGE_PERMISSIONS).await?;
    Ok(Json(state.orchestrator.role_matrix()?))
}

async fn put_role_matrix(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<RoleMatrixUpdate>,
) -> Result<Json<RoleMatrixView>, AppError> {
    let caller = authorize(&state, &headers, MANAGE_PERMISSIONS).await?;
    let orch = &state.orchestrator;
    orch.replace_role_matrix(&body.cells, caller.actor())?;
    publish(
        &state.ws_broadcast,
        "permissions_changed",
        &serde_json::json!({ "matrix": "role" }),
    );
    Ok(Json(orch.role_matrix()?))
}
