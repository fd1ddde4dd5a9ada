//! Catalog endpoints: areas, levels, roles and actions.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use olimpiada_core::gate::{actions, RouteSpec};
use olimpiada_core::models::{Action, Area, Level, Role};

use crate::api::auth::{authorize, current_caller};
use crate::api::status::AppError;
use crate::AppState;

const MANAGE_CYCLE: RouteSpec = RouteSpec::requires(actions::MANAGE_CYCLE).during_setup();

#[derive(Serialize)]
struct CatalogResponse {
    areas: Vec<Area>,
    levels: Vec<Level>,
    roles: Vec<Role>,
    actions: Vec<Action>,
}

#[derive(Deserialize)]
pub struct NameRequest {
    pub name: String,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/catalog", get(get_catalog))
        .route("/api/catalog/areas", post(add_area))
        .route("/api/catalog/levels", post(add_level))
}

async fn get_catalog(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<CatalogResponse>, AppError> {
    current_caller(&state, &headers).await?;
    let orch = &state.orchestrator;
    Ok(Json(CatalogResponse {
        areas: orch.areas()?,
        levels: orch.levels()?,
        roles: orch.roles()?,
        actions: orch.actions()?,
    }))
}

async fn add_area(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<NameRequest>,
) -> Result<Json<Area>, AppError> {
    authorize(&state, &headers, MANAGE_CYCLE).await?;
    let name = non_empty(&body.name)?;
    Ok(Json(state.orchestrator.add_area(name)?))
}

async fn add_level(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<NameRequest>,
) -> Result<Json<Level>, AppError> {
    authorize(&state, &headers, MANAGE_CYCLE).await?;
    let name = non_empty(&body.name)?;
    Ok(Json(state.orchestrator.add_level(name)?))
}

fn non_empty(name: &str) -> Result<&str, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("name must not be empty".into()));
    }
    Ok(name)
}
