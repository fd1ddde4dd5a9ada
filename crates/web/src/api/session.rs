//! What the current user may do right now.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use olimpiada_core::models::{GlobalPhase, SessionState};

use crate::api::auth::current_caller;
use crate::api::status::AppError;
use crate::AppState;

#[derive(Serialize)]
struct SessionResponse {
    username: Option<String>,
    roles: Vec<String>,
    session_state: SessionState,
    active_phase: Option<GlobalPhase>,
    /// Action codes the user may exercise today.
    enabled_actions: Vec<String>,
    today: String,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/session", get(get_session))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<SessionResponse>, AppError> {
    let caller = current_caller(&state, &headers).await?;
    let orch = &state.orchestrator;
    let snapshot = orch.snapshot()?;
    let gate = orch.gate(&snapshot, &caller.roles);

    Ok(Json(SessionResponse {
        session_state: gate.session_state(),
        active_phase: gate.active_phase().cloned(),
        enabled_actions: gate.enabled_actions(),
        today: orch.today().to_string(),
        username: caller.username,
        roles: caller.roles,
    }))
}
