//! Route-entry probe for the front end.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use olimpiada_core::gate::{AccessDenied, GateDecision};

use crate::api::auth::current_caller;
use crate::api::status::AppError;
use crate::AppState;

#[derive(Serialize)]
struct AccessResponse {
    action: String,
    allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    denied: Option<AccessDenied>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/access/:action", get(check_access))
}

/// Answers whether the caller could enter a route guarded by `action`.
/// Always 200; the decision is in the body.
async fn check_access(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(action): Path<String>,
) -> Result<Json<AccessResponse>, AppError> {
    let caller = current_caller(&state, &headers).await?;
    let snapshot = state.orchestrator.snapshot()?;
    let decision = state
        .orchestrator
        .gate(&snapshot, &caller.roles)
        .check_action(&action);

    let (allowed, denied) = match decision {
        GateDecision::Allowed => (true, None),
        GateDecision::Denied(denied) => (false, Some(denied)),
    };
    Ok(Json(AccessResponse {
        action,
        allowed,
        denied,
    }))
}
