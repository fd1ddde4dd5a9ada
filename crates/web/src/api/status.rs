//! Status and health check endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;

use olimpiada_core::errors::{CoreError, CycleError, DatabaseError};
use olimpiada_core::gate::AccessDenied;
use olimpiada_core::models::SessionState;

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: String,
}

/// Cycle summary for dashboards.
#[derive(Serialize)]
struct StatusResponse {
    session_state: SessionState,
    year: Option<i32>,
    active_phase: Option<String>,
    today: String,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/status/health", get(health_check))
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn get_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusResponse>, AppError> {
    let orch = &state.orchestrator;
    let snapshot = orch.snapshot()?;
    let gate = orch.gate(&snapshot, &[]);

    Ok(Json(StatusResponse {
        session_state: gate.session_state(),
        year: snapshot.gestion.as_ref().map(|g| g.year),
        active_phase: gate.active_phase().map(|p| p.code.clone()),
        today: orch.today().to_string(),
    }))
}

// ---------------------------------------------------------------------------
// Shared error type for API handlers
// ---------------------------------------------------------------------------

/// API error type that converts to an Axum response.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Unauthorized(String),
    /// The access gate rejected the request.
    Forbidden(AccessDenied),
    Conflict(String, Option<Value>),
    /// A guard rejected the input; `detail` carries the computed bounds.
    Unprocessable(String, Option<Value>),
    Internal(String),
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        let message = err.to_string();
        match err {
            CoreError::Range(e) => AppError::Unprocessable(message, serde_json::to_value(e).ok()),
            CoreError::Matrix(e) => AppError::Unprocessable(message, serde_json::to_value(e).ok()),
            CoreError::Transition(e) => AppError::Conflict(message, serde_json::to_value(e).ok()),
            CoreError::Cycle(CycleError::NoCurrentCycle)
            | CoreError::Cycle(CycleError::DuplicateYear(_)) => AppError::Conflict(message, None),
            CoreError::Cycle(CycleError::NotFound { .. })
            | CoreError::Database(DatabaseError::NotFound { .. }) => AppError::NotFound(message),
            CoreError::Cycle(CycleError::InvalidValue { .. }) => AppError::BadRequest(message),
            CoreError::Config(_) | CoreError::Database(_) => AppError::Internal(message),
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, error_body(msg, None)),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, error_body(msg, None)),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, error_body(msg, None)),
            AppError::Forbidden(denied) => (
                StatusCode::FORBIDDEN,
                serde_json::json!({ "error": "access denied", "denied": denied }),
            ),
            AppError::Conflict(msg, detail) => (StatusCode::CONFLICT, error_body(msg, detail)),
            AppError::Unprocessable(msg, detail) => {
                (StatusCode::UNPROCESSABLE_ENTITY, error_body(msg, detail))
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error serving request");
                (StatusCode::INTERNAL_SERVER_ERROR, error_body(msg, None))
            }
        };
        (status, Json(body)).into_response()
    }
}

fn error_body(message: String, detail: Option<Value>) -> Value {
    match detail {
        Some(detail) => serde_json::json!({ "error": message, "detail": detail }),
        None => serde_json::json!({ "error": message }),
    }
}
