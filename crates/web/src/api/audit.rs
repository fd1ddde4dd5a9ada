//! Audit log API endpoints.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use olimpiada_core::db::queries::AuditLogEntry;
use olimpiada_core::gate::{actions, RouteSpec};

use crate::api::auth::authorize;
use crate::api::status::AppError;
use crate::AppState;

#[derive(Deserialize)]
pub struct AuditQuery {
    pub limit: Option<u32>,
    /// Only entries with this action name.
    pub action: Option<String>,
}

#[derive(Serialize)]
struct AuditListResponse {
    entries: Vec<AuditLogEntry>,
    total: usize,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/audit", get(list_audit))
}

async fn list_audit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AuditQuery>,
) -> Result<Json<AuditListResponse>, AppError> {
    authorize(&state, &headers, RouteSpec::requires(actions::VIEW_AUDIT)).await?;
    let limit = query.limit.unwrap_or(50).min(500);

    let entries = state
        .orchestrator
        .audit_log(limit, query.action.as_deref())?;
    let total = entries.len();

    Ok(Json(AuditListResponse { entries, total }))
}
