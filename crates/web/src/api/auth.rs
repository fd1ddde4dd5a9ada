//! Authentication endpoints (password sessions carrying roles) and the
//! per-request access guard.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::routing::post;
use axum::{Json, Router};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use olimpiada_core::gate::{GateDecision, RouteSpec};

use crate::api::status::AppError;
use crate::{AppState, Session};

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    token: String,
    username: String,
    roles: Vec<String>,
    expires_at: String,
}

#[derive(Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

/// The identity behind a request.
#[derive(Debug, Clone)]
pub struct Caller {
    /// `None` when authentication is disabled.
    pub username: Option<String>,
    pub roles: Vec<String>,
}

impl Caller {
    pub fn actor(&self) -> Option<&str> {
        self.username.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/verify", post(verify))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    if !state.config.web.auth_enabled() {
        return Err(AppError::BadRequest(
            "authentication is not configured (no users defined)".into(),
        ));
    }

    // Every configured user is compared so the response time does not
    // reveal which usernames exist.
    let mut matched = None;
    for user in &state.config.web.users {
        let expected = user.password.as_deref().unwrap_or("");
        let name_ok = user.username.as_bytes().ct_eq(body.username.as_bytes());
        let pass_ok = expected.as_bytes().ct_eq(body.password.as_bytes());
        if bool::from(name_ok & pass_ok) && !expected.is_empty() {
            matched = Some(user);
        }
    }

    let Some(user) = matched else {
        tracing::warn!(username = %body.username, "failed login attempt");
        return Err(AppError::Unauthorized("invalid username or password".into()));
    };

    let token = Uuid::new_v4().to_string();
    let ttl = i64::try_from(state.config.web.session_ttl_hours).unwrap_or(i64::MAX / 3600);
    let expires_at = Utc::now() + Duration::hours(ttl);

    {
        let mut sessions = state.sessions.write().await;
        sessions.insert(
            token.clone(),
            Session {
                username: user.username.clone(),
                roles: user.roles.clone(),
                expires_at,
            },
        );
    }
    tracing::info!(username = %user.username, "user logged in");

    Ok(Json(LoginResponse {
        token,
        username: user.username.clone(),
        roles: user.roles.clone(),
        expires_at: expires_at.to_rfc3339(),
    }))
}

async fn logout(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TokenRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut sessions = state.sessions.write().await;
    sessions.remove(&body.token);

    Ok(Json(serde_json::json!({
        "ok": true,
        "message": "logged out",
    })))
}

async fn verify(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TokenRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let sessions = state.sessions.read().await;

    if let Some(session) = sessions.get(&body.token) {
        if session.expires_at > Utc::now() {
            return Ok(Json(serde_json::json!({
                "valid": true,
                "username": session.username,
                "roles": session.roles,
                "expires_at": session.expires_at.to_rfc3339(),
            })));
        }
    }

    Ok(Json(serde_json::json!({
        "valid": false,
    })))
}

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

/// Resolve the caller from a bearer token.
///
/// When no users are configured every request is anonymous and carries
/// `web.anonymous_roles`. Expired sessions are pruned on the way.
pub async fn validate_session(
    state: &Arc<AppState>,
    auth_header: Option<&str>,
) -> Result<Caller, AppError> {
    if !state.config.web.auth_enabled() {
        return Ok(Caller {
            username: None,
            roles: state.config.web.anonymous_roles.clone(),
        });
    }

    let token = auth_header
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("missing or invalid Authorization header".into()))?;

    session_for_token(state, token)
        .await
        .ok_or_else(|| AppError::Unauthorized("session expired or invalid".into()))
}

/// Look up a live session by token, pruning expired ones.
pub async fn session_for_token(state: &Arc<AppState>, token: &str) -> Option<Caller> {
    let now = Utc::now();
    let mut sessions = state.sessions.write().await;
    sessions.retain(|_, s| s.expires_at > now);
    sessions.get(token).map(|s| Caller {
        username: Some(s.username.clone()),
        roles: s.roles.clone(),
    })
}

/// Authenticate the request and run the access gate for `route`.
///
/// Returns 401 for a missing session and 403 with the denial details when
/// the gate says no.
pub async fn authorize(
    state: &Arc<AppState>,
    headers: &HeaderMap,
    route: RouteSpec,
) -> Result<Caller, AppError> {
    let caller = current_caller(state, headers).await?;
    let snapshot = state.orchestrator.snapshot()?;
    match state.orchestrator.gate(&snapshot, &caller.roles).check(&route) {
        GateDecision::Allowed => Ok(caller),
        GateDecision::Denied(denied) => Err(AppError::Forbidden(denied)),
    }
}

/// Authenticate the request without an action check.
pub async fn current_caller(
    state: &Arc<AppState>,
    headers: &HeaderMap,
) -> Result<Caller, AppError> {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    validate_session(state, auth).await
}
