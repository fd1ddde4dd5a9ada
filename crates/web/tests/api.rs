//! HTTP-level tests for the REST API, driven through `tower::ServiceExt::oneshot`
//! against an in-memory database and a frozen clock.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::NaiveDate;
use serde_json::{json, Value};
use tower::ServiceExt;

use olimpiada_core::config::{AppConfig, UserConfig};
use olimpiada_core::{Database, FixedClock, Orchestrator};
use olimpiada_web::{router, AppState};

// ===========================================================================
// Helpers
// ===========================================================================

const TODAY: &str = "2025-01-10";

fn state_with(config: AppConfig) -> Arc<AppState> {
    let db = Database::in_memory().expect("in-memory db");
    db.initialize().expect("migrate");
    let today = NaiveDate::parse_from_str(TODAY, "%Y-%m-%d").unwrap();
    let orch = Orchestrator::new(
        Arc::new(db),
        Arc::new(FixedClock(today)),
        config.policy.clone(),
    );
    Arc::new(AppState::new(config, Arc::new(orch)))
}

/// No users configured: every request is an anonymous Admin.
fn anonymous_admin() -> Arc<AppState> {
    let mut config = AppConfig::default();
    config.web.anonymous_roles = vec!["Admin".into()];
    state_with(config)
}

fn with_users() -> Arc<AppState> {
    let mut config = AppConfig::default();
    config.web.users = vec![
        UserConfig {
            username: "admin".into(),
            password_env: "OLIMPIADA_ADMIN_PASSWORD".into(),
            roles: vec!["Admin".into()],
            password: Some("s3cret".into()),
        },
        UserConfig {
            username: "eva".into(),
            password_env: "OLIMPIADA_EVA_PASSWORD".into(),
            roles: vec!["Evaluador".into()],
            password: Some("grades".into()),
        },
    ];
    state_with(config)
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header("authorization", format!("Bearer {}", token));
    }
    let req = match body {
        Some(body) => req
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

/// Create the 2025 cycle and schedule all three baseline phases so the
/// session is READY with CONFIGURACION active on `TODAY`.
async fn make_ready(app: &Router, token: Option<&str>) {
    let (status, _) = call(
        app,
        "POST",
        "/api/gestion",
        token,
        Some(json!({
            "year": 2025,
            "first_schedule": { "start_date": "2025-01-10", "end_date": "2025-01-31" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, phases) = call(app, "GET", "/api/phases", token, None).await;
    let windows = [("2025-02-01", "2025-02-28"), ("2025-03-01", "2025-03-31")];
    for (phase, (start, end)) in phases.as_array().unwrap()[1..].iter().zip(windows) {
        let uri = format!("/api/phases/{}/schedule", phase["id"]);
        let (status, body) = call(
            app,
            "PUT",
            &uri,
            token,
            Some(json!({ "start_date": start, "end_date": end })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn test_health() {
    let app = router(anonymous_admin());
    let (status, body) = call(&app, "GET", "/api/status/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn test_setup_flow_gates_regular_routes() {
    let app = router(anonymous_admin());

    let (_, session) = call(&app, "GET", "/api/session", None, None).await;
    assert_eq!(session["session_state"], "NO_CYCLE");

    let (status, _) = call(
        &app,
        "POST",
        "/api/gestion",
        None,
        Some(json!({ "year": 2025 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Phases exist but none is scheduled yet.
    let (status, body) = call(&app, "GET", "/api/subphases", None, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["denied"]["reason"]["kind"], "setup_required");
    assert_eq!(body["denied"]["session_state"], "AWAITING_SCHEDULE");

    let (status, phases) = call(&app, "GET", "/api/phases", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(phases.as_array().unwrap().len(), 3);
    assert_eq!(phases[0]["status"], "SIN_CONFIGURAR");
}

#[tokio::test]
async fn test_invalid_schedule_returns_bounds() {
    let app = router(anonymous_admin());
    call(&app, "POST", "/api/gestion", None, Some(json!({ "year": 2025 }))).await;
    let (_, phases) = call(&app, "GET", "/api/phases", None, None).await;
    let id = &phases[0]["id"];

    let (status, constraints) = call(
        &app,
        "GET",
        &format!("/api/phases/{}/constraints", id),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(constraints["min_start"], TODAY);

    let (status, body) = call(
        &app,
        "PUT",
        &format!("/api/phases/{}/schedule", id),
        None,
        Some(json!({ "start_date": "2025-01-05", "end_date": "2025-01-20" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["detail"]["kind"], "start_too_early");
    assert_eq!(body["detail"]["min_start"], TODAY);
}

#[tokio::test]
async fn test_schedule_overlapping_distant_phase_is_rejected() {
    let app = router(anonymous_admin());
    call(
        &app,
        "POST",
        "/api/gestion",
        None,
        Some(json!({
            "year": 2025,
            "first_schedule": { "start_date": "2025-01-10", "end_date": "2025-01-31" }
        })),
    )
    .await;
    let (_, phases) = call(&app, "GET", "/api/phases", None, None).await;
    let final_id = &phases[2]["id"];

    let (status, body) = call(
        &app,
        "PUT",
        &format!("/api/phases/{}/schedule", final_id),
        None,
        Some(json!({ "start_date": "2025-01-15", "end_date": "2025-01-20" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["detail"]["kind"], "overlaps");
    assert_eq!(body["detail"]["conflicting_end"], "2025-01-31");

    let (_, phases) = call(&app, "GET", "/api/phases", None, None).await;
    assert_eq!(phases[2]["status"], "SIN_CONFIGURAR");
}

#[tokio::test]
async fn test_login_required_when_users_configured() {
    let app = router(with_users());

    let (status, _) = call(&app, "GET", "/api/session", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(
        &app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "username": "admin", "password": "wrong" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, login) = call(
        &app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "username": "admin", "password": "s3cret" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(login["roles"], json!(["Admin"]));
    let token = login["token"].as_str().unwrap().to_string();

    let (status, session) = call(&app, "GET", "/api/session", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["username"], "admin");

    call(
        &app,
        "POST",
        "/api/auth/logout",
        None,
        Some(json!({ "token": token })),
    )
    .await;
    let (status, _) = call(&app, "GET", "/api/session", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_access_probe_reports_phase_and_roles() {
    let app = router(with_users());
    let (_, admin) = call(
        &app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "username": "admin", "password": "s3cret" })),
    )
    .await;
    let admin = admin["token"].as_str().unwrap().to_string();
    make_ready(&app, Some(&admin)).await;

    let (_, eva) = call(
        &app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "username": "eva", "password": "grades" })),
    )
    .await;
    let eva = eva["token"].as_str().unwrap().to_string();

    // Evaluador holds LOAD_GRADES but CONFIGURACION does not enable it.
    let (status, body) = call(&app, "GET", "/api/access/LOAD_GRADES", Some(&eva), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], false);
    assert_eq!(body["denied"]["reason"]["kind"], "missing_permission");
    assert_eq!(body["denied"]["active_phase"], "Configuración");
    assert_eq!(body["denied"]["roles"], json!(["Evaluador"]));

    let (_, body) = call(&app, "GET", "/api/access/NOT_AN_ACTION", Some(&eva), None).await;
    assert_eq!(body["denied"]["reason"]["kind"], "unknown_action");

    let (status, _) = call(&app, "GET", "/api/permissions/phases", Some(&eva), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_sub_phase_lifecycle_over_http() {
    let state = anonymous_admin();
    let app = router(state.clone());
    make_ready(&app, None).await;

    // Open every action during every phase.
    let (_, matrix) = call(&app, "GET", "/api/permissions/phases", None, None).await;
    let cells: Vec<Value> = matrix["cells"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| {
            json!({
                "global_phase_id": c["global_phase_id"],
                "action_id": c["action_id"],
                "enabled": true
            })
        })
        .collect();
    let (status, _) = call(
        &app,
        "PUT",
        "/api/permissions/phases",
        None,
        Some(json!({ "cells": cells })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, area) = call(
        &app,
        "POST",
        "/api/catalog/areas",
        None,
        Some(json!({ "name": "Matemática" })),
    )
    .await;
    let (_, level) = call(
        &app,
        "POST",
        "/api/catalog/levels",
        None,
        Some(json!({ "name": "Primero" })),
    )
    .await;

    let mut events = state.ws_broadcast.subscribe();
    let (status, sp) = call(
        &app,
        "POST",
        "/api/subphases",
        None,
        Some(json!({
            "area_id": area["id"],
            "level_id": level["id"],
            "name": "Clasificatoria",
            "student_count": 40
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sp["status"], "NO_INICIADA");
    let event: Value = serde_json::from_str(&events.try_recv().unwrap()).unwrap();
    assert_eq!(event["type"], "sub_phase_changed");

    let id = &sp["id"];
    let (status, body) = call(
        &app,
        "PATCH",
        &format!("/api/subphases/{}/status", id),
        None,
        Some(json!({ "status": "FINALIZADA" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["detail"]["kind"], "invalid_state");

    let (status, _) = call(
        &app,
        "PATCH",
        &format!("/api/subphases/{}/status", id),
        None,
        Some(json!({ "status": "EN_EVALUACION" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &app,
        "PATCH",
        &format!("/api/subphases/{}/progress", id),
        None,
        Some(json!({ "progress_percent": 60 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["progress_percent"], 60);

    let uri = format!(
        "/api/subphases?area_id={}&level_id={}",
        area["id"], level["id"]
    );
    let (_, track) = call(&app, "GET", &uri, None, None).await;
    assert_eq!(track[0]["available_transition"], "FINALIZADA");

    let (status, audit) = call(
        &app,
        "GET",
        "/api/audit?action=sub_phase_transition",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // One rejected and one accepted transition.
    assert_eq!(audit["total"], 2);
}
