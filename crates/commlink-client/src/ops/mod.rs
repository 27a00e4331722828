//! Operational HTTP endpoints.
//!
//! - `/healthz`        : liveness
//! - `/readyz`         : readiness (503 unless connected)
//! - `/status`         : orchestrator status as JSON
//! - `/metrics`        : Prometheus text format
//! - `/debug/topology` : mesh topology of the current room

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::app_state::AppState;

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    if state.is_connected() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not connected")
    }
}

pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.comms().status())
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    let extra = state.metrics_extra();
    let body = state.metrics().render(&extra);

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

pub async fn topology(State(state): State<AppState>) -> Response {
    match state.comms().debug_topology() {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (StatusCode::NOT_FOUND, "no active room").into_response(),
    }
}
