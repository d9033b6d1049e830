//! HTTP request handlers.

use super::AppState;
use crate::db::PendingCounts;
use crate::scheduler::RoutineInfo;
use crate::session::SessionError;
use crate::status::StatusSnapshot;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub logged_in: bool,
    pub device_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub routines: Vec<RoutineInfo>,
    pub status: StatusSnapshot,
    pub session: SessionView,
    pub pending: PendingCounts,
}

pub async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    let session = match state.sessions.current() {
        Ok(s) => s,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };
    let pending = match state.store.pending_counts() {
        Ok(p) => p,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    Json(StatusResponse {
        routines: state.scheduler.routines().await,
        status: state.status.snapshot(),
        session: SessionView {
            logged_in: session.device_id.is_some(),
            device_id: session.device_id,
        },
        pending,
    })
    .into_response()
}

pub async fn handle_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.settings.get())
}

pub async fn handle_outbox(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.pending_counts() {
        Ok(counts) => Json(counts).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub async fn handle_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> impl IntoResponse {
    if req.email.is_empty() || req.password.is_empty() {
        return (StatusCode::BAD_REQUEST, "email and password are required").into_response();
    }

    match state
        .sessions
        .login(&state.collector, &req.email, &req.password)
        .await
    {
        Ok(session) => Json(SessionView {
            logged_in: true,
            device_id: session.device_id,
        })
        .into_response(),
        Err(SessionError::Login(e)) => {
            tracing::warn!("Login failed: {}", e);
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_logout(State(state): State<AppState>) -> impl IntoResponse {
    match state.sessions.clear() {
        Ok(()) => {
            tracing::info!("Session cleared");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
