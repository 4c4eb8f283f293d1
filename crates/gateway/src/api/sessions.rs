//! Session lifecycle REST endpoints (spec §6): create, fetch, update the
//! per-session STT/LLM config, delete, and list.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use sa_domain::config::SessionDefaultsConfig;
use sa_protocol::ErrorEnvelope;
use sa_sessions::Session;
use serde::Deserialize;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSessionBody {
    pub client_id: String,
    #[serde(default)]
    pub config: Option<SessionDefaultsConfig>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
}

fn error_response(error: sa_domain::error::Error) -> Response {
    let status = StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorEnvelope::from_error(&error, None))).into_response()
}

fn descriptor(session: &Session) -> serde_json::Value {
    serde_json::json!({
        "session_id": session.session_id,
        "client_id": session.client_id,
        "trace_id": session.trace_id,
        "status": session.status,
        "config": session.config,
        "stats": session.stats,
        "metadata": session.metadata,
        "created_at": session.created_at.to_rfc3339(),
        "updated_at": session.updated_at.to_rfc3339(),
        "expires_at": session.expires_at.to_rfc3339(),
        "task_count": session.tasks.len(),
    })
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionBody>,
) -> Response {
    match state.sessions.create(body.client_id, body.config, body.metadata) {
        Ok(session) => (StatusCode::CREATED, Json(descriptor(&session))).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.sessions.get(&id) {
        Some(session) => Json(descriptor(&session)).into_response(),
        None => error_response(sa_domain::error::Error::SessionNotFound(id)),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateSessionConfigBody {
    pub config: SessionDefaultsConfig,
}

pub async fn update_session_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateSessionConfigBody>,
) -> Response {
    let result = state.sessions.mutate(&id, |s| {
        s.config = body.config;
        s.touch();
    });
    match result {
        Ok(()) => match state.sessions.get(&id) {
            Some(session) => Json(descriptor(&session)).into_response(),
            None => error_response(sa_domain::error::Error::SessionNotFound(id)),
        },
        Err(e) => error_response(e),
    }
}

pub async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.sessions.delete(&id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.sessions.list(None, None);
    Json(serde_json::json!({
        "sessions": sessions.iter().map(descriptor).collect::<Vec<_>>(),
        "count": sessions.len(),
    }))
}
