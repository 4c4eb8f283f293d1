//! Unary health check (spec §6): `HealthCheck -> {healthy, version, metadata}`.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    healthy: bool,
    version: &'static str,
    metadata: HealthMetadata,
}

#[derive(Serialize)]
pub struct HealthMetadata {
    active_sessions: usize,
    llm_providers: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        metadata: HealthMetadata {
            active_sessions: state.sessions.count(),
            llm_providers: state.llm.len(),
        },
    })
}
