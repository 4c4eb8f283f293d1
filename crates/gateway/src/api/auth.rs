//! Bearer-token auth middleware. `AppState::api_token_hash` is computed
//! once at startup from `config.server.api_token_env`; `None` means dev
//! mode, where every request passes through unauthenticated.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected_hash) = &state.api_token_hash else {
        return next.run(req).await;
    };

    let provided = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(provided) = provided else {
        return unauthorized();
    };

    let provided_hash = Sha256::digest(provided.as_bytes());
    if provided_hash.as_slice().ct_eq(expected_hash.as_slice()).into() {
        next.run(req).await
    } else {
        unauthorized()
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        axum::Json(serde_json::json!({"error": "invalid or missing API token"})),
    )
        .into_response()
}
