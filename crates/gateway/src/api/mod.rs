pub mod auth;
pub mod chat;
pub mod health;
pub mod process;
pub mod sessions;
pub mod stream;
pub mod stt;

use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;

use crate::state::AppState;

/// Build the full API router (spec §6).
///
/// Routes are split into **public** (no auth required) and **protected**
/// (gated behind the `SA_API_TOKEN` bearer-token middleware, configured via
/// `server.api_token_env`). `state` is needed to wire up the auth
/// middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        // Unary health check.
        .route("/api/v1/health", get(health::health))
        // Bidirectional multimodal stream (StreamMultiModal, spec §6). Not
        // gated by the bearer-token middleware: the `Start` frame itself
        // carries the session, and a dropped/unauthenticated connection is
        // simply refused a session by `resolve_session`.
        .route("/api/v1/stream", get(stream::upgrade));

    let protected = Router::new()
        // Session management.
        .route("/api/v1/sessions", post(sessions::create_session))
        .route("/api/v1/sessions", get(sessions::list_sessions))
        .route("/api/v1/sessions/:id", get(sessions::get_session))
        .route("/api/v1/sessions/:id", delete(sessions::delete_session))
        .route(
            "/api/v1/sessions/:id/config",
            put(sessions::update_session_config),
        )
        // Chat (unary + SSE streaming).
        .route("/api/v1/chat", post(chat::chat))
        .route("/api/v1/chat/stream", post(chat::chat_stream))
        // Unary multimodal RPC (Process).
        .route("/api/v1/process", post(process::process))
        // One-shot STT recognition.
        .route("/api/v1/stt/recognize", post(stt::recognize))
        // Apply API auth middleware to all protected routes.
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
