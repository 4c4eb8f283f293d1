//! One-shot STT REST endpoint (spec §6): `POST /api/v1/stt/recognize` with a
//! raw PCM body, driven by [`sa_perception::SttDriver::transcribe_once`].

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use sa_domain::error::Error;
use sa_perception::SttSessionConfig;
use sa_protocol::ErrorEnvelope;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct RecognizeResponse {
    text: String,
}

fn error_response(error: Error) -> Response {
    let status = StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorEnvelope::from_error(&error, None))).into_response()
}

fn header_u32(headers: &HeaderMap, name: &str) -> Option<u32> {
    headers.get(name).and_then(|v| v.to_str().ok()).and_then(|v| v.parse().ok())
}

pub async fn recognize(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if body.is_empty() {
        return error_response(Error::Validation("request body must contain raw PCM audio".into()));
    }

    let mut cfg = SttSessionConfig::default();
    if let Some(sample_rate) = header_u32(&headers, "X-Sample-Rate") {
        cfg.sample_rate = sample_rate;
    }
    // `X-Audio-Format` is currently informational only — the driver
    // contract (spec §4.1) assumes raw 16-bit PCM regardless of the
    // caller-supplied label.
    let _audio_format = headers.get("X-Audio-Format").and_then(|v| v.to_str().ok());

    match state.stt.transcribe_once(&body, cfg).await {
        Ok(text) => Json(RecognizeResponse { text }).into_response(),
        Err(e) => error_response(e),
    }
}
