//! Chat API endpoints — the unary entry points for a single perceive →
//! reason turn against an existing session (spec §6).
//!
//! - `POST /api/v1/chat`        — non-streaming: returns the full reply
//! - `POST /api/v1/chat/stream` — SSE: streams `delta`/`done` events
//!
//! Both require an `X-Session-ID` header naming an active session; `X-Trace-ID`
//! is echoed back on the response if present, or the session's own trace id
//! is used otherwise.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use futures_util::{Stream, StreamExt};
use sa_domain::error::Error;
use sa_domain::perception::Modality;
use sa_domain::task::{Task, TaskContext};
use sa_perception::SttSessionConfig;
use sa_protocol::ErrorEnvelope;
use serde::Deserialize;

use crate::runtime::orchestrator::{run_task, OrchestratorEvent, OrchestratorInput};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequestBody {
    pub message: String,
    #[serde(default)]
    pub model: Option<String>,
}

fn session_id_header(headers: &HeaderMap) -> Result<String, Error> {
    headers
        .get("X-Session-ID")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::Validation("missing X-Session-ID header".into()))
}

fn trace_id_header(headers: &HeaderMap) -> Option<String> {
    headers.get("X-Trace-ID").and_then(|v| v.to_str().ok()).map(String::from)
}

fn error_response(error: Error, trace_id: Option<String>) -> Response {
    let status = StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorEnvelope::from_error(&error, trace_id))).into_response()
}

use axum::response::Response;

/// Build the `Task` for one turn: the session's derived context plus a
/// fresh text-modality instruction carrying the caller's message.
fn build_task(session: &sa_sessions::Session, message: &str) -> Task {
    Task::new(message, vec![Modality::Text]).with_context(TaskContext {
        messages: session.context(),
    })
}

pub async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ChatRequestBody>,
) -> Response {
    let trace_id = trace_id_header(&headers);
    let session_id = match session_id_header(&headers) {
        Ok(id) => id,
        Err(e) => return error_response(e, trace_id),
    };
    let session = match state.sessions.get_active(&session_id) {
        Some(s) => s,
        None => return error_response(Error::SessionNotFound(session_id), trace_id),
    };
    let llm = match state.llm.get(&session.config.llm.provider) {
        Some(p) => p,
        None => {
            return error_response(
                Error::Config(format!("unknown LLM provider '{}'", session.config.llm.provider)),
                trace_id,
            )
        }
    };

    let message = body.message.clone();
    let task = build_task(&session, &message);
    let model = body.model.or_else(|| Some(session.config.llm.model.clone()));
    let stream = run_task(
        task,
        session.config.llm.system_message.clone(),
        OrchestratorInput {
            text: Some(body.message),
            audio: None,
        },
        Arc::clone(&state.stt),
        SttSessionConfig::default(),
        llm,
        model,
        Arc::clone(&state.trigger),
    );
    tokio::pin!(stream);

    let mut content = String::new();
    let mut failed = None;
    while let Some(event) = stream.next().await {
        match event {
            OrchestratorEvent::Completed(result) => content = result.content,
            OrchestratorEvent::Failed(err_message) => failed = Some(err_message),
            _ => {}
        }
    }

    if let Some(message) = failed {
        return error_response(Error::Provider { provider: session.config.llm.provider.clone(), message }, trace_id);
    }

    // The orchestrator drives its own clone of `task`; commit an equivalent
    // completed turn into the session so the next call's derived context
    // includes this exchange (spec §4.5 invariant: tasks persist onto the
    // owning session once completed).
    let commit_result = state.sessions.mutate(&session_id, |s| {
        let mut committed = build_task(s, &message);
        committed.add_perception(sa_domain::perception::PerceptionEvent::new(
            Modality::Text,
            sa_domain::perception::Stage::Final,
            message.clone(),
        ));
        committed.complete(sa_domain::task::TaskResult {
            content: content.clone(),
            format: "text".into(),
            messages: vec![],
        });
        s.tasks.push(committed);
        s.stats.tasks_count += 1;
        s.stats.llm_requests += 1;
        s.touch();
    });
    if let Err(e) = commit_result {
        return error_response(e, trace_id);
    }

    Json(serde_json::json!({
        "session_id": session_id,
        "trace_id": trace_id.unwrap_or(session.trace_id),
        "content": content,
    }))
    .into_response()
}

pub async fn chat_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ChatRequestBody>,
) -> Response {
    let trace_id = trace_id_header(&headers);
    let session_id = match session_id_header(&headers) {
        Ok(id) => id,
        Err(e) => return error_response(e, trace_id),
    };
    let session = match state.sessions.get_active(&session_id) {
        Some(s) => s,
        None => return error_response(Error::SessionNotFound(session_id), trace_id),
    };
    let llm = match state.llm.get(&session.config.llm.provider) {
        Some(p) => p,
        None => {
            return error_response(
                Error::Config(format!("unknown LLM provider '{}'", session.config.llm.provider)),
                trace_id,
            )
        }
    };

    let message = body.message.clone();
    let task = build_task(&session, &message);
    let model = body.model.or_else(|| Some(session.config.llm.model.clone()));
    let stream = run_task(
        task,
        session.config.llm.system_message.clone(),
        OrchestratorInput {
            text: Some(body.message),
            audio: None,
        },
        Arc::clone(&state.stt),
        SttSessionConfig::default(),
        llm,
        model,
        Arc::clone(&state.trigger),
    );

    let sse = make_sse_stream(stream, state, session_id, message);
    Sse::new(sse).keep_alive(KeepAlive::default()).into_response()
}

/// Translate orchestrator events into SSE frames. On `Completed`, commits
/// the turn into the session before yielding `done` so a client that
/// immediately issues a follow-up request sees it in the derived context.
fn make_sse_stream(
    stream: impl Stream<Item = OrchestratorEvent> + Send + 'static,
    state: AppState,
    session_id: String,
    message: String,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        tokio::pin!(stream);
        while let Some(event) = stream.next().await {
            match event {
                OrchestratorEvent::Thinking(delta) => {
                    yield Ok(Event::default().event("delta").data(delta));
                }
                OrchestratorEvent::Completed(result) => {
                    let content = result.content.clone();
                    let _ = state.sessions.mutate(&session_id, |s| {
                        let mut committed = build_task(s, &message);
                        committed.add_perception(sa_domain::perception::PerceptionEvent::new(
                            Modality::Text,
                            sa_domain::perception::Stage::Final,
                            message.clone(),
                        ));
                        committed.complete(sa_domain::task::TaskResult {
                            content: content.clone(),
                            format: "text".into(),
                            messages: vec![],
                        });
                        s.tasks.push(committed);
                        s.stats.tasks_count += 1;
                        s.stats.llm_requests += 1;
                        s.touch();
                    });
                    yield Ok(Event::default().event("done").data(serde_json::json!({
                        "content": result.content,
                    }).to_string()));
                }
                OrchestratorEvent::Failed(message) => {
                    yield Ok(Event::default().event("error").data(message));
                }
                OrchestratorEvent::Perception(_) => {}
            }
        }
    }
}
