//! Unary multimodal RPC (spec §6): `Process(Request) -> Response` — the
//! non-streaming counterpart of the bidirectional stream, driven by
//! [`crate::runtime::orchestrator`]. Accepts a closed list of text/audio
//! inputs, transcribes audio one-shot, and returns the full LLM answer.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use sa_domain::error::Error;
use sa_domain::perception::{Modality, PerceptionEvent};
use sa_domain::task::Task;
use sa_perception::SttSessionConfig;
use sa_protocol::ErrorEnvelope;
use serde::{Deserialize, Serialize};

use crate::runtime::orchestrator::{run_task, OrchestratorEvent, OrchestratorInput};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    #[serde(default)]
    pub text: Option<String>,
    /// Raw audio bytes, base64-encoded.
    #[serde(default)]
    pub audio_base64: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub outputs: Vec<ProcessOutput>,
    pub finish_reason: &'static str,
    pub metadata: ProcessMetadata,
}

#[derive(Debug, Serialize)]
pub struct ProcessOutput {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Default, Serialize)]
pub struct ProcessMetadata {
    pub transcribed_text: String,
}

fn error_response(error: Error) -> Response {
    let status = StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorEnvelope::from_error(&error, None))).into_response()
}

/// S1/S2 from spec §8: empty inputs short-circuit with `no_input` and never
/// touch the LLM; otherwise audio takes priority over text when both are
/// given, matching the orchestrator's own modality ordering.
pub async fn process(State(state): State<AppState>, Json(body): Json<ProcessRequest>) -> Response {
    let audio = match body.audio_base64.as_deref().map(|b64| {
        base64::Engine::decode(&base64::engine::general_purpose::STANDARD, b64)
    }) {
        Some(Ok(bytes)) => Some(bytes),
        Some(Err(_)) => return error_response(Error::Validation("audio_base64 is not valid base64".into())),
        None => None,
    };

    if audio.is_none() && body.text.is_none() {
        return Json(ProcessResponse {
            outputs: vec![],
            finish_reason: "no_input",
            metadata: ProcessMetadata::default(),
        })
        .into_response();
    }

    let provider_id = body.provider.as_deref().unwrap_or("default");
    let llm = match state.llm.get(provider_id) {
        Some(p) => p,
        None => return error_response(Error::Config(format!("unknown LLM provider '{provider_id}'"))),
    };

    let mut modalities = Vec::new();
    if audio.is_some() {
        modalities.push(Modality::Audio);
    }
    if body.text.is_some() {
        modalities.push(Modality::Text);
    }
    let instruction = body.text.clone().unwrap_or_default();
    let task = Task::new(instruction, modalities);

    let stream = run_task(
        task,
        body.system_prompt,
        OrchestratorInput {
            text: body.text,
            audio,
        },
        Arc::clone(&state.stt),
        SttSessionConfig::default(),
        llm,
        body.model,
        Arc::clone(&state.trigger),
    );
    tokio::pin!(stream);

    let mut content = String::new();
    let mut transcribed_text = String::new();
    let mut failed = None;
    let mut completed = false;
    use futures_util::StreamExt;
    while let Some(event) = stream.next().await {
        match event {
            OrchestratorEvent::Perception(PerceptionEvent { content: text, modality, .. })
                if modality == Modality::Audio =>
            {
                transcribed_text = text;
            }
            OrchestratorEvent::Completed(result) => {
                content = result.content;
                completed = true;
            }
            OrchestratorEvent::Failed(message) => failed = Some(message),
            _ => {}
        }
    }

    if let Some(message) = failed {
        return error_response(Error::Provider {
            provider: provider_id.to_string(),
            message,
        });
    }

    Json(ProcessResponse {
        outputs: if completed {
            vec![ProcessOutput {
                role: "assistant",
                content,
            }]
        } else {
            vec![]
        },
        finish_reason: if completed { "stop" } else { "no_input" },
        metadata: ProcessMetadata { transcribed_text },
    })
    .into_response()
}
