use serde::Serialize;

/// Structured trace events emitted across all SerialAgent crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionCreated {
        session_id: String,
        client_id: String,
    },
    SessionExpired {
        session_id: String,
    },
    SessionClosed {
        session_id: String,
        reason: String,
    },
    LlmRequest {
        provider: String,
        model: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    SttSessionStarted {
        session_id: String,
        backend: String,
    },
    SttSessionStopped {
        session_id: String,
    },
    TriggerDecision {
        task_id: String,
        modality: String,
        stage: String,
        invoked: bool,
    },
    StreamOpened {
        session_id: String,
    },
    StreamClosed {
        session_id: String,
        reason: String,
    },
    StreamFrameEnqueued {
        session_id: String,
        frame: String,
    },
    TurnStarted {
        session_id: String,
        task_id: String,
    },
    TurnCompleted {
        session_id: String,
        task_id: String,
        finish_reason: String,
        duration_ms: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "sa_event");
    }
}
