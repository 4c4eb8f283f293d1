//! Wire protocol for the bidirectional multimodal stream (spec §6): the
//! tagged-union `ClientFrame`/`ServerFrame` pair exchanged over the
//! `StreamMultiModal` RPC, plus the REST/SSE error envelope shared by every
//! unary surface.
//!
//! Kept in its own crate (rather than `sa-domain`) because it is pure wire
//! format — every field here is what crosses the transport boundary, not an
//! internal type. `sa-gateway`'s stream handler translates between this and
//! `sa-domain`'s `PerceptionEvent`/`Message` types.

use serde::{Deserialize, Serialize};

/// One inbound control command on a `Control` client frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControlCommand {
    /// Ask the STT backend to finalize any buffered partial immediately.
    Flush,
    /// No more audio is coming; drain in-flight work and close.
    EndAudio,
    /// Abandon everything in flight and close without draining.
    Cancel,
}

/// Per-stream overrides a client may supply on its `Start` frame. Any field
/// left `None` falls back to the session's stored defaults (spec §4.4
/// `SessionSttConfig`/`SessionLlmConfig`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default)]
    pub stt_model: Option<String>,
    #[serde(default)]
    pub llm_model: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// An inbound text input supplied inline on a `Start` frame (spec §6
/// `initial_inputs`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextInput {
    pub content: String,
}

/// An inbound audio input supplied inline on a `Start` frame. Unlike the
/// `Audio` frame (a raw PCM chunk pushed after the stream is open), this is
/// a complete clip transcribed once at session start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioInput {
    /// Base64-encoded PCM bytes (frames are JSON; raw bytes don't fit).
    pub data_base64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum InitialInput {
    #[serde(rename = "text")]
    Text(TextInput),
    #[serde(rename = "audio")]
    Audio(AudioInput),
}

/// Inbound tagged union on the `StreamMultiModal` RPC (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "start")]
    Start {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        config: StreamConfig,
        #[serde(default)]
        initial_inputs: Vec<InitialInput>,
    },
    #[serde(rename = "audio")]
    Audio {
        /// Base64-encoded raw PCM chunk (text-framed WebSocket transport).
        data_base64: String,
    },
    #[serde(rename = "control")]
    Control { command: ControlCommand },
}

/// Metadata attached to a terminal or per-turn `Complete` frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompleteMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcribed_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

/// Outbound tagged union on the `StreamMultiModal` RPC (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "ready")]
    Ready { session_id: String, message: String },
    #[serde(rename = "stt")]
    Stt {
        text: String,
        is_final: bool,
        confidence: f32,
    },
    #[serde(rename = "llm")]
    Llm { delta: String, index: u32 },
    #[serde(rename = "complete")]
    Complete {
        finish_reason: String,
        #[serde(default)]
        metadata: CompleteMetadata,
    },
    #[serde(rename = "error")]
    Error {
        code: u32,
        message: String,
        recoverable: bool,
    },
}

/// The canonical REST/SSE error envelope (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl ErrorEnvelope {
    pub fn from_error(error: &sa_domain::error::Error, trace_id: Option<String>) -> Self {
        Self {
            code: error.code(),
            message: error.to_string(),
            data: None,
            trace_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_frame_round_trips_with_defaults() {
        let json = r#"{"type":"start","config":{}}"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        match frame {
            ClientFrame::Start {
                session_id,
                initial_inputs,
                ..
            } => {
                assert!(session_id.is_none());
                assert!(initial_inputs.is_empty());
            }
            _ => panic!("expected Start"),
        }
    }

    #[test]
    fn control_command_serializes_uppercase() {
        let json = serde_json::to_string(&ControlCommand::EndAudio).unwrap();
        assert_eq!(json, "\"END_AUDIO\"");
    }

    #[test]
    fn stt_frame_round_trips() {
        let frame = ServerFrame::Stt {
            text: "hi".into(),
            is_final: true,
            confidence: 0.9,
        };
        let json = serde_json::to_string(&frame).unwrap();
        let back: ServerFrame = serde_json::from_str(&json).unwrap();
        match back {
            ServerFrame::Stt { text, is_final, .. } => {
                assert_eq!(text, "hi");
                assert!(is_final);
            }
            _ => panic!("expected Stt"),
        }
    }

    #[test]
    fn error_envelope_from_error_carries_code() {
        let e = sa_domain::error::Error::SessionExpired("s1".into());
        let env = ErrorEnvelope::from_error(&e, Some("trace-1".into()));
        assert_eq!(env.code, 1004);
        assert_eq!(env.trace_id.as_deref(), Some("trace-1"));
    }
}
