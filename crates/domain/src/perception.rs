use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The modality an inbound perception event originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Text,
    Audio,
    Image,
    Video,
}

/// Where an event sits in its modality's recognition lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stage {
    /// An intermediate, not-yet-settled result (e.g. a live STT partial).
    Partial,
    /// A settled result for this utterance/frame.
    Final,
    /// The modality's upstream backend failed to produce a result.
    Error,
}

/// The single normalized representation every modality's input is
/// converted into before it reaches a [`Task`](crate::task::Task).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerceptionEvent {
    pub event_id: String,
    pub modality: Modality,
    pub stage: Stage,
    /// Textualized content — transcript text, OCR'd caption, etc.
    pub content: String,
    #[serde(default = "d_confidence")]
    pub confidence: f32,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

fn d_confidence() -> f32 {
    1.0
}

impl PerceptionEvent {
    pub fn new(modality: Modality, stage: Stage, content: impl Into<String>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            modality,
            stage,
            content: content.into(),
            confidence: 1.0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_event_defaults_to_full_confidence() {
        let e = PerceptionEvent::new(Modality::Text, Stage::Final, "hello");
        assert!((e.confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn modality_serializes_uppercase() {
        let json = serde_json::to_string(&Modality::Audio).unwrap();
        assert_eq!(json, "\"AUDIO\"");
    }

    #[test]
    fn stage_serializes_uppercase() {
        let json = serde_json::to_string(&Stage::Partial).unwrap();
        assert_eq!(json, "\"PARTIAL\"");
    }
}
