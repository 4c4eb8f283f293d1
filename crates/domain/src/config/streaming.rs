use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trigger policy + bidirectional stream tuning
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Controls how the trigger policy decides whether a perception event
/// should kick off an LLM turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// When true, an AUDIO/FINAL event is referred to the LLM ("is this a
    /// complete, actionable utterance?") instead of the plain non-empty-text
    /// rule. Falls back to the rule automatically if the judge call fails.
    #[serde(default)]
    pub use_llm_judge: bool,
    /// Bound on the per-stream `output_queue`. Producers (STT callbacks, the
    /// LLM worker) block once it fills, applying back-pressure to the wire.
    #[serde(default = "d_output_queue_capacity")]
    pub output_queue_capacity: usize,
    /// Bound on the per-stream `pending_sentences` queue feeding the LLM
    /// worker.
    #[serde(default = "d_pending_sentences_capacity")]
    pub pending_sentences_capacity: usize,
    /// On a graceful `END_AUDIO`, how long the reader waits for the LLM
    /// worker to drain `pending_sentences` and finish its current turn
    /// before giving up and aborting it anyway.
    #[serde(default = "d_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            use_llm_judge: false,
            output_queue_capacity: d_output_queue_capacity(),
            pending_sentences_capacity: d_pending_sentences_capacity(),
            drain_timeout_secs: d_drain_timeout_secs(),
        }
    }
}

fn d_output_queue_capacity() -> usize {
    64
}
fn d_pending_sentences_capacity() -> usize {
    16
}
fn d_drain_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_trigger_mode_is_rule_only() {
        let cfg = StreamingConfig::default();
        assert!(!cfg.use_llm_judge);
    }

    #[test]
    fn deserializes_llm_judge_override() {
        let json = r#"{"use_llm_judge": true}"#;
        let cfg: StreamingConfig = serde_json::from_str(json).unwrap();
        assert!(cfg.use_llm_judge);
        assert_eq!(cfg.output_queue_capacity, 64);
    }
}
