use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-session perception/reasoning defaults + SessionManager policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Default per-session STT settings, applied when a client does not
/// override them in its session creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSttConfig {
    #[serde(default = "d_stt_provider")]
    pub provider: String,
    #[serde(default = "d_stt_model")]
    pub model: String,
    #[serde(default = "d_language")]
    pub language: String,
    #[serde(default = "d_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "d_true")]
    pub enable_punctuation: bool,
}

impl Default for SessionSttConfig {
    fn default() -> Self {
        Self {
            provider: d_stt_provider(),
            model: d_stt_model(),
            language: d_language(),
            sample_rate: d_sample_rate(),
            enable_punctuation: true,
        }
    }
}

/// Default per-session LLM settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLlmConfig {
    #[serde(default = "d_llm_provider")]
    pub provider: String,
    #[serde(default = "d_llm_model")]
    pub model: String,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub system_message: Option<String>,
}

impl Default for SessionLlmConfig {
    fn default() -> Self {
        Self {
            provider: d_llm_provider(),
            model: d_llm_model(),
            temperature: d_temperature(),
            max_tokens: d_max_tokens(),
            system_message: None,
        }
    }
}

/// `Session.config` defaults: mirrors what a client may supply in its
/// session creation request (see [`SessionSttConfig`] / [`SessionLlmConfig`]),
/// plus the absolute session timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDefaultsConfig {
    #[serde(default)]
    pub stt: SessionSttConfig,
    #[serde(default)]
    pub llm: SessionLlmConfig,
    #[serde(default = "d_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for SessionDefaultsConfig {
    fn default() -> Self {
        Self {
            stt: SessionSttConfig::default(),
            llm: SessionLlmConfig::default(),
            timeout_seconds: d_timeout_seconds(),
        }
    }
}

/// Governs the [`SessionManager`](sa_sessions)'s admission and sweep
/// behavior — independent of any individual session's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionManagerConfig {
    /// Maximum number of sessions tracked concurrently. Admission of a new
    /// session is refused once this bound is reached and a sweep of expired
    /// sessions doesn't free a slot.
    #[serde(default = "d_max_sessions")]
    pub max_sessions: usize,
    /// How often the background sweep removes expired/closed sessions.
    #[serde(default = "d_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Defaults applied to newly created sessions.
    #[serde(default)]
    pub defaults: SessionDefaultsConfig,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            max_sessions: d_max_sessions(),
            cleanup_interval_secs: d_cleanup_interval_secs(),
            defaults: SessionDefaultsConfig::default(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_stt_provider() -> String {
    "mock".into()
}
fn d_stt_model() -> String {
    "paraformer-realtime-v2".into()
}
fn d_language() -> String {
    "zh-CN".into()
}
fn d_sample_rate() -> u32 {
    16000
}
fn d_llm_provider() -> String {
    "default".into()
}
fn d_llm_model() -> String {
    "default".into()
}
fn d_temperature() -> f32 {
    0.7
}
fn d_max_tokens() -> u32 {
    2048
}
fn d_timeout_seconds() -> u64 {
    3600
}
fn d_max_sessions() -> usize {
    1000
}
fn d_cleanup_interval_secs() -> u64 {
    60
}
fn d_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_defaults_match_reference_timeout() {
        let cfg = SessionDefaultsConfig::default();
        assert_eq!(cfg.timeout_seconds, 3600);
    }

    #[test]
    fn session_manager_config_default_bounds() {
        let cfg = SessionManagerConfig::default();
        assert_eq!(cfg.max_sessions, 1000);
        assert_eq!(cfg.cleanup_interval_secs, 60);
    }

    #[test]
    fn session_stt_config_deserializes_partial() {
        let json = r#"{"language": "en-US"}"#;
        let cfg: SessionSttConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.language, "en-US");
        assert_eq!(cfg.sample_rate, 16000);
    }
}
