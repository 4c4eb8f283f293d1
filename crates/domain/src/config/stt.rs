use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STT driver configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-wide defaults for the STT driver. Per-session overrides live in
/// [`super::SessionSttConfig`]; this section governs driver-internal timing
/// that is not something a client should be able to tune per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttDriverConfig {
    /// Which backend the registry resolves by default when a session does
    /// not name one explicitly (e.g. `"mock"`, `"aliyun"`).
    #[serde(default = "d_backend")]
    pub default_backend: String,
    /// Seconds between keep-alive silence injections on an otherwise idle
    /// session. Defeats upstream idle-disconnect timers.
    #[serde(default = "d_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,
    /// Size in bytes of one keep-alive silence frame: 100ms of zero-valued
    /// 16-bit PCM at the configured sample rate (3200 bytes at 16kHz).
    #[serde(default = "d_silence_frame_bytes")]
    pub silence_frame_bytes: usize,
    /// Timeout for the one-shot `transcribe_once` call.
    #[serde(default = "d_transcribe_once_timeout_secs")]
    pub transcribe_once_timeout_secs: u64,
}

impl Default for SttDriverConfig {
    fn default() -> Self {
        Self {
            default_backend: d_backend(),
            keepalive_interval_secs: d_keepalive_interval_secs(),
            silence_frame_bytes: d_silence_frame_bytes(),
            transcribe_once_timeout_secs: d_transcribe_once_timeout_secs(),
        }
    }
}

fn d_backend() -> String {
    "mock".into()
}
fn d_keepalive_interval_secs() -> u64 {
    10
}
fn d_silence_frame_bytes() -> usize {
    3200
}
fn d_transcribe_once_timeout_secs() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_constants() {
        let cfg = SttDriverConfig::default();
        assert_eq!(cfg.keepalive_interval_secs, 10);
        assert_eq!(cfg.silence_frame_bytes, 3200);
        assert_eq!(cfg.transcribe_once_timeout_secs, 10);
    }
}
