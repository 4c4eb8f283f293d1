//! Shared application state passed to every API handler.

use std::sync::Arc;

use sa_domain::config::Config;
use sa_perception::{SttDriver, TriggerPolicy};
use sa_providers::registry::ProviderRegistry;
use sa_sessions::SessionManager;

use crate::runtime::cancel::CancelMap;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub llm: Arc<ProviderRegistry>,

    // ── Session management ────────────────────────────────────────────
    pub sessions: Arc<SessionManager>,

    // ── Streaming perception ──────────────────────────────────────────
    pub stt: Arc<dyn SttDriver>,
    pub trigger: Arc<dyn TriggerPolicy>,
    pub cancel_map: Arc<CancelMap>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 hash of the API bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,
}
