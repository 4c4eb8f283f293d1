use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sa_domain::config::SessionDefaultsConfig;
use sa_domain::task::Task;
use sa_domain::tool::Message;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Created,
    Active,
    Paused,
    Closed,
    Expired,
}

/// Per-session counters, written only by the session's owning handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub tasks_count: u64,
    pub stt_requests: u64,
    pub llm_requests: u64,
    pub total_tokens: u64,
    pub errors: u64,
}

/// A long-lived, multi-turn conversation: tasks, per-session STT/LLM
/// configuration, and absolute TTL-based expiry.
///
/// `context` is never stored directly — it is a derived view over
/// completed tasks (see [`Session::context`]), so there is only ever one
/// place that can drift from the task list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub client_id: String,
    pub trace_id: String,
    pub config: SessionDefaultsConfig,
    pub status: SessionStatus,
    pub tasks: Vec<Task>,
    pub stats: SessionStats,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(client_id: impl Into<String>, config: SessionDefaultsConfig) -> Self {
        Self::with_metadata(client_id, config, HashMap::new())
    }

    pub fn with_metadata(
        client_id: impl Into<String>,
        config: SessionDefaultsConfig,
        metadata: HashMap<String, String>,
    ) -> Self {
        let now = Utc::now();
        let expires_at = now + ChronoDuration::seconds(config.timeout_seconds as i64);
        Self {
            session_id: Uuid::new_v4().to_string(),
            client_id: client_id.into(),
            trace_id: generate_trace_id(),
            config,
            status: SessionStatus::Created,
            tasks: Vec::new(),
            stats: SessionStats::default(),
            metadata,
            created_at: now,
            updated_at: now,
            expires_at,
        }
    }

    /// `expires_at` is fixed at creation and never extended. `touch()` only
    /// updates `updated_at` — this is what keeps expiry absolute rather than
    /// idle-timeout based.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active && !self.is_expired()
    }

    /// Lazily promotes `status` to `Expired` if the absolute deadline has
    /// passed. Returns `true` if a transition happened.
    pub fn promote_if_expired(&mut self) -> bool {
        if self.is_expired() && self.status != SessionStatus::Closed && self.status != SessionStatus::Expired {
            self.status = SessionStatus::Expired;
            true
        } else {
            false
        }
    }

    pub fn create_task(&mut self, instruction: impl Into<String>, modalities: Vec<sa_domain::perception::Modality>) -> &Task {
        let task = Task::new(instruction, modalities);
        self.tasks.push(task);
        self.stats.tasks_count += 1;
        self.touch();
        self.tasks.last().expect("just pushed")
    }

    /// Derived conversation context: the concatenation of each completed
    /// task's (user, assistant) message pair, in task order. Never mutated
    /// in place — recomputed from `tasks` on every call.
    pub fn context(&self) -> Vec<Message> {
        self.tasks
            .iter()
            .filter_map(|t| t.turn_pair())
            .flat_map(|(user, assistant)| [user, assistant])
            .collect()
    }
}

fn generate_trace_id() -> String {
    let ts8 = format!("{:08x}", Utc::now().timestamp_millis() as u64 & 0xFFFF_FFFF);
    let rand8 = Uuid::new_v4().simple().to_string()[..8].to_string();
    format!("{ts8}_{rand8}_{}", instance_id())
}

/// A short identifier for this process instance, used as the third
/// component of a trace id so traces from different gateway processes
/// never collide.
fn instance_id() -> &'static str {
    use std::sync::OnceLock;
    static INSTANCE: OnceLock<String> = OnceLock::new();
    INSTANCE.get_or_init(|| Uuid::new_v4().simple().to_string()[..6].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::perception::{Modality, PerceptionEvent, Stage};
    use sa_domain::task::TaskResult;

    fn cfg(timeout_seconds: u64) -> SessionDefaultsConfig {
        let mut c = SessionDefaultsConfig::default();
        c.timeout_seconds = timeout_seconds;
        c
    }

    #[test]
    fn new_session_expires_at_created_plus_timeout() {
        let s = Session::new("client-1", cfg(60));
        let delta = (s.expires_at - s.created_at).num_seconds();
        assert_eq!(delta, 60);
    }

    #[test]
    fn touch_never_extends_expiry() {
        let mut s = Session::new("client-1", cfg(3600));
        let before = s.expires_at;
        s.touch();
        assert_eq!(s.expires_at, before);
    }

    #[test]
    fn expired_session_is_not_active_even_if_status_active() {
        let mut s = Session::new("client-1", cfg(0));
        s.status = SessionStatus::Active;
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(s.is_expired());
        assert!(!s.is_active());
    }

    #[test]
    fn context_only_includes_completed_tasks() {
        let mut s = Session::new("client-1", cfg(3600));
        s.create_task("say hi", vec![Modality::Text]);
        {
            let t = &mut s.tasks[0];
            t.add_perception(PerceptionEvent::new(Modality::Text, Stage::Final, "hi"));
            t.complete(TaskResult {
                content: "hello!".into(),
                format: "text".into(),
                messages: vec![],
            });
        }
        s.create_task("unfinished", vec![Modality::Text]);
        let ctx = s.context();
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx[0].content.text().unwrap(), "hi");
        assert_eq!(ctx[1].content.text().unwrap(), "hello!");
    }

    #[test]
    fn create_task_bumps_stats_and_touches() {
        let mut s = Session::new("client-1", cfg(3600));
        let before = s.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        s.create_task("x", vec![]);
        assert_eq!(s.stats.tasks_count, 1);
        assert!(s.updated_at > before);
    }
}
