use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use sa_domain::config::{SessionDefaultsConfig, SessionManagerConfig};
use sa_domain::error::{Error, Result};
use sa_domain::trace::TraceEvent;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::session::{Session, SessionStatus};

struct SweepHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// Owns every live [`Session`]. Enforces a capacity bound, absolute TTL
/// expiry, and a periodic background sweep — the three invariants the
/// orchestrator and stream handler rely on without re-checking themselves.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
    config: SessionManagerConfig,
    sweep: RwLock<Option<SweepHandle>>,
}

impl SessionManager {
    pub fn new(config: SessionManagerConfig) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            sweep: RwLock::new(None),
        })
    }

    /// Create a new session. If at capacity, first sweeps expired/closed
    /// sessions; if still at capacity, admission fails with a capacity
    /// error (spec §4.4, invariant #2).
    pub fn create(
        &self,
        client_id: impl Into<String>,
        config: Option<SessionDefaultsConfig>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<Session> {
        let client_id = client_id.into();
        let mut sessions = self.sessions.write();

        if sessions.len() >= self.config.max_sessions {
            sweep_locked(&mut sessions);
            if sessions.len() >= self.config.max_sessions {
                return Err(Error::Capacity(format!(
                    "max_sessions ({}) reached",
                    self.config.max_sessions
                )));
            }
        }

        let mut session = Session::with_metadata(
            client_id.clone(),
            config.unwrap_or_else(|| self.config.defaults.clone()),
            metadata.unwrap_or_default(),
        );
        session.status = SessionStatus::Active;

        TraceEvent::SessionCreated {
            session_id: session.session_id.clone(),
            client_id: client_id.clone(),
        }
        .emit();

        sessions.insert(session.session_id.clone(), session.clone());
        Ok(session)
    }

    /// Look up a session by id. If its absolute deadline has passed, its
    /// status is lazily promoted to `Expired` before returning it.
    pub fn get(&self, session_id: &str) -> Option<Session> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(session_id)?;
        if session.promote_if_expired() {
            TraceEvent::SessionExpired {
                session_id: session.session_id.clone(),
            }
            .emit();
        }
        Some(session.clone())
    }

    /// Like [`Self::get`], but only returns the session when it is
    /// currently active (not expired, not closed, not paused).
    pub fn get_active(&self, session_id: &str) -> Option<Session> {
        let session = self.get(session_id)?;
        if session.is_active() {
            Some(session)
        } else {
            None
        }
    }

    /// Apply a mutation to a stored session and persist the result. Used by
    /// callers (the orchestrator, the stream handler) that need to append
    /// tasks or touch a session as part of a turn.
    pub fn mutate<F, T>(&self, session_id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Session) -> T,
    {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        if session.promote_if_expired() {
            TraceEvent::SessionExpired {
                session_id: session.session_id.clone(),
            }
            .emit();
            return Err(Error::SessionExpired(session_id.to_string()));
        }
        Ok(f(session))
    }

    /// Transition a session to `Closed`. Idempotent.
    pub fn close(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        if session.status != SessionStatus::Closed {
            let tenure_ms = (Utc::now() - session.created_at).num_milliseconds();
            tracing::info!(
                session_id = %session.session_id,
                tenure_ms,
                task_count = session.tasks.len(),
                "session closed"
            );
            session.status = SessionStatus::Closed;
            session.touch();
            TraceEvent::SessionClosed {
                session_id: session.session_id.clone(),
                reason: "client_close".into(),
            }
            .emit();
        }
        Ok(())
    }

    pub fn delete(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write();
        sessions
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    pub fn list(&self, client_id: Option<&str>, status: Option<SessionStatus>) -> Vec<Session> {
        self.sessions
            .read()
            .values()
            .filter(|s| client_id.map(|c| c == s.client_id).unwrap_or(true))
            .filter(|s| status.map(|st| st == s.status).unwrap_or(true))
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Start the background sweep task. No-op if already started.
    pub fn start(self: &Arc<Self>) {
        if self.sweep.read().is_some() {
            return;
        }
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let this = Arc::clone(self);
        let interval_secs = this.config.cleanup_interval_secs.max(1);
        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            interval.tick().await; // first tick fires immediately; skip it
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let mut sessions = this.sessions.write();
                        sweep_locked(&mut sessions);
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });
        *self.sweep.write() = Some(SweepHandle { stop_tx, join });
    }

    /// Stop the background sweep task and await its exit. No-op if not
    /// running.
    pub async fn stop(&self) {
        let handle = self.sweep.write().take();
        if let Some(handle) = handle {
            let _ = handle.stop_tx.send(true);
            let _ = handle.join.await;
        }
    }
}

fn sweep_locked(sessions: &mut HashMap<String, Session>) {
    sessions.retain(|_, s| {
        let expired = s.is_expired();
        let closed = s.status == SessionStatus::Closed;
        !(expired || closed)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with(max_sessions: usize, timeout_seconds: u64) -> Arc<SessionManager> {
        let mut cfg = SessionManagerConfig::default();
        cfg.max_sessions = max_sessions;
        cfg.defaults.timeout_seconds = timeout_seconds;
        cfg.cleanup_interval_secs = 1;
        SessionManager::new(cfg)
    }

    #[test]
    fn create_and_get_roundtrip() {
        let mgr = manager_with(10, 3600);
        let s = mgr.create("client-1", None, None).unwrap();
        let fetched = mgr.get(&s.session_id).unwrap();
        assert_eq!(fetched.session_id, s.session_id);
        assert!(fetched.is_active());
    }

    #[test]
    fn admission_bound_is_enforced() {
        let mgr = manager_with(2, 3600);
        mgr.create("a", None, None).unwrap();
        mgr.create("b", None, None).unwrap();
        let err = mgr.create("c", None, None).unwrap_err();
        assert_eq!(err.code(), 3002);
    }

    #[test]
    fn expired_session_frees_a_slot_on_next_create() {
        let mgr = manager_with(1, 0);
        let first = mgr.create("a", None, None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(mgr.get(&first.session_id).unwrap().status == SessionStatus::Expired);
        // capacity-full create triggers a sweep that reclaims the expired slot.
        let second = mgr.create("b", None, None).unwrap();
        assert_eq!(mgr.count(), 1);
        assert_ne!(second.session_id, first.session_id);
    }

    #[test]
    fn close_is_idempotent() {
        let mgr = manager_with(10, 3600);
        let s = mgr.create("a", None, None).unwrap();
        mgr.close(&s.session_id).unwrap();
        mgr.close(&s.session_id).unwrap();
        assert_eq!(mgr.get(&s.session_id).unwrap().status, SessionStatus::Closed);
    }

    #[test]
    fn delete_missing_session_errors() {
        let mgr = manager_with(10, 3600);
        let err = mgr.delete("nonexistent").unwrap_err();
        assert_eq!(err.code(), 1003);
    }

    #[test]
    fn list_filters_by_client_id() {
        let mgr = manager_with(10, 3600);
        mgr.create("a", None, None).unwrap();
        mgr.create("b", None, None).unwrap();
        let only_a = mgr.list(Some("a"), None);
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].client_id, "a");
    }

    #[tokio::test]
    async fn sweep_lifecycle_starts_and_stops_cleanly() {
        let mgr = manager_with(10, 3600);
        mgr.start();
        mgr.start(); // second start is a no-op
        mgr.stop().await;
    }

    #[test]
    fn mutate_errors_on_expired_session() {
        let mgr = manager_with(10, 0);
        let s = mgr.create("a", None, None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let result = mgr.mutate(&s.session_id, |sess| sess.touch());
        assert!(matches!(result, Err(Error::SessionExpired(_))));
    }
}
