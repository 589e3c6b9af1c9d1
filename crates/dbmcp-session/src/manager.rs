use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{Result, Session, SessionError};

/// Default capacity of a session's outbound queue
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Owns every live session
#[derive(Debug)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    event_buffer: usize,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::with_event_buffer(DEFAULT_EVENT_BUFFER)
    }

    pub fn with_event_buffer(event_buffer: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            event_buffer: event_buffer.max(1),
        }
    }

    /// Capacity transports should use for a session's outbound queue
    pub fn event_buffer(&self) -> usize {
        self.event_buffer
    }

    /// Allocate and register a session with a fresh id
    pub async fn create_session(&self) -> Arc<Session> {
        let session = Arc::new(Session::new());
        self.sessions
            .write()
            .await
            .insert(session.id().to_string(), session.clone());
        debug!(session = %session.id(), "Session created");
        session
    }

    /// Look up a session on behalf of client activity; refreshes `last_active_at`
    pub async fn get_session(&self, session_id: &str) -> Result<Arc<Session>> {
        let session = self
            .peek_session(session_id)
            .await
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        session.touch();
        Ok(session)
    }

    /// Look up a session without counting it as activity
    pub async fn peek_session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Disconnect and forget a session. Unknown ids are a no-op.
    pub async fn remove_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id);
        match removed {
            Some(session) => {
                session.disconnect();
                debug!(session = %session_id, "Session removed");
                true
            }
            None => false,
        }
    }

    /// Evict disconnected sessions idle for longer than `max_age`
    pub async fn cleanup_sessions(&self, max_age: Duration) -> Vec<String> {
        self.cleanup_sessions_at(Utc::now(), max_age).await
    }

    /// [`SessionManager::cleanup_sessions`] against an explicit clock reading.
    ///
    /// Connected sessions are never evicted, however old.
    pub async fn cleanup_sessions_at(&self, now: DateTime<Utc>, max_age: Duration) -> Vec<String> {
        let max_age = TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX);
        let mut sessions = self.sessions.write().await;

        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| !s.is_connected() && now - s.last_active_at() > max_age)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(session) = sessions.remove(id) {
                session.disconnect();
            }
        }
        drop(sessions);

        if !expired.is_empty() {
            info!("Cleaned up {} expired sessions", expired.len());
        }
        expired
    }

    /// Run [`SessionManager::cleanup_sessions`] every `interval` until aborted
    pub fn start_cleanup_task(
        self: Arc<Self>,
        interval: Duration,
        max_age: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.cleanup_sessions(max_age).await;
            }
        })
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn session_ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Snapshot of every session that completed the initialize handshake
    pub async fn initialized_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.is_initialized())
            .cloned()
            .collect()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_create_get_remove() {
        let manager = SessionManager::new();
        let session = manager.create_session().await;
        let id = session.id().to_string();

        assert_eq!(manager.get_session(&id).await.unwrap().id(), id);
        assert!(manager.remove_session(&id).await);
        assert_eq!(
            manager.get_session(&id).await.unwrap_err(),
            SessionError::NotFound(id.clone())
        );
        // idempotent
        assert!(!manager.remove_session(&id).await);
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_session_ids_are_unique() {
        let manager = SessionManager::new();
        let mut ids = HashSet::new();
        for _ in 0..100 {
            assert!(ids.insert(manager.create_session().await.id().to_string()));
        }
        assert_eq!(manager.session_count().await, 100);
    }

    #[tokio::test]
    async fn test_get_touches_but_peek_does_not() {
        let manager = SessionManager::new();
        let session = manager.create_session().await;
        let old = Utc::now() - TimeDelta::hours(1);
        session.touch_at(old);

        manager.peek_session(session.id()).await.unwrap();
        assert_eq!(session.last_active_at(), old);

        manager.get_session(session.id()).await.unwrap();
        assert!(session.last_active_at() > old);
    }

    #[tokio::test]
    async fn test_cleanup_evicts_stale_disconnected_sessions() {
        let manager = SessionManager::new();
        let now = Utc::now();

        let stale = manager.create_session().await;
        stale.touch_at(now - TimeDelta::hours(2));
        let fresh = manager.create_session().await;
        fresh.touch_at(now - TimeDelta::minutes(1));

        let removed = manager
            .cleanup_sessions_at(now, Duration::from_secs(3600))
            .await;

        assert_eq!(removed, vec![stale.id().to_string()]);
        assert!(manager.peek_session(stale.id()).await.is_none());
        assert!(manager.peek_session(fresh.id()).await.is_some());
    }

    #[tokio::test]
    async fn test_cleanup_never_evicts_connected_sessions() {
        let manager = SessionManager::new();
        let now = Utc::now();

        let live = manager.create_session().await;
        let (_conn, _rx) = live.connect(1);
        live.touch_at(now - TimeDelta::days(30));

        let removed = manager
            .cleanup_sessions_at(now, Duration::from_secs(1))
            .await;
        assert!(removed.is_empty());
        assert!(manager.peek_session(live.id()).await.is_some());
    }

    /// Drives a long pseudo-random sequence of create/remove/cleanup calls and
    /// checks that removed ids never come back and connected sessions survive.
    #[tokio::test]
    async fn test_manager_operation_sequences() {
        let manager = SessionManager::new();
        let mut live: Vec<Arc<Session>> = Vec::new();
        let mut receivers = Vec::new();
        let mut removed: HashSet<String> = HashSet::new();
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;

        for _ in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let now = Utc::now();

            match seed % 5 {
                0 | 1 => {
                    let session = manager.create_session().await;
                    if seed % 3 == 0 {
                        let (_, rx) = session.connect(1);
                        receivers.push(rx);
                    }
                    session.touch_at(now - TimeDelta::minutes((seed % 180) as i64));
                    live.push(session);
                }
                2 if !live.is_empty() => {
                    let victim = live.swap_remove((seed as usize) % live.len());
                    manager.remove_session(victim.id()).await;
                    removed.insert(victim.id().to_string());
                }
                _ => {
                    for id in manager
                        .cleanup_sessions_at(now, Duration::from_secs(3600))
                        .await
                    {
                        let idx = live.iter().position(|s| s.id() == id).unwrap();
                        let evicted = live.swap_remove(idx);
                        assert!(!evicted.is_connected());
                        removed.insert(id);
                    }
                }
            }

            for id in &removed {
                assert!(manager.get_session(id).await.is_err());
            }
            for session in live.iter().filter(|s| s.is_connected()) {
                assert!(manager.peek_session(session.id()).await.is_some());
            }
        }
    }

    #[tokio::test]
    async fn test_initialized_sessions_snapshot() {
        let manager = SessionManager::new();
        let a = manager.create_session().await;
        let _b = manager.create_session().await;
        a.mark_initialized();

        let ready = manager.initialized_sessions().await;
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id(), a.id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_runs_periodically() {
        let manager = Arc::new(SessionManager::new());
        let stale = manager.create_session().await;
        stale.touch_at(Utc::now() - TimeDelta::hours(2));

        let handle = manager
            .clone()
            .start_cleanup_task(Duration::from_secs(60), Duration::from_secs(3600));
        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        assert_eq!(manager.session_count().await, 0);
        handle.abort();
    }
}
