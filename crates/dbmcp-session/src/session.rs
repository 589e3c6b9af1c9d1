use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{Result, SessionError};

/// One unit of outbound traffic for a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A complete JSON-RPC frame (response or notification)
    Message(String),
    /// Ask the transport to close the stream
    Close,
}

#[derive(Debug)]
struct SessionState {
    last_active_at: DateTime<Utc>,
    connected: bool,
    initialized: bool,
    capabilities: Map<String, Value>,
    data: Map<String, Value>,
}

#[derive(Debug)]
struct Sink {
    conn_id: u64,
    sender: mpsc::Sender<SessionEvent>,
}

/// Server-side state of one logical client connection
#[derive(Debug)]
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    state: RwLock<SessionState>,
    sink: Mutex<Option<Sink>>,
    next_conn_id: AtomicU64,
}

impl Session {
    pub(crate) fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            state: RwLock::new(SessionState {
                last_active_at: now,
                connected: false,
                initialized: false,
                capabilities: Map::new(),
                data: Map::new(),
            }),
            sink: Mutex::new(None),
            next_conn_id: AtomicU64::new(1),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_active_at(&self) -> DateTime<Utc> {
        self.state.read().last_active_at
    }

    pub fn is_connected(&self) -> bool {
        self.state.read().connected
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().initialized
    }

    /// Record client activity
    pub fn touch(&self) {
        self.touch_at(Utc::now());
    }

    /// Record activity at an explicit instant
    pub fn touch_at(&self, at: DateTime<Utc>) {
        self.state.write().last_active_at = at;
    }

    /// Flip `initialized` to true. Returns false if it was already set.
    pub fn mark_initialized(&self) -> bool {
        let mut state = self.state.write();
        if state.initialized {
            return false;
        }
        state.initialized = true;
        true
    }

    pub fn capabilities(&self) -> Map<String, Value> {
        self.state.read().capabilities.clone()
    }

    /// Merge client capabilities into the stored set, later keys win
    pub fn merge_capabilities(&self, capabilities: Map<String, Value>) {
        self.state.write().capabilities.extend(capabilities);
    }

    pub fn get_data(&self, key: &str) -> Option<Value> {
        self.state.read().data.get(key).cloned()
    }

    pub fn set_data(&self, key: impl Into<String>, value: Value) {
        self.state.write().data.insert(key.into(), value);
    }

    pub fn remove_data(&self, key: &str) -> Option<Value> {
        self.state.write().data.remove(key)
    }

    /// Attach an outbound sink, replacing any previous one.
    ///
    /// Returns the connection id that must be handed back to [`Session::detach`].
    pub fn attach(&self, sender: mpsc::Sender<SessionEvent>) -> u64 {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        // `connected` is only written under the sink lock so it always agrees with the sink
        let mut sink = self.sink.lock();
        *sink = Some(Sink { conn_id, sender });
        let mut state = self.state.write();
        state.connected = true;
        state.last_active_at = Utc::now();
        drop(state);
        drop(sink);
        debug!(session = %self.id, conn_id, "Transport attached");
        conn_id
    }

    /// Create a bounded queue and attach its sending half
    pub fn connect(&self, capacity: usize) -> (u64, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (self.attach(tx), rx)
    }

    /// Detach the sink if `conn_id` still owns it.
    ///
    /// A stale connection (one replaced by a later `attach`) detaches nothing.
    pub fn detach(&self, conn_id: u64) -> bool {
        let mut sink = self.sink.lock();
        if sink.as_ref().is_some_and(|s| s.conn_id == conn_id) {
            *sink = None;
            self.state.write().connected = false;
            drop(sink);
            debug!(session = %self.id, conn_id, "Transport detached");
            true
        } else {
            false
        }
    }

    /// Drop the sink unconditionally and mark the session disconnected
    pub fn disconnect(&self) {
        let mut sink = self.sink.lock();
        sink.take();
        self.state.write().connected = false;
    }

    /// Push one event to the attached transport.
    ///
    /// Safe to call from any number of tasks; the transport writer receives the
    /// events one at a time. Waits while the queue is full.
    pub async fn send_event(&self, event: SessionEvent) -> Result<()> {
        let (conn_id, sender) = {
            let sink = self.sink.lock();
            match sink.as_ref() {
                Some(s) => (s.conn_id, s.sender.clone()),
                None => return Err(SessionError::NotConnected(self.id.clone())),
            }
        };

        if sender.send(event).await.is_err() {
            warn!(session = %self.id, "Outbound sink closed, marking session disconnected");
            self.detach(conn_id);
            return Err(SessionError::SinkClosed(self.id.clone()));
        }
        self.touch();
        Ok(())
    }

    /// Push one complete JSON frame
    pub async fn send_message(&self, frame: impl Into<String>) -> Result<()> {
        self.send_event(SessionEvent::Message(frame.into())).await
    }

    /// Push one frame without waiting.
    ///
    /// A full queue rejects the frame with [`SessionError::QueueFull`] and
    /// leaves the sink attached.
    pub fn try_send_message(&self, frame: impl Into<String>) -> Result<()> {
        let (conn_id, sender) = {
            let sink = self.sink.lock();
            match sink.as_ref() {
                Some(s) => (s.conn_id, s.sender.clone()),
                None => return Err(SessionError::NotConnected(self.id.clone())),
            }
        };

        match sender.try_send(SessionEvent::Message(frame.into())) {
            Ok(()) => {
                self.touch();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(SessionError::QueueFull(self.id.clone()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(session = %self.id, "Outbound sink closed, marking session disconnected");
                self.detach(conn_id);
                Err(SessionError::SinkClosed(self.id.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_send_without_sink_fails() {
        let session = Session::new();
        let err = session.send_message("{}").await.unwrap_err();
        assert_eq!(err, SessionError::NotConnected(session.id().to_string()));
    }

    #[tokio::test]
    async fn test_send_event_delivers_and_touches() {
        let session = Session::new();
        let (_conn, mut rx) = session.connect(4);
        assert!(session.is_connected());

        let before = session.last_active_at();
        session.send_message(r#"{"a":1}"#).await.unwrap();
        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::Message(r#"{"a":1}"#.to_string()))
        );
        assert!(session.last_active_at() >= before);
    }

    #[tokio::test]
    async fn test_closed_sink_marks_disconnected() {
        let session = Session::new();
        let (_conn, rx) = session.connect(4);
        drop(rx);

        let err = session.send_message("{}").await.unwrap_err();
        assert!(matches!(err, SessionError::SinkClosed(_)));
        assert!(!session.is_connected());
    }

    #[test]
    fn test_stale_detach_is_ignored() {
        let session = Session::new();
        let (first, _rx1) = session.connect(1);
        let (second, _rx2) = session.connect(1);

        assert!(!session.detach(first));
        assert!(session.is_connected());
        assert!(session.detach(second));
        assert!(!session.is_connected());
    }

    #[test]
    fn test_connected_flag_tracks_sink_under_contention() {
        let session = Arc::new(Session::new());

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let session = Arc::clone(&session);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let (conn, _rx) = session.connect(1);
                        session.detach(conn);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(session.is_connected(), session.sink.lock().is_some());

        let (conn, _rx) = session.connect(1);
        assert!(session.is_connected());
        assert!(session.detach(conn));
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_try_send_rejects_when_full() {
        let session = Session::new();
        let (_conn, mut rx) = session.connect(1);

        session.try_send_message("1").unwrap();
        assert_eq!(
            session.try_send_message("2"),
            Err(SessionError::QueueFull(session.id().to_string()))
        );
        assert!(session.is_connected());

        assert_eq!(rx.recv().await, Some(SessionEvent::Message("1".into())));
        session.try_send_message("3").unwrap();

        drop(rx);
        assert!(matches!(session.try_send_message("4"), Err(SessionError::SinkClosed(_))));
        assert!(!session.is_connected());
    }

    #[test]
    fn test_initialized_is_set_once() {
        let session = Session::new();
        assert!(!session.is_initialized());
        assert!(session.mark_initialized());
        assert!(!session.mark_initialized());
        assert!(session.is_initialized());
    }

    #[test]
    fn test_capabilities_merge_and_data() {
        let session = Session::new();
        let mut first = Map::new();
        first.insert("tools".into(), json!(true));
        first.insert("roots".into(), json!({"listChanged": false}));
        session.merge_capabilities(first);

        let mut second = Map::new();
        second.insert("roots".into(), json!({"listChanged": true}));
        session.merge_capabilities(second);

        let caps = session.capabilities();
        assert_eq!(caps.get("tools"), Some(&json!(true)));
        assert_eq!(caps.get("roots"), Some(&json!({"listChanged": true})));

        session.set_data("editorContext", json!({"file": "main.rs"}));
        assert_eq!(
            session.get_data("editorContext"),
            Some(json!({"file": "main.rs"}))
        );
        assert!(session.remove_data("editorContext").is_some());
        assert!(session.get_data("editorContext").is_none());
    }

    #[tokio::test]
    async fn test_concurrent_senders_produce_whole_events() {
        let session = Arc::new(Session::new());
        let (_conn, mut rx) = session.connect(8);

        let mut tasks = Vec::new();
        for i in 0..16 {
            let session = session.clone();
            tasks.push(tokio::spawn(async move {
                session.send_message(format!(r#"{{"n":{i}}}"#)).await
            }));
        }

        let mut seen = Vec::new();
        for _ in 0..16 {
            let Some(SessionEvent::Message(frame)) = rx.recv().await else {
                panic!("expected message");
            };
            let value: Value = serde_json::from_str(&frame).unwrap();
            seen.push(value["n"].as_i64().unwrap());
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        seen.sort();
        assert_eq!(seen, (0..16).collect::<Vec<_>>());
    }
}
