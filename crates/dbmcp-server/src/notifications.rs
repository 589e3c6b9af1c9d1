//! Server-initiated notifications.
//!
//! A notification is encoded once and pushed through the target session's
//! outbound queue, so it can land between two responses but never inside one.
//! Sessions that have not completed `initialize` never receive anything.
//! Delivery never waits: a session whose queue is full misses the notification
//! instead of holding up every other session.

use std::sync::Arc;

use dbmcp_json_rpc_server::dispatch::encode_notification;
use dbmcp_protocol::notifications::methods;
use dbmcp_session::{Session, SessionManager};
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::registry::{RegistryEvent, ToolRegistry};

/// Directed and fan-out delivery of notifications to sessions
#[derive(Clone)]
pub struct NotificationBus {
    sessions: Arc<SessionManager>,
}

impl NotificationBus {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    /// Send one notification to `session`.
    ///
    /// Returns false when the session is not initialized (the notification is
    /// dropped, not queued), when its queue is full or when its transport is gone.
    pub async fn notify(&self, session: &Session, method: &str, params: Value) -> bool {
        if !session.is_initialized() {
            debug!(
                session = %session.id(),
                method = %method,
                "Dropping notification for uninitialized session"
            );
            return false;
        }

        let frame = encode_notification(method, params);
        match session.try_send_message(frame) {
            Ok(()) => {
                debug!(session = %session.id(), method = %method, "Notification sent");
                true
            }
            Err(e) => {
                warn!(
                    session = %session.id(),
                    method = %method,
                    "Notification not delivered: {}",
                    e
                );
                false
            }
        }
    }

    /// Like [`Self::notify`], resolving the session by id
    pub async fn notify_session(&self, session_id: &str, method: &str, params: Value) -> bool {
        match self.sessions.peek_session(session_id).await {
            Some(session) => self.notify(&session, method, params).await,
            None => {
                debug!(session = %session_id, method = %method, "Notification for unknown session");
                false
            }
        }
    }

    /// Send to every initialized session. Returns the number of deliveries.
    pub async fn broadcast(&self, method: &str, params: Value) -> usize {
        let mut delivered = 0;
        for session in self.sessions.initialized_sessions().await {
            if self.notify(&session, method, params.clone()).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Forward registry changes as `notifications/tools/list_changed`.
    ///
    /// The task ends when the registry is dropped.
    pub fn spawn_registry_forwarder(&self, registry: &ToolRegistry) -> JoinHandle<()> {
        let mut events = registry.subscribe();
        let bus = self.clone();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let tool = match &event {
                            RegistryEvent::Registered(name) | RegistryEvent::Deregistered(name) => {
                                name.as_str()
                            }
                        };
                        let delivered = bus.broadcast(methods::TOOLS_LIST_CHANGED, json!({})).await;
                        info!(tool = %tool, "Tool list changed, notified {} session(s)", delivered);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // One notification covers any number of missed changes
                        debug!("Registry forwarder skipped {} event(s)", skipped);
                        bus.broadcast(methods::TOOLS_LIST_CHANGED, json!({})).await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
