//! # Session State for dbmcp Transports
//!
//! One [`Session`] per logical client connection, owned by a [`SessionManager`].
//!
//! Every transport delivers outbound frames through the same abstraction: a
//! bounded per-session queue of [`SessionEvent`]s drained by exactly one writer.
//! Request handlers, the notification bus and the heartbeat may all call
//! [`Session::send_event`] concurrently; each event reaches the wire as one
//! complete frame because only the transport's writer touches the byte stream.

mod manager;
mod session;

pub use manager::{DEFAULT_EVENT_BUFFER, SessionManager};
pub use session::{Session, SessionEvent};

/// Session layer errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session {0} has no attached transport")]
    NotConnected(String),

    #[error("Outbound sink for session {0} is closed")]
    SinkClosed(String),

    #[error("Outbound queue for session {0} is full")]
    QueueFull(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
