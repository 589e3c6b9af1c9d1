//! Cooperative cancellation of in-flight tool calls.
//!
//! Every `tools/call` registers a [`CancellationHandle`] under its session id and
//! request id. A `cancel` request (or `notifications/cancelled`) on the same
//! session signals that handle; handlers observe it through
//! [`crate::ToolContext::cancellation`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dbmcp_json_rpc_server::RequestId;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

/// A cooperative cancellation handle.
///
/// Wraps a `tokio::sync::watch` channel. Clones share state, so the registry
/// entry and the running handler see the same signal.
#[derive(Clone, Debug)]
pub struct CancellationHandle {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancellationHandle {
    /// Create a new (not-yet-cancelled) handle.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until cancellation is requested.
    ///
    /// Returns immediately if already cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as any clone, so this only fails on shutdown
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

type CallKey = (String, RequestId);

/// Table of tool calls currently executing, keyed by session and request id
#[derive(Debug, Default)]
pub struct InFlightCalls {
    calls: Mutex<HashMap<CallKey, (u64, CancellationHandle)>>,
    next_generation: AtomicU64,
}

impl InFlightCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a call until the returned guard is dropped.
    ///
    /// A client reusing a request id replaces the older entry; the older guard
    /// then leaves the newer entry alone when it drops.
    pub fn begin(self: &Arc<Self>, session_id: &str, request_id: RequestId) -> InFlightGuard {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let handle = CancellationHandle::new();
        let key = (session_id.to_string(), request_id);
        self.calls
            .lock()
            .insert(key.clone(), (generation, handle.clone()));

        InFlightGuard {
            calls: Arc::clone(self),
            key,
            generation,
            handle,
        }
    }

    /// Signal the call `request_id` of `session_id`. Returns false if no such call runs.
    pub fn cancel(&self, session_id: &str, request_id: &RequestId) -> bool {
        let key = (session_id.to_string(), request_id.clone());
        match self.calls.lock().get(&key) {
            Some((_, handle)) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Signal every call of one session. Returns the number of calls signalled.
    pub fn cancel_session(&self, session_id: &str) -> usize {
        let calls = self.calls.lock();
        let mut count = 0;
        for ((owner, _), (_, handle)) in calls.iter() {
            if owner == session_id {
                handle.cancel();
                count += 1;
            }
        }
        if count > 0 {
            debug!(session = %session_id, "Cancelled {} in-flight call(s)", count);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registration of one running call; removes it from the table on drop
#[derive(Debug)]
pub struct InFlightGuard {
    calls: Arc<InFlightCalls>,
    key: CallKey,
    generation: u64,
    handle: CancellationHandle,
}

impl InFlightGuard {
    pub fn handle(&self) -> &CancellationHandle {
        &self.handle
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut calls = self.calls.calls.lock();
        if calls
            .get(&self.key)
            .is_some_and(|(generation, _)| *generation == self.generation)
        {
            calls.remove(&self.key);
        }
    }
}
