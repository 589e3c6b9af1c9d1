//! Newline-delimited JSON transport over a reader/writer pair.
//!
//! One session for the lifetime of the transport. Each inbound line is
//! dispatched on its own task so a slow tool never stalls reading. All output
//! (responses and notifications) flows through the session's queue into a
//! single writer task, which writes one complete frame plus `\n` and flushes
//! before taking the next. Nothing else may write to the output stream.

use std::future::Future;
use std::io::Read;
use std::sync::Arc;

use dbmcp_json_rpc_server::dispatch::encode_error;
use dbmcp_json_rpc_server::{JsonRpcDispatcher, JsonRpcErrorObject, SessionContext};
use dbmcp_protocol::McpError;
use dbmcp_session::{Session, SessionEvent, SessionManager};
use serde_json::json;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, DuplexStream,
};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::cancellation::InFlightCalls;

/// Lines dispatched concurrently before reading pauses
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

const WRITE_BUFFER_SIZE: usize = 32 * 1024;

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Payloads above this size are logged by length only
const LOG_PAYLOAD_LIMIT: usize = 500;

pub struct StdioTransport {
    dispatcher: Arc<JsonRpcDispatcher<McpError>>,
    sessions: Arc<SessionManager>,
    calls: Arc<InFlightCalls>,
    max_in_flight: usize,
}

impl StdioTransport {
    pub fn new(
        dispatcher: Arc<JsonRpcDispatcher<McpError>>,
        sessions: Arc<SessionManager>,
        calls: Arc<InFlightCalls>,
    ) -> Self {
        Self {
            dispatcher,
            sessions,
            calls,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Serve until the reader reaches end of input
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.serve_until(reader, writer, std::future::pending()).await
    }

    /// Serve until end of input or until `shutdown` resolves.
    ///
    /// On end of input, calls already running are allowed to finish and their
    /// responses are written. On shutdown they are cancelled first.
    pub async fn serve_until<R, W, F>(&self, reader: R, writer: W, shutdown: F) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
        F: Future<Output = ()>,
    {
        let session = self.sessions.create_session().await;
        let (_conn_id, rx) = session.connect(self.sessions.event_buffer());
        let writer_task = tokio::spawn(write_frames(writer, rx));
        info!(session = %session.id(), "Stdio transport started");

        let limit = Arc::new(Semaphore::new(self.max_in_flight));
        let mut in_flight = JoinSet::new();
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        tokio::pin!(shutdown);

        let outcome = loop {
            line.clear();
            let read = tokio::select! {
                read = reader.read_until(b'\n', &mut line) => read,
                _ = &mut shutdown => {
                    info!("Shutdown requested, cancelling in-flight calls");
                    self.calls.cancel_session(session.id());
                    break Ok(());
                }
            };
            match read {
                Ok(0) => {
                    info!("End of input, shutting down stdio transport");
                    break Ok(());
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Failed to read from input: {}", e);
                    break Err(e.into());
                }
            }
            while in_flight.try_join_next().is_some() {}

            let Ok(text) = std::str::from_utf8(&line) else {
                warn!("Input line is not valid UTF-8");
                let error = JsonRpcErrorObject::parse_error(Some(json!("Invalid UTF-8")));
                let frame = encode_error(None, error);
                send_frame(&session, frame).await;
                continue;
            };
            let payload = text.trim();
            if payload.is_empty() {
                continue;
            }
            log_payload("<-", payload);

            let Ok(permit) = Arc::clone(&limit).acquire_owned().await else {
                break Ok(());
            };
            let payload = payload.to_string();
            let dispatcher = Arc::clone(&self.dispatcher);
            let session = Arc::clone(&session);
            in_flight.spawn(async move {
                let ctx = SessionContext::new(session.id())
                    .with_metadata("transport", json!("stdio"));
                let outcome = dispatcher.handle_message(&payload, ctx).await;
                if let Some(frame) = outcome.to_json_string() {
                    send_frame(&session, frame).await;
                }
                drop(permit);
            });
        };

        while in_flight.join_next().await.is_some() {}
        self.sessions.remove_session(session.id()).await;

        match writer_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Output writer stopped with error: {}", e),
            Err(e) => warn!("Output writer task failed: {}", e),
        }
        info!(session = %session.id(), "Stdio transport stopped");
        outcome
    }
}

/// Pump a blocking source into an async stream from a detached OS thread.
///
/// The thread is not owned by the runtime, so dropping the runtime never waits
/// on a parked read. It exits at end of input or once the stream is dropped.
pub fn detached_reader<R>(mut source: R) -> std::io::Result<DuplexStream>
where
    R: Read + Send + 'static,
{
    let handle = tokio::runtime::Handle::current();
    let (reader, mut writer) = tokio::io::duplex(WRITE_BUFFER_SIZE);
    std::thread::Builder::new()
        .name("dbmcp-stdin".to_string())
        .spawn(move || {
            let mut chunk = vec![0u8; READ_CHUNK_SIZE];
            loop {
                let n = match source.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!("Failed to read from input: {}", e);
                        break;
                    }
                };
                if handle.block_on(writer.write_all(&chunk[..n])).is_err() {
                    break;
                }
            }
        })?;
    Ok(reader)
}

async fn send_frame(session: &Session, frame: String) {
    log_payload("->", &frame);
    if let Err(e) = session.send_message(frame).await {
        warn!(session = %session.id(), "Dropping outbound frame: {}", e);
    }
}

fn log_payload(direction: &str, payload: &str) {
    if payload.len() > LOG_PAYLOAD_LIMIT {
        debug!("{} {} bytes", direction, payload.len());
    } else {
        debug!("{} {}", direction, payload);
    }
}

/// Sole writer of the output stream
async fn write_frames<W>(writer: W, mut rx: mpsc::Receiver<SessionEvent>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, writer);
    while let Some(event) = rx.recv().await {
        match event {
            SessionEvent::Message(frame) => {
                writer.write_all(frame.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
            SessionEvent::Close => break,
        }
    }
    writer.flush().await?;
    writer.shutdown().await
}
