//! Request routing for the HTTP+SSE transport

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use http_body::{Body, Frame};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::header::{ACCEPT, CACHE_CONTROL, CONNECTION, CONTENT_TYPE, HeaderValue};
use hyper::{Method, Request, Response, StatusCode, Uri};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info, warn};

use dbmcp_json_rpc_server::{JsonRpcDispatcher, JsonRpcError, SessionContext};
use dbmcp_protocol::McpError;
use dbmcp_session::{Session, SessionEvent, SessionManager};

use crate::{CorsLayer, ServerConfig, SseEvent};

/// Response body shared by every route
pub type McpBody = UnsyncBoxBody<Bytes, Infallible>;

/// Header carrying the session id on the stream response
pub const SESSION_ID_HEADER: &str = "Mcp-Session-Id";

/// Payloads above this size are logged by length only
const LOG_PAYLOAD_LIMIT: usize = 500;

/// SSE body for one attached session.
///
/// Dropping it (client went away, or hyper failed a write) detaches the
/// session's sink, leaving the session to the reaper.
pub struct SessionSseStream {
    stream: Pin<Box<dyn Stream<Item = Bytes> + Send>>,
    session: Arc<Session>,
    conn_id: u64,
}

impl SessionSseStream {
    pub fn new<S>(stream: S, session: Arc<Session>, conn_id: u64) -> Self
    where
        S: Stream<Item = Bytes> + Send + 'static,
    {
        Self {
            stream: Box::pin(stream),
            session,
            conn_id,
        }
    }
}

impl Drop for SessionSseStream {
    fn drop(&mut self) {
        if self.session.detach(self.conn_id) {
            info!(session = %self.session.id(), "SSE stream closed");
        }
    }
}

impl Body for SessionSseStream {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<std::result::Result<Frame<Self::Data>, Self::Error>>> {
        self.stream
            .as_mut()
            .poll_next(cx)
            .map(|chunk| chunk.map(|data| Ok(Frame::data(data))))
    }
}

fn full_body(bytes: impl Into<Bytes>) -> McpBody {
    Full::new(bytes.into()).boxed_unsync()
}

fn text_response(status: StatusCode, message: &'static str) -> Response<McpBody> {
    let mut response = Response::new(full_body(message));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

fn json_response(status: StatusCode, body: String) -> Response<McpBody> {
    let mut response = Response::new(full_body(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Value of a query-string parameter, percent-decoded
pub(crate) fn query_param(uri: &Uri, name: &str) -> Option<String> {
    uri.query()?.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        (key == name)
            .then(|| urlencoding::decode(value).ok().map(|v| v.into_owned()))
            .flatten()
    })
}

fn log_payload(direction: &str, session_id: &str, payload: &str) {
    if payload.len() > LOG_PAYLOAD_LIMIT {
        debug!(session = %session_id, "{} {} bytes", direction, payload.len());
    } else {
        debug!(session = %session_id, "{} {}", direction, payload);
    }
}

/// Routes requests to the stream, message, status and preflight endpoints
#[derive(Clone)]
pub struct SseSessionHandler {
    config: Arc<ServerConfig>,
    dispatcher: Arc<JsonRpcDispatcher<McpError>>,
    sessions: Arc<SessionManager>,
}

impl SseSessionHandler {
    pub fn new(
        config: Arc<ServerConfig>,
        dispatcher: Arc<JsonRpcDispatcher<McpError>>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            config,
            dispatcher,
            sessions,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Handle one HTTP request. Never fails; problems become status codes.
    pub async fn handle_request<B>(&self, req: Request<B>) -> Response<McpBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let path = req.uri().path().to_string();
        debug!("Handling {} {}", req.method(), path);

        let mut response = match (req.method(), path.as_str()) {
            (&Method::OPTIONS, _) => text_response(StatusCode::OK, ""),
            (&Method::GET, p) if p == self.config.sse_path => self.handle_sse_request(req).await,
            (&Method::POST, p) if p == self.config.message_path => {
                self.handle_message_request(req).await
            }
            (&Method::GET, "/status") => self.handle_status().await,
            _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
        };

        if self.config.enable_cors {
            CorsLayer::apply_cors_headers(response.headers_mut());
        }
        response
    }

    async fn handle_status(&self) -> Response<McpBody> {
        let body = json!({
            "status": "ok",
            "mode": "sse",
            "sessions": self.sessions.session_count().await,
        });
        json_response(StatusCode::OK, body.to_string())
    }

    /// Open (or re-open) the event stream of a session
    async fn handle_sse_request<B>(&self, req: Request<B>) -> Response<McpBody> {
        let accept = req
            .headers()
            .get(ACCEPT)
            .and_then(|accept| accept.to_str().ok())
            .unwrap_or("");
        if !accept.contains("text/event-stream") {
            warn!("GET without 'text/event-stream' in Accept header");
            return text_response(
                StatusCode::BAD_REQUEST,
                "Accept header must include text/event-stream",
            );
        }

        let session = match query_param(req.uri(), "sessionId") {
            Some(id) => match self.sessions.get_session(&id).await {
                Ok(existing) => {
                    info!(session = %id, "Re-attaching SSE stream");
                    existing
                }
                Err(_) => self.sessions.create_session().await,
            },
            None => self.sessions.create_session().await,
        };
        let (conn_id, rx) = session.connect(self.sessions.event_buffer());
        info!(session = %session.id(), "SSE stream opened");

        let endpoint = format!(
            "{}{}?sessionId={}",
            self.config
                .base_url
                .as_deref()
                .unwrap_or("")
                .trim_end_matches('/'),
            self.config.message_path,
            session.id()
        );
        let stream = event_stream(endpoint, rx, self.config.heartbeat_interval);
        let body = SessionSseStream::new(stream, Arc::clone(&session), conn_id);

        let mut response = Response::new(body.boxed_unsync());
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        if let Ok(value) = HeaderValue::from_str(session.id()) {
            headers.insert(SESSION_ID_HEADER, value);
        }
        response
    }

    /// Accept one JSON-RPC message for a session
    async fn handle_message_request<B>(&self, req: Request<B>) -> Response<McpBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let Some(session_id) = query_param(req.uri(), "sessionId") else {
            return text_response(StatusCode::BAD_REQUEST, "Missing sessionId parameter");
        };
        let session = match self.sessions.get_session(&session_id).await {
            Ok(session) => session,
            Err(_) => {
                warn!(session = %session_id, "POST for unknown session");
                return text_response(StatusCode::NOT_FOUND, "Session not found");
            }
        };

        let body_bytes = match Limited::new(req.into_body(), self.config.max_body_size)
            .collect()
            .await
        {
            Ok(collected) => collected.to_bytes(),
            Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
                warn!(session = %session_id, "Request body too large");
                return text_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
            }
            Err(err) => {
                warn!(session = %session_id, "Failed to read request body: {}", err);
                return text_response(StatusCode::BAD_REQUEST, "Failed to read request body");
            }
        };

        // Runs detached from this request so the response still reaches the
        // stream if the POST is dropped mid-call
        let dispatcher = Arc::clone(&self.dispatcher);
        let delivery = tokio::spawn(async move {
            let outcome = match std::str::from_utf8(&body_bytes) {
                Ok(text) => {
                    log_payload("<-", &session_id, text);
                    let ctx = SessionContext::new(session_id.clone())
                        .with_metadata("transport", json!("sse"));
                    dispatcher.handle_message(text, ctx).await
                }
                Err(_) => JsonRpcError::parse_error(Some("Invalid UTF-8".to_string())).into(),
            };

            let Some(frame) = outcome.to_json_string() else {
                return None;
            };
            log_payload("->", &session_id, &frame);
            if let Err(err) = session.send_message(frame.clone()).await {
                warn!(session = %session_id, "Response not delivered on stream: {}", err);
            }
            Some(frame)
        });

        match delivery.await {
            Ok(Some(frame)) if self.config.echo_response_body => {
                json_response(StatusCode::OK, frame)
            }
            Ok(_) => text_response(StatusCode::ACCEPTED, ""),
            Err(err) => {
                warn!("Message dispatch task failed: {}", err);
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
            }
        }
    }
}

/// Endpoint event, then queued session events interleaved with heartbeats.
///
/// Each yielded chunk is exactly one SSE event.
fn event_stream(
    endpoint: String,
    mut rx: mpsc::Receiver<SessionEvent>,
    heartbeat: std::time::Duration,
) -> impl Stream<Item = Bytes> + Send + 'static {
    async_stream::stream! {
        yield SseEvent::Endpoint(endpoint).to_bytes();

        let mut keepalive = interval_at(Instant::now() + heartbeat, heartbeat);
        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(SessionEvent::Message(frame)) => {
                            yield SseEvent::Message(frame).to_bytes();
                        }
                        Some(SessionEvent::Close) | None => break,
                    }
                },
                _ = keepalive.tick() => {
                    yield SseEvent::keepalive_now().to_bytes();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_param() {
        let uri: Uri = "/message?foo=1&sessionId=abc%2D1".parse().unwrap();
        assert_eq!(query_param(&uri, "sessionId").as_deref(), Some("abc-1"));
        assert_eq!(query_param(&uri, "foo").as_deref(), Some("1"));
        assert_eq!(query_param(&uri, "missing"), None);

        let bare: Uri = "/message".parse().unwrap();
        assert_eq!(query_param(&bare, "sessionId"), None);
    }
}
