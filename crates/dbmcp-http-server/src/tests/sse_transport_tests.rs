use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, StatusCode};
use serde_json::{Value, json};

use dbmcp_json_rpc_server::{JsonRpcDispatcher, JsonRpcHandler, RequestParams, SessionContext};
use dbmcp_protocol::McpError;
use dbmcp_session::SessionManager;

use crate::{McpBody, ServerConfig, SseSessionHandler};

struct TestHandler;

#[async_trait]
impl JsonRpcHandler for TestHandler {
    type Error = McpError;

    async fn handle(
        &self,
        method: &str,
        params: Option<RequestParams>,
        _ctx: SessionContext,
    ) -> Result<Value, McpError> {
        match method {
            "slow_echo" => {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(params.map(|p| p.to_value()).unwrap_or(Value::Null))
            }
            _ => Ok(json!({})),
        }
    }
}

fn handler_with(config: ServerConfig) -> SseSessionHandler {
    let mut dispatcher = JsonRpcDispatcher::new();
    dispatcher.register_methods(vec!["slow_echo".to_string(), "ping".to_string()], TestHandler);
    SseSessionHandler::new(
        Arc::new(config),
        Arc::new(dispatcher),
        Arc::new(SessionManager::new()),
    )
}

fn handler() -> SseSessionHandler {
    handler_with(ServerConfig::default())
}

fn get(uri: &str, accept: &str) -> Request<Full<Bytes>> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("Accept", accept)
        .body(Full::new(Bytes::new()))
        .unwrap()
}

fn post(uri: &str, body: impl Into<Bytes>) -> Request<Full<Bytes>> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Full::new(body.into()))
        .unwrap()
}

async fn next_frame(body: &mut McpBody) -> Option<String> {
    let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
        .await
        .expect("stream produced nothing in time")?
        .unwrap();
    Some(String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap())
}

async fn body_string(body: McpBody) -> String {
    String::from_utf8(body.collect().await.unwrap().to_bytes().to_vec()).unwrap()
}

/// Opens a stream and returns its session id and body, endpoint event consumed
async fn open_stream(handler: &SseSessionHandler) -> (String, McpBody) {
    let response = handler
        .handle_request(get("/sse", "text/event-stream"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let session_id = response
        .headers()
        .get("Mcp-Session-Id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let mut body = response.into_body();
    let endpoint = next_frame(&mut body).await.unwrap();
    assert_eq!(
        endpoint,
        format!("event: endpoint\ndata: /message?sessionId={session_id}\n\n")
    );
    (session_id, body)
}

/// Payload of an `event: message` frame
fn message_payload(frame: &str) -> Option<Value> {
    let data = frame
        .strip_prefix("event: message\ndata: ")?
        .strip_suffix("\n\n")?;
    Some(serde_json::from_str(data).unwrap())
}

#[tokio::test]
async fn test_stream_headers_and_endpoint_event() {
    let handler = handler();
    let response = handler
        .handle_request(get("/sse", "text/event-stream"))
        .await;

    let headers = response.headers();
    assert_eq!(headers.get("Content-Type").unwrap(), "text/event-stream");
    assert_eq!(headers.get("Cache-Control").unwrap(), "no-cache");
    assert_eq!(headers.get("Access-Control-Allow-Origin").unwrap(), "*");

    let session_id = headers.get("Mcp-Session-Id").unwrap().to_str().unwrap();
    let session = handler.sessions().peek_session(session_id).await.unwrap();
    assert!(session.is_connected());
}

#[tokio::test]
async fn test_endpoint_event_uses_base_url() {
    let handler = handler_with(ServerConfig {
        base_url: Some("http://db.example:9092/".to_string()),
        ..Default::default()
    });
    let response = handler
        .handle_request(get("/sse", "text/event-stream"))
        .await;
    let mut body = response.into_body();
    let endpoint = next_frame(&mut body).await.unwrap();
    assert!(
        endpoint.starts_with("event: endpoint\ndata: http://db.example:9092/message?sessionId=")
    );
}

#[tokio::test]
async fn test_get_without_event_stream_accept_is_rejected() {
    let response = handler().handle_request(get("/sse", "application/json")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_post_requires_known_session() {
    let handler = handler();

    let response = handler
        .handle_request(post("/message", r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_string(response.into_body()).await,
        "Missing sessionId parameter"
    );

    let response = handler
        .handle_request(post(
            "/message?sessionId=nope",
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_string(response.into_body()).await, "Session not found");
}

#[tokio::test]
async fn test_response_is_delivered_on_stream_and_echoed_in_body() {
    let handler = handler();
    let (session_id, mut stream) = open_stream(&handler).await;

    let response = handler
        .handle_request(post(
            &format!("/message?sessionId={session_id}"),
            r#"{"jsonrpc":"2.0","id":"1","method":"ping"}"#,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let echoed = body_string(response.into_body()).await;

    let frame = next_frame(&mut stream).await.unwrap();
    assert_eq!(frame, format!("event: message\ndata: {echoed}\n\n"));
    assert_eq!(
        message_payload(&frame).unwrap(),
        json!({"jsonrpc": "2.0", "id": "1", "result": {}})
    );
}

#[tokio::test]
async fn test_response_body_duplicate_can_be_disabled() {
    let handler = handler_with(ServerConfig {
        echo_response_body: false,
        ..Default::default()
    });
    let (session_id, mut stream) = open_stream(&handler).await;

    let response = handler
        .handle_request(post(
            &format!("/message?sessionId={session_id}"),
            r#"{"jsonrpc":"2.0","id":5,"method":"ping"}"#,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(body_string(response.into_body()).await.is_empty());

    let frame = next_frame(&mut stream).await.unwrap();
    assert_eq!(message_payload(&frame).unwrap()["id"], 5);
}

#[tokio::test]
async fn test_response_reaches_stream_after_post_is_dropped() {
    let handler = handler();
    let (session_id, mut stream) = open_stream(&handler).await;

    let pending = handler.handle_request(post(
        &format!("/message?sessionId={session_id}"),
        r#"{"jsonrpc":"2.0","id":7,"method":"slow_echo","params":{"n":7}}"#,
    ));
    // The client hangs up while slow_echo is still running
    let abandoned = tokio::time::timeout(Duration::from_millis(10), pending).await;
    assert!(abandoned.is_err());

    let frame = next_frame(&mut stream).await.unwrap();
    let payload = message_payload(&frame).unwrap();
    assert_eq!(payload["id"], 7);
    assert_eq!(payload["result"], json!({"n": 7}));
}

#[tokio::test]
async fn test_notification_gets_accepted_without_stream_output() {
    let handler = handler();
    let (session_id, mut stream) = open_stream(&handler).await;

    let response = handler
        .handle_request(post(
            &format!("/message?sessionId={session_id}"),
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let nothing = tokio::time::timeout(Duration::from_millis(100), stream.frame()).await;
    assert!(nothing.is_err(), "notification must not produce a stream event");
}

#[tokio::test]
async fn test_malformed_json_yields_parse_error_and_session_survives() {
    let handler = handler();
    let (session_id, mut stream) = open_stream(&handler).await;
    let uri = format!("/message?sessionId={session_id}");

    let response = handler.handle_request(post(&uri, r#"{"bad json"#)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let frame = next_frame(&mut stream).await.unwrap();
    let error = message_payload(&frame).unwrap();
    assert_eq!(error["error"]["code"], -32700);
    assert!(error["id"].is_null());

    handler
        .handle_request(post(&uri, r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#))
        .await;
    let frame = next_frame(&mut stream).await.unwrap();
    assert_eq!(message_payload(&frame).unwrap()["id"], 2);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let handler = handler_with(ServerConfig {
        max_body_size: 64,
        ..Default::default()
    });
    let (session_id, _stream) = open_stream(&handler).await;

    let big = format!(
        r#"{{"jsonrpc":"2.0","id":1,"method":"ping","params":{{"pad":"{}"}}}}"#,
        "x".repeat(256)
    );
    let response = handler
        .handle_request(post(&format!("/message?sessionId={session_id}"), big))
        .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_preflight_status_and_unknown_paths() {
    let handler = handler();

    let preflight = Request::builder()
        .method("OPTIONS")
        .uri("/message")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = handler.handle_request(preflight).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("Access-Control-Allow-Methods"));

    let (_id, _stream) = open_stream(&handler).await;
    let response = handler.handle_request(get("/status", "*/*")).await;
    let status: Value = serde_json::from_str(&body_string(response.into_body()).await).unwrap();
    assert_eq!(status, json!({"status": "ok", "mode": "sse", "sessions": 1}));

    let response = handler.handle_request(get("/nowhere", "*/*")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_dropping_stream_disconnects_session() {
    let handler = handler();
    let (session_id, stream) = open_stream(&handler).await;
    let session = handler.sessions().peek_session(&session_id).await.unwrap();
    assert!(session.is_connected());

    drop(stream);
    assert!(!session.is_connected());
    // left for the reaper
    assert!(handler.sessions().peek_session(&session_id).await.is_some());
}

#[tokio::test]
async fn test_reattach_replaces_previous_stream() {
    let handler = handler();
    let (session_id, mut first) = open_stream(&handler).await;

    let response = handler
        .handle_request(get(
            &format!("/sse?sessionId={session_id}"),
            "text/event-stream",
        ))
        .await;
    assert_eq!(
        response.headers().get("Mcp-Session-Id").unwrap(),
        session_id.as_str()
    );
    let mut second = response.into_body();
    next_frame(&mut second).await.unwrap();

    // the first stream's queue was replaced, so it ends
    assert!(next_frame(&mut first).await.is_none());
    drop(first);

    let session = handler.sessions().peek_session(&session_id).await.unwrap();
    assert!(session.is_connected());
    assert_eq!(handler.sessions().session_count().await, 1);
}

#[tokio::test]
async fn test_heartbeat_frames() {
    let handler = handler_with(ServerConfig {
        heartbeat_interval: Duration::from_millis(10),
        ..Default::default()
    });
    let (_id, mut stream) = open_stream(&handler).await;

    let frame = next_frame(&mut stream).await.unwrap();
    assert!(frame.starts_with(": keepalive "));
    assert!(frame.ends_with("\n\n"));
}

/// Two concurrent calls on one stream each get their own response event, and no
/// heartbeat lands inside either response frame.
#[tokio::test]
async fn test_concurrent_calls_produce_whole_frames() {
    let handler = handler_with(ServerConfig {
        heartbeat_interval: Duration::from_millis(10),
        ..Default::default()
    });
    let (session_id, mut stream) = open_stream(&handler).await;
    let uri = format!("/message?sessionId={session_id}");

    let first = handler.handle_request(post(
        &uri,
        r#"{"jsonrpc":"2.0","id":1,"method":"slow_echo","params":{"n":1}}"#,
    ));
    let second = handler.handle_request(post(
        &uri,
        r#"{"jsonrpc":"2.0","id":2,"method":"slow_echo","params":{"n":2}}"#,
    ));
    let (a, b) = tokio::join!(first, second);
    assert_eq!(a.status(), StatusCode::OK);
    assert_eq!(b.status(), StatusCode::OK);

    let mut ids = HashSet::new();
    while ids.len() < 2 {
        let frame = next_frame(&mut stream).await.unwrap();
        assert!(frame.ends_with("\n\n"));
        assert_eq!(frame.matches("\n\n").count(), 1, "one event per frame: {frame:?}");

        if frame.starts_with(": keepalive ") {
            continue;
        }
        assert!(!frame.contains("keepalive"));
        let payload = message_payload(&frame).expect("message frame");
        assert_eq!(payload["result"]["n"], payload["id"]);
        ids.insert(payload["id"].as_i64().unwrap());
    }
    assert_eq!(ids, HashSet::from([1, 2]));
}
