//! Test modules for dbmcp-server
//!
//! Method handlers are driven through the real dispatcher with an attached
//! session queue; the stdio transport is driven over `tokio::io::duplex` pipes.


use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dbmcp_json_rpc_server::SessionContext;
use dbmcp_protocol::{JsonSchema, McpError, McpResult, Tool, ToolSchema};
use dbmcp_session::{Session, SessionEvent};
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;

use crate::demo::{EchoTool, ListDatabasesTool, SleepTool};
use crate::tool::{ToolContext, ToolHandler, ToolOutput, integer_arg};
use crate::{McpServer, McpServerBuilder};

/// Always fails with "boom"
pub(crate) struct FailTool;

#[async_trait]
impl ToolHandler for FailTool {
    async fn call(&self, _ctx: ToolContext, _args: Map<String, Value>) -> McpResult<ToolOutput> {
        Err(McpError::tool_execution("boom"))
    }
}

/// Sleeps `ms` without looking at its cancellation handle
pub(crate) struct StubbornTool;

#[async_trait]
impl ToolHandler for StubbornTool {
    async fn call(&self, _ctx: ToolContext, args: Map<String, Value>) -> McpResult<ToolOutput> {
        let ms = integer_arg(&args, "ms")?.unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms as u64)).await;
        Ok(ToolOutput::Text(format!("done after {}ms", ms)))
    }
}

/// Builder with the demo tools plus `fail` and `stubborn`
pub(crate) fn test_builder() -> McpServerBuilder {
    McpServer::builder()
        .initialized_notification_delay(Duration::from_millis(10))
        .tool(EchoTool::descriptor(), EchoTool)
        .tool(
            ListDatabasesTool::descriptor(),
            ListDatabasesTool::new(vec!["main".into()]),
        )
        .tool(SleepTool::descriptor(), SleepTool)
        .tool(
            Tool::new("fail", ToolSchema::object()).with_description("Always fails"),
            FailTool,
        )
        .tool(
            Tool::new(
                "stubborn",
                ToolSchema::object().with_property("ms", JsonSchema::integer()),
            ),
            StubbornTool,
        )
}

/// A server plus one connected session whose queue the test reads
pub(crate) struct Harness {
    pub server: McpServer,
    pub session: Arc<Session>,
    pub rx: mpsc::Receiver<SessionEvent>,
}

impl Harness {
    pub async fn new(builder: McpServerBuilder) -> Self {
        let server = builder.build().unwrap();
        let session = server.sessions().create_session().await;
        let (_conn_id, rx) = session.connect(64);
        Self {
            server,
            session,
            rx,
        }
    }

    /// Dispatch a raw message on this harness's session
    pub async fn send_raw(&self, raw: &str) -> Option<Value> {
        send_as(&self.server, self.session.id(), raw).await
    }

    pub async fn request(&self, id: Value, method: &str, params: Value) -> Value {
        let raw =
            json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}).to_string();
        self.send_raw(&raw).await.expect("request must be answered")
    }

    pub async fn call_tool(&self, id: i64, name: &str, arguments: Value) -> Value {
        self.request(
            json!(id),
            "tools/call",
            json!({"name": name, "arguments": arguments}),
        )
        .await
    }

    pub async fn initialize(&self, params: Value) -> Value {
        self.request(json!("init"), "initialize", params).await
    }

    /// Next frame pushed to the session queue, if one arrives in time
    pub async fn next_frame(&mut self, wait: Duration) -> Option<Value> {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(SessionEvent::Message(frame))) => Some(serde_json::from_str(&frame).unwrap()),
            _ => None,
        }
    }
}

pub(crate) async fn send_as(server: &McpServer, session_id: &str, raw: &str) -> Option<Value> {
    server
        .dispatcher()
        .handle_message(raw, SessionContext::new(session_id))
        .await
        .to_json_string()
        .map(|frame| serde_json::from_str(&frame).unwrap())
}

/// Text of the first content block of a `tools/call` response
pub(crate) fn tool_text(response: &Value) -> &str {
    response["result"]["content"][0]["text"].as_str().unwrap_or_default()
}

pub(crate) fn is_tool_error(response: &Value) -> bool {
    response["result"]["isError"].as_bool().unwrap_or(false)
}
