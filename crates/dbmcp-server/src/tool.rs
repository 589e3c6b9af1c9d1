//! Tool handler contract.
//!
//! A handler receives a [`ToolContext`] and the call's argument map, and
//! returns a [`ToolOutput`]. Whatever it returns is normalized into a
//! `CallToolResult` before encoding; failures become `isError` content.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dbmcp_json_rpc_server::RequestId;
use dbmcp_protocol::notifications::methods;
use dbmcp_protocol::{
    CallToolResult, ContentBlock, McpError, McpResult, ProgressNotificationParams,
};
use dbmcp_session::Session;
use serde_json::{Map, Value};

use crate::cancellation::CancellationHandle;
use crate::notifications::NotificationBus;

/// Implemented by every tool the server exposes
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, ctx: ToolContext, args: Map<String, Value>) -> McpResult<ToolOutput>;
}

/// What a tool produced
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// Plain text, sent as one text block
    Text(String),
    /// Pre-formatted content blocks, sent as-is
    Blocks(Vec<ContentBlock>),
    /// Any JSON value. Strings are sent verbatim, everything else as pretty JSON.
    Structured(Value),
}

impl ToolOutput {
    pub fn into_result(self) -> McpResult<CallToolResult> {
        let content = match self {
            ToolOutput::Text(text) => vec![ContentBlock::text(text)],
            ToolOutput::Blocks(blocks) => blocks,
            ToolOutput::Structured(Value::String(text)) => vec![ContentBlock::text(text)],
            ToolOutput::Structured(value) => {
                vec![ContentBlock::text(serde_json::to_string_pretty(&value)?)]
            }
        };
        Ok(CallToolResult::success(content))
    }
}

impl From<String> for ToolOutput {
    fn from(text: String) -> Self {
        ToolOutput::Text(text)
    }
}

impl From<&str> for ToolOutput {
    fn from(text: &str) -> Self {
        ToolOutput::Text(text.to_string())
    }
}

impl From<Vec<ContentBlock>> for ToolOutput {
    fn from(blocks: Vec<ContentBlock>) -> Self {
        ToolOutput::Blocks(blocks)
    }
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        ToolOutput::Structured(value)
    }
}

/// Emits `notifications/progress` for one call that supplied a progress token
#[derive(Clone)]
pub struct ProgressReporter {
    token: Value,
    session: Arc<Session>,
    bus: NotificationBus,
}

impl ProgressReporter {
    pub fn new(token: Value, session: Arc<Session>, bus: NotificationBus) -> Self {
        Self {
            token,
            session,
            bus,
        }
    }

    pub fn token(&self) -> &Value {
        &self.token
    }

    /// Returns false if the notification could not be delivered
    pub async fn report(&self, progress: f64, total: Option<f64>) -> bool {
        let params = ProgressNotificationParams {
            progress_token: self.token.clone(),
            progress,
            total,
        };
        match serde_json::to_value(params) {
            Ok(params) => self.bus.notify(&self.session, methods::PROGRESS, params).await,
            Err(_) => false,
        }
    }
}

/// Per-call context handed to a [`ToolHandler`]
#[derive(Clone)]
pub struct ToolContext {
    session_id: String,
    request_id: Option<RequestId>,
    cancellation: CancellationHandle,
    progress: Option<ProgressReporter>,
}

impl ToolContext {
    pub fn new(session_id: impl Into<String>, request_id: Option<RequestId>) -> Self {
        Self {
            session_id: session_id.into(),
            request_id,
            cancellation: CancellationHandle::new(),
            progress: None,
        }
    }

    pub fn with_cancellation(mut self, cancellation: CancellationHandle) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    /// Signalled when the client cancels this call
    pub fn cancellation(&self) -> &CancellationHandle {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn progress(&self) -> Option<&ProgressReporter> {
        self.progress.as_ref()
    }

    /// Report progress if the client asked for it; a no-op otherwise
    pub async fn report_progress(&self, progress: f64, total: Option<f64>) {
        if let Some(reporter) = &self.progress {
            reporter.report(progress, total).await;
        }
    }
}

impl fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolContext")
            .field("session_id", &self.session_id)
            .field("request_id", &self.request_id)
            .field("cancelled", &self.is_cancelled())
            .field("progress", &self.progress.as_ref().map(|p| p.token()))
            .finish()
    }
}

/// Closure-backed [`ToolHandler`], see [`tool_fn`]
pub struct FnTool<F> {
    f: F,
}

/// Wrap an async closure as a tool handler
pub fn tool_fn<F, Fut>(f: F) -> FnTool<F>
where
    F: Fn(ToolContext, Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = McpResult<ToolOutput>> + Send,
{
    FnTool { f }
}

#[async_trait]
impl<F, Fut> ToolHandler for FnTool<F>
where
    F: Fn(ToolContext, Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = McpResult<ToolOutput>> + Send,
{
    async fn call(&self, ctx: ToolContext, args: Map<String, Value>) -> McpResult<ToolOutput> {
        (self.f)(ctx, args).await
    }
}

/// Read an optional string argument. Numbers and booleans are stringified.
pub fn string_arg(args: &Map<String, Value>, name: &str) -> McpResult<Option<String>> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(v @ (Value::Number(_) | Value::Bool(_))) => Ok(Some(v.to_string())),
        Some(other) => Err(McpError::invalid_param_type(name, "string", json_type_name(other))),
    }
}

/// Read an optional integer argument. Numeric strings are accepted.
pub fn integer_arg(args: &Map<String, Value>, name: &str) -> McpResult<Option<i64>> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .map(Some)
            .ok_or_else(|| McpError::invalid_param_type(name, "integer", "number")),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| McpError::invalid_param_type(name, "integer", "string")),
        Some(other) => Err(McpError::invalid_param_type(name, "integer", json_type_name(other))),
    }
}

/// JSON type name used in validation messages
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_output_normalization() {
        let text = ToolOutput::from("hello").into_result().unwrap();
        assert_eq!(text.content, vec![ContentBlock::text("hello")]);
        assert!(!text.is_error);

        let plain = ToolOutput::Structured(json!("verbatim")).into_result().unwrap();
        assert_eq!(plain.content[0].as_text(), "verbatim");

        let structured = ToolOutput::from(json!({"count": 2})).into_result().unwrap();
        let rendered = structured.content[0].as_text();
        let parsed: Value = serde_json::from_str(rendered).unwrap();
        assert_eq!(parsed, json!({"count": 2}));

        let blocks = vec![ContentBlock::text("a"), ContentBlock::text("b")];
        let passthrough = ToolOutput::from(blocks.clone()).into_result().unwrap();
        assert_eq!(passthrough.content, blocks);
    }

    #[tokio::test]
    async fn test_tool_fn_handler() {
        let handler = tool_fn(|ctx, args| async move {
            let name = string_arg(&args, "name").ok().flatten().unwrap_or_default();
            Ok(ToolOutput::Text(format!("{}:{}", ctx.session_id(), name)))
        });

        let mut args = Map::new();
        args.insert("name".into(), json!("db"));
        let output = handler
            .call(ToolContext::new("s1", Some(RequestId::from(1))), args)
            .await
            .unwrap();
        assert_eq!(output, ToolOutput::Text("s1:db".into()));
    }

    #[test]
    fn test_loose_argument_readers() {
        let args = json!({
            "s": "text",
            "n": 5,
            "b": true,
            "i_str": " 42 ",
            "i_float": 3.0,
            "frac": 2.5,
            "list": [1],
            "nothing": null
        });
        let args = args.as_object().unwrap();

        assert_eq!(string_arg(args, "s").unwrap().as_deref(), Some("text"));
        assert_eq!(string_arg(args, "n").unwrap().as_deref(), Some("5"));
        assert_eq!(string_arg(args, "b").unwrap().as_deref(), Some("true"));
        assert_eq!(string_arg(args, "nothing").unwrap(), None);
        assert!(string_arg(args, "list").is_err());

        assert_eq!(integer_arg(args, "n").unwrap(), Some(5));
        assert_eq!(integer_arg(args, "i_str").unwrap(), Some(42));
        assert_eq!(integer_arg(args, "i_float").unwrap(), Some(3));
        assert_eq!(integer_arg(args, "absent").unwrap(), None);
        assert!(integer_arg(args, "frac").is_err());
        assert!(integer_arg(args, "s").is_err());
    }

    #[test]
    fn test_context_defaults() {
        let ctx = ToolContext::new("s", None);
        assert!(!ctx.is_cancelled());
        assert!(ctx.progress().is_none());
        ctx.cancellation().cancel();
        assert!(ctx.is_cancelled());
    }
}
