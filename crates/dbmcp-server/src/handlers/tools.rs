//! `tools/list` and `tools/call` (alias `tools/execute`)
//!
//! Protocol errors are reserved for malformed calls and unknown tools. Once a
//! tool is resolved, every failure (validation, handler error, deadline,
//! cancellation) is returned as a successful response with `isError: true`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dbmcp_protocol::{CallToolParams, CallToolResult, ListToolsResult, McpError, McpResult};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::initialize::CLIENT_INFO_KEY;
use super::{McpHandler, RequestContext};
use crate::cancellation::InFlightCalls;
use crate::config::ServerConfig;
use crate::notifications::NotificationBus;
use crate::registry::ToolRegistry;
use crate::tool::{ProgressReporter, ToolContext};

/// `tools/list`
pub struct ToolsListHandler {
    registry: Arc<ToolRegistry>,
}

impl ToolsListHandler {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl McpHandler for ToolsListHandler {
    async fn handle(&self, _params: Option<Value>, _ctx: RequestContext) -> McpResult<Value> {
        let result = ListToolsResult {
            tools: self.registry.list(),
        };
        Ok(serde_json::to_value(result)?)
    }

    fn supported_methods(&self) -> Vec<String> {
        vec!["tools/list".to_string()]
    }
}

/// `tools/call`
pub struct ToolsCallHandler {
    registry: Arc<ToolRegistry>,
    calls: Arc<InFlightCalls>,
    bus: NotificationBus,
    config: Arc<ServerConfig>,
}

impl ToolsCallHandler {
    pub fn new(
        registry: Arc<ToolRegistry>,
        calls: Arc<InFlightCalls>,
        bus: NotificationBus,
        config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            registry,
            calls,
            bus,
            config,
        }
    }

    fn parse(params: Option<Value>) -> McpResult<(CallToolParams, Map<String, Value>)> {
        let params = params.ok_or_else(|| {
            McpError::InvalidParameters("Missing params for tools/call".to_string())
        })?;
        let mut call: CallToolParams = serde_json::from_value(params)
            .map_err(|e| McpError::InvalidParameters(format!("Invalid tools/call params: {}", e)))?;

        let args = match call.arguments.take() {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(args)) => args,
            Some(_) => {
                return Err(McpError::InvalidParameters(
                    "Tool arguments must be an object".to_string(),
                ));
            }
        };
        Ok((call, args))
    }

    fn deadline(&self, ctx: &RequestContext) -> Duration {
        let client_name = ctx
            .session
            .get_data(CLIENT_INFO_KEY)
            .and_then(|info| info.get("name").and_then(Value::as_str).map(str::to_string));
        self.config.tool_deadline(client_name.as_deref())
    }
}

#[async_trait]
impl McpHandler for ToolsCallHandler {
    async fn handle(&self, params: Option<Value>, ctx: RequestContext) -> McpResult<Value> {
        let (call, args) = Self::parse(params)?;
        let registered = self
            .registry
            .get(&call.name)
            .ok_or_else(|| McpError::ToolNotFound(call.name.clone()))?;

        if let Err(e) = registered.validate(&args) {
            debug!(tool = %call.name, "Rejected arguments: {}", e);
            return Ok(serde_json::to_value(CallToolResult::error(e))?);
        }

        let request_id = ctx
            .request_id
            .clone()
            .ok_or_else(|| McpError::InvalidParameters("tools/call requires an id".to_string()))?;
        let guard = self.calls.begin(ctx.session_id(), request_id.clone());
        let cancellation = guard.handle().clone();

        let mut tool_ctx = ToolContext::new(ctx.session_id(), Some(request_id.clone()))
            .with_cancellation(cancellation.clone());
        if let Some(token) = call.progress_token() {
            tool_ctx = tool_ctx.with_progress(ProgressReporter::new(
                token.clone(),
                Arc::clone(&ctx.session),
                self.bus.clone(),
            ));
        }

        let deadline = self.deadline(&ctx);
        let started = Instant::now();
        debug!(tool = %call.name, request = %request_id, ?deadline, "Executing tool");

        let outcome = tokio::select! {
            result = tokio::time::timeout(deadline, registered.handler.call(tool_ctx, args)) => {
                match result {
                    Ok(result) => result,
                    Err(_) => Err(McpError::ToolTimeout {
                        tool: call.name.clone(),
                        seconds: deadline.as_secs(),
                    }),
                }
            }
            _ = cancellation.cancelled() => {
                Err(McpError::Cancelled(format!("request {}", request_id)))
            }
        };
        drop(guard);

        let elapsed = started.elapsed();
        let result = match outcome.and_then(|output| output.into_result()) {
            Ok(result) => {
                debug!(tool = %call.name, ?elapsed, "Tool completed");
                result
            }
            Err(McpError::ToolExecutionError(message)) => {
                info!(tool = %call.name, ?elapsed, "Tool failed: {}", message);
                CallToolResult::error(message)
            }
            Err(e) => {
                warn!(tool = %call.name, ?elapsed, "Tool failed: {}", e);
                CallToolResult::error(e)
            }
        };
        Ok(serde_json::to_value(result)?)
    }

    fn supported_methods(&self) -> Vec<String> {
        vec!["tools/call".to_string(), "tools/execute".to_string()]
    }
}
