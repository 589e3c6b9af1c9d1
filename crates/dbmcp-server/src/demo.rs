//! Tools shipped with the binary.
//!
//! They stand in for the database-backed tools and exercise the three output
//! shapes: plain text, structured values and a long-running cancellable call.

use std::time::Duration;

use async_trait::async_trait;
use dbmcp_protocol::{JsonSchema, McpError, McpResult, Tool, ToolSchema};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::builder::McpServerBuilder;
use crate::tool::{ToolContext, ToolHandler, ToolOutput, integer_arg, string_arg};

/// Longest accepted `sleep`
pub const MAX_SLEEP_MS: i64 = 10 * 60 * 1000;

const SLEEP_STEP: Duration = Duration::from_millis(100);

/// Register `echo`, `list_databases` and `sleep`
pub fn register_demo_tools(builder: McpServerBuilder, databases: Vec<String>) -> McpServerBuilder {
    builder
        .tool(EchoTool::descriptor(), EchoTool)
        .tool(ListDatabasesTool::descriptor(), ListDatabasesTool::new(databases))
        .tool(SleepTool::descriptor(), SleepTool)
}

pub struct EchoTool;

impl EchoTool {
    pub fn descriptor() -> Tool {
        Tool::new(
            "echo",
            ToolSchema::object().with_required_property(
                "message",
                JsonSchema::string_with_description("Text to send back"),
            ),
        )
        .with_description("Echo a message back to the caller")
    }
}

#[async_trait]
impl ToolHandler for EchoTool {
    async fn call(&self, _ctx: ToolContext, args: Map<String, Value>) -> McpResult<ToolOutput> {
        let message =
            string_arg(&args, "message")?.ok_or_else(|| McpError::missing_param("message"))?;
        Ok(ToolOutput::Text(message))
    }
}

pub struct ListDatabasesTool {
    databases: Vec<String>,
}

impl ListDatabasesTool {
    pub fn new(databases: Vec<String>) -> Self {
        Self { databases }
    }

    pub fn descriptor() -> Tool {
        Tool::new(
            "list_databases",
            ToolSchema::object().with_property(
                "random_string",
                JsonSchema::string_with_description("Dummy parameter (optional)"),
            ),
        )
        .with_description("List all available databases")
    }
}

#[async_trait]
impl ToolHandler for ListDatabasesTool {
    async fn call(&self, _ctx: ToolContext, _args: Map<String, Value>) -> McpResult<ToolOutput> {
        Ok(ToolOutput::Structured(json!({
            "databases": self.databases,
            "count": self.databases.len(),
        })))
    }
}

/// Waits `ms` milliseconds, reporting progress and stopping early on cancellation
pub struct SleepTool;

impl SleepTool {
    pub fn descriptor() -> Tool {
        Tool::new(
            "sleep",
            ToolSchema::object().with_required_property(
                "ms",
                JsonSchema::Integer {
                    description: Some("Milliseconds to wait".to_string()),
                    minimum: Some(0),
                    maximum: Some(MAX_SLEEP_MS),
                },
            ),
        )
        .with_description("Wait for the given number of milliseconds")
    }
}

#[async_trait]
impl ToolHandler for SleepTool {
    async fn call(&self, ctx: ToolContext, args: Map<String, Value>) -> McpResult<ToolOutput> {
        let ms = integer_arg(&args, "ms")?.ok_or_else(|| McpError::missing_param("ms"))?;
        if !(0..=MAX_SLEEP_MS).contains(&ms) {
            return Err(McpError::tool_execution(format!(
                "ms must be between 0 and {}",
                MAX_SLEEP_MS
            )));
        }

        let total = Duration::from_millis(ms as u64);
        let mut slept = Duration::ZERO;
        while slept < total {
            let step = SLEEP_STEP.min(total - slept);
            tokio::select! {
                _ = tokio::time::sleep(step) => {}
                _ = ctx.cancellation().cancelled() => {
                    debug!(slept_ms = slept.as_millis() as u64, "sleep cancelled");
                    return Err(McpError::Cancelled(format!("after {}ms", slept.as_millis())));
                }
            }
            slept += step;
            ctx.report_progress(slept.as_millis() as f64, Some(ms as f64))
                .await;
        }
        Ok(ToolOutput::Text(format!("Slept for {}ms", ms)))
    }
}
