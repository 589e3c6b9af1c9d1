//! `cancel` and `notifications/cancelled`
//!
//! Both look up the in-flight call by request id on the caller's own session.
//! An unknown id is acknowledged; the call may already have finished.

use std::sync::Arc;

use async_trait::async_trait;
use dbmcp_json_rpc_server::RequestId;
use dbmcp_protocol::notifications::methods;
use dbmcp_protocol::{CancelParams, CancelledNotificationParams, McpError, McpResult};
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{McpHandler, RequestContext};
use crate::cancellation::InFlightCalls;

fn cancel_call(calls: &InFlightCalls, ctx: &RequestContext, id: &RequestId, reason: Option<&str>) {
    if calls.cancel(ctx.session_id(), id) {
        info!(
            session = %ctx.session_id(),
            request = %id,
            reason = reason.unwrap_or(""),
            "Cancelling tool call"
        );
    } else {
        debug!(session = %ctx.session_id(), request = %id, "Cancel for a call that is not running");
    }
}

/// `cancel {id}`
pub struct CancelRequestHandler {
    calls: Arc<InFlightCalls>,
}

impl CancelRequestHandler {
    pub fn new(calls: Arc<InFlightCalls>) -> Self {
        Self { calls }
    }

    fn parse(params: Option<Value>) -> McpResult<CancelParams> {
        let params = params.ok_or_else(|| {
            McpError::InvalidParameters("Missing params for cancel".to_string())
        })?;
        serde_json::from_value(params)
            .map_err(|e| McpError::InvalidParameters(format!("Invalid cancel params: {}", e)))
    }
}

#[async_trait]
impl McpHandler for CancelRequestHandler {
    async fn handle(&self, params: Option<Value>, ctx: RequestContext) -> McpResult<Value> {
        let params = Self::parse(params)?;
        cancel_call(&self.calls, &ctx, &params.id, None);
        Ok(json!({}))
    }

    async fn handle_notification(
        &self,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> McpResult<()> {
        let params = Self::parse(params)?;
        cancel_call(&self.calls, &ctx, &params.id, None);
        Ok(())
    }

    fn supported_methods(&self) -> Vec<String> {
        vec!["cancel".to_string()]
    }
}

/// `notifications/cancelled {requestId, reason?}`
pub struct CancelledNotificationHandler {
    calls: Arc<InFlightCalls>,
}

impl CancelledNotificationHandler {
    pub fn new(calls: Arc<InFlightCalls>) -> Self {
        Self { calls }
    }

    fn apply(&self, params: Option<Value>, ctx: &RequestContext) -> McpResult<()> {
        let params = params.ok_or_else(|| {
            McpError::InvalidParameters("Missing params for notifications/cancelled".to_string())
        })?;
        let params: CancelledNotificationParams =
            serde_json::from_value(params).map_err(|e| {
                McpError::InvalidParameters(format!("Invalid cancellation params: {}", e))
            })?;
        cancel_call(&self.calls, ctx, &params.request_id, params.reason.as_deref());
        Ok(())
    }
}

#[async_trait]
impl McpHandler for CancelledNotificationHandler {
    async fn handle(&self, params: Option<Value>, ctx: RequestContext) -> McpResult<Value> {
        self.apply(params, &ctx)?;
        Ok(json!({}))
    }

    async fn handle_notification(
        &self,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> McpResult<()> {
        self.apply(params, &ctx)
    }

    fn supported_methods(&self) -> Vec<String> {
        vec![methods::CANCELLED.to_string()]
    }
}
