//! Method names and params of the notifications exchanged with clients.

use dbmcp_json_rpc_server::RequestId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod methods {
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
    pub const CANCELLED: &str = "notifications/cancelled";
    pub const PROGRESS: &str = "notifications/progress";
}

/// Params of the `cancel` request
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CancelParams {
    pub id: RequestId,
}

/// Params of `notifications/cancelled`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledNotificationParams {
    pub request_id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Params of `notifications/progress`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressNotificationParams {
    pub progress_token: Value,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
}
