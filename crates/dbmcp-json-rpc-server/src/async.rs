use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    dispatch::{JsonRpcIncoming, JsonRpcMessageResult, parse_json_rpc_message},
    error::{JsonRpcError, JsonRpcErrorObject},
    notification::JsonRpcNotification,
    request::{JsonRpcRequest, RequestParams},
    response::{JsonRpcMessage, ResponseResult},
    types::RequestId,
};

/// Calls slower than this are logged at info level.
const SLOW_CALL_THRESHOLD: Duration = Duration::from_millis(500);

/// Per-message context handed to handlers.
///
/// Carries identifiers only; handlers that need session state resolve the id
/// through the session manager they were constructed with.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Owning session
    pub session_id: String,
    /// Id of the request being served, `None` for notifications
    pub request_id: Option<RequestId>,
    /// Transport-supplied metadata (e.g. "transport": "sse")
    pub metadata: HashMap<String, Value>,
    /// Unix milliseconds at which the message was received
    pub timestamp: u64,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            session_id: session_id.into(),
            request_id: None,
            metadata: HashMap::new(),
            timestamp,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Trait for handling JSON-RPC method calls
#[async_trait]
pub trait JsonRpcHandler: Send + Sync {
    /// The error type returned by this handler
    type Error: std::error::Error + Send + Sync + 'static;

    /// Handle a method call. Returns domain errors only; the dispatcher converts
    /// them to JSON-RPC error objects.
    async fn handle(
        &self,
        method: &str,
        params: Option<RequestParams>,
        session_context: SessionContext,
    ) -> Result<Value, Self::Error>;

    /// Handle a notification. The default implementation ignores it.
    async fn handle_notification(
        &self,
        method: &str,
        params: Option<RequestParams>,
        session_context: SessionContext,
    ) -> Result<(), Self::Error> {
        let _ = (method, params, session_context);
        Ok(())
    }

    /// Methods served by this handler
    fn supported_methods(&self) -> Vec<String> {
        vec![]
    }
}

/// Trait for errors that can be converted to JSON-RPC error objects
pub trait ToJsonRpcError: std::error::Error + Send + Sync + 'static {
    fn to_error_object(&self) -> JsonRpcErrorObject;
}

/// Static method table built at startup
pub struct JsonRpcDispatcher<E>
where
    E: ToJsonRpcError,
{
    handlers: HashMap<String, Arc<dyn JsonRpcHandler<Error = E>>>,
}

impl<E> JsonRpcDispatcher<E>
where
    E: ToJsonRpcError,
{
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a specific method
    pub fn register_method<H>(&mut self, method: impl Into<String>, handler: H)
    where
        H: JsonRpcHandler<Error = E> + 'static,
    {
        self.handlers.insert(method.into(), Arc::new(handler));
    }

    /// Register one handler under several method names
    pub fn register_methods<H>(&mut self, methods: Vec<String>, handler: H)
    where
        H: JsonRpcHandler<Error = E> + 'static,
    {
        self.register_shared(methods, Arc::new(handler));
    }

    /// Register an already shared handler under several method names
    pub fn register_shared(
        &mut self,
        methods: Vec<String>,
        handler: Arc<dyn JsonRpcHandler<Error = E>>,
    ) {
        for method in methods {
            self.handlers.insert(method, handler.clone());
        }
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Process a request. Always yields exactly one response message.
    pub async fn handle_request_with_context(
        &self,
        request: JsonRpcRequest,
        mut session_context: SessionContext,
    ) -> JsonRpcMessage {
        let Some(handler) = self.handlers.get(&request.method) else {
            warn!(method = %request.method, "Method not found");
            return JsonRpcMessage::error(JsonRpcError::method_not_found(
                request.id,
                &request.method,
            ));
        };

        session_context.request_id = Some(request.id.clone());
        match handler
            .handle(&request.method, request.params, session_context)
            .await
        {
            Ok(result) => JsonRpcMessage::success(request.id, ResponseResult::Success(result)),
            Err(domain_error) => {
                debug!(method = %request.method, error = %domain_error, "Handler returned error");
                let error_object = domain_error.to_error_object();
                JsonRpcMessage::error(JsonRpcError::new(Some(request.id), error_object))
            }
        }
    }

    /// Process a notification. Unknown methods are dropped.
    pub async fn handle_notification_with_context(
        &self,
        notification: JsonRpcNotification,
        session_context: SessionContext,
    ) -> Result<(), E> {
        match self.handlers.get(&notification.method) {
            Some(handler) => {
                handler
                    .handle_notification(&notification.method, notification.params, session_context)
                    .await
            }
            None => {
                debug!(method = %notification.method, "Dropping unknown notification");
                Ok(())
            }
        }
    }

    /// Decode, route and execute one raw inbound message.
    ///
    /// Requests produce exactly one response (success or error); notifications
    /// never produce one, even when their handler fails.
    pub async fn handle_message(
        &self,
        raw: &str,
        session_context: SessionContext,
    ) -> JsonRpcMessageResult {
        let started = Instant::now();
        let incoming = match parse_json_rpc_message(raw) {
            Ok(incoming) => incoming,
            Err(error) => {
                warn!(
                    session = %session_context.session_id,
                    code = error.error.code,
                    "Rejected inbound message: {}",
                    error.error.message
                );
                return JsonRpcMessageResult::Error(error);
            }
        };
        let method = incoming.method().to_string();

        let outcome = match incoming {
            JsonRpcIncoming::Request(request) => self
                .handle_request_with_context(request, session_context)
                .await
                .into(),
            JsonRpcIncoming::Notification(notification) => {
                if let Err(e) = self
                    .handle_notification_with_context(notification, session_context)
                    .await
                {
                    warn!(method = %method, "Notification handler failed: {}", e);
                }
                JsonRpcMessageResult::NoResponse
            }
        };

        let elapsed = started.elapsed();
        if elapsed > SLOW_CALL_THRESHOLD {
            info!(method = %method, ?elapsed, "Method completed");
        }
        outcome
    }

    /// Registered method names, sorted
    pub fn registered_methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.handlers.keys().cloned().collect();
        methods.sort();
        methods
    }
}

impl<E> Default for JsonRpcDispatcher<E>
where
    E: ToJsonRpcError,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(thiserror::Error, Debug)]
    enum TestError {
        #[error("Test error: {0}")]
        TestError(String),
    }

    impl ToJsonRpcError for TestError {
        fn to_error_object(&self) -> JsonRpcErrorObject {
            match self {
                TestError::TestError(msg) => JsonRpcErrorObject::internal_error(Some(msg.clone())),
            }
        }
    }

    #[derive(Default)]
    struct TestHandler {
        calls: AtomicUsize,
        notifications: AtomicUsize,
    }

    #[async_trait]
    impl JsonRpcHandler for Arc<TestHandler> {
        type Error = TestError;

        async fn handle(
            &self,
            method: &str,
            _params: Option<RequestParams>,
            ctx: SessionContext,
        ) -> Result<Value, Self::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match method {
                "add" => Ok(json!({"session": ctx.session_id, "id": ctx.request_id})),
                _ => Err(TestError::TestError("test error".to_string())),
            }
        }

        async fn handle_notification(
            &self,
            _method: &str,
            _params: Option<RequestParams>,
            _ctx: SessionContext,
        ) -> Result<(), Self::Error> {
            self.notifications.fetch_add(1, Ordering::SeqCst);
            Err(TestError::TestError("ignored".to_string()))
        }
    }

    fn dispatcher(handler: Arc<TestHandler>) -> JsonRpcDispatcher<TestError> {
        let mut dispatcher = JsonRpcDispatcher::new();
        dispatcher.register_methods(vec!["add".to_string(), "error".to_string()], handler);
        dispatcher
    }

    #[tokio::test]
    async fn test_dispatcher_success_carries_context() {
        let handler = Arc::new(TestHandler::default());
        let dispatcher = dispatcher(handler.clone());

        let request = JsonRpcRequest::new_no_params(RequestId::Number(1), "add");
        let response = dispatcher
            .handle_request_with_context(request, SessionContext::new("s-1"))
            .await;

        assert_eq!(response.id(), Some(&RequestId::Number(1)));
        assert_eq!(response.result(), Some(&json!({"session": "s-1", "id": 1})));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatcher_method_not_found() {
        let dispatcher = dispatcher(Arc::new(TestHandler::default()));

        let request = JsonRpcRequest::new_no_params(RequestId::Number(1), "unknown");
        let response = dispatcher
            .handle_request_with_context(request, SessionContext::new("s"))
            .await;
        let JsonRpcMessage::Error(error) = response else {
            panic!("expected error");
        };
        assert_eq!(error.error.code, -32601);
        assert_eq!(error.id, Some(RequestId::Number(1)));
    }

    #[tokio::test]
    async fn test_handle_message_request_yields_one_response() {
        let handler = Arc::new(TestHandler::default());
        let dispatcher = dispatcher(handler.clone());

        let result = dispatcher
            .handle_message(
                r#"{"jsonrpc":"2.0","id":"a","method":"error"}"#,
                SessionContext::new("s"),
            )
            .await;
        assert!(result.is_error());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        let frame = result.to_json_string().unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["id"], "a");
        assert_eq!(value["error"]["code"], -32603);
    }

    #[tokio::test]
    async fn test_handle_message_notification_never_responds() {
        let handler = Arc::new(TestHandler::default());
        let dispatcher = dispatcher(handler.clone());

        for raw in [
            r#"{"jsonrpc":"2.0","method":"add"}"#,
            r#"{"jsonrpc":"2.0","method":"error"}"#,
            r#"{"jsonrpc":"2.0","method":"not-registered"}"#,
        ] {
            let result = dispatcher.handle_message(raw, SessionContext::new("s")).await;
            assert!(!result.needs_response(), "{raw} must not produce a response");
        }
        assert_eq!(handler.notifications.load(Ordering::SeqCst), 2);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handle_message_parse_error() {
        let dispatcher = dispatcher(Arc::new(TestHandler::default()));
        let result = dispatcher
            .handle_message(r#"{"bad json"#, SessionContext::new("s"))
            .await;
        let JsonRpcMessageResult::Error(error) = result else {
            panic!("expected parse error");
        };
        assert_eq!(error.error.code, -32700);
        assert!(error.id.is_none());
    }

    #[test]
    fn test_registered_methods_sorted() {
        let dispatcher = dispatcher(Arc::new(TestHandler::default()));
        assert_eq!(dispatcher.registered_methods(), vec!["add", "error"]);
        assert!(dispatcher.has_method("add"));
    }
}
