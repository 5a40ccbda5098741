//! Method dispatch: the data-driven table from method name to handler, plus
//! correlation of server-initiated requests.
//!
//! The table is a plain map guarded by a `RwLock`; registration is a data
//! operation and hot re-registration is serialized by the writer lock.
//! Handler panics are contained by running each invocation in its own task
//! and surface as `-32603`.

use crate::context::RequestContext;
use async_trait::async_trait;
use conduit_mcp_core::protocol::jsonrpc::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId,
};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

pub type MethodFuture = Pin<Box<dyn Future<Output = Result<Value, JsonRpcError>> + Send>>;

/// A registered method implementation.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn handle(
        &self,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> Result<Value, JsonRpcError>;
}

/// Adapter from a boxed-future closure to a [`MethodHandler`].
pub struct FnMethodHandler<F> {
    f: F,
}

impl<F> FnMethodHandler<F>
where
    F: Fn(Option<Value>, RequestContext) -> MethodFuture + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> MethodHandler for FnMethodHandler<F>
where
    F: Fn(Option<Value>, RequestContext) -> MethodFuture + Send + Sync,
{
    async fn handle(
        &self,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> Result<Value, JsonRpcError> {
        (self.f)(params, ctx).await
    }
}

/// The method table.
#[derive(Default)]
pub struct MethodDispatcher {
    methods: StdRwLock<HashMap<String, Arc<dyn MethodHandler>>>,
}

impl MethodDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a method handler.
    pub fn register(&self, method: impl Into<String>, handler: Arc<dyn MethodHandler>) {
        self.methods
            .write()
            .expect("method table lock poisoned")
            .insert(method.into(), handler);
    }

    pub fn unregister(&self, method: &str) -> bool {
        self.methods
            .write()
            .expect("method table lock poisoned")
            .remove(method)
            .is_some()
    }

    pub fn has(&self, method: &str) -> bool {
        self.methods
            .read()
            .expect("method table lock poisoned")
            .contains_key(method)
    }

    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .methods
            .read()
            .expect("method table lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn get(&self, method: &str) -> Option<Arc<dyn MethodHandler>> {
        self.methods
            .read()
            .expect("method table lock poisoned")
            .get(method)
            .cloned()
    }

    /// Invoke a method, containing panics. The building block for both
    /// request dispatch and job execution.
    pub async fn invoke(
        &self,
        method: &str,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let Some(handler) = self.get(method) else {
            return Err(JsonRpcError::method_not_found(method));
        };
        let task = tokio::spawn(async move { handler.handle(params, ctx).await });
        match task.await {
            Ok(result) => result,
            Err(join_error) if join_error.is_panic() => {
                error!(method, "handler panicked");
                Err(JsonRpcError::internal_error("handler panicked"))
            }
            Err(_) => Err(JsonRpcError::internal_error("handler task cancelled")),
        }
    }

    /// Dispatch a request to a well-formed response with the same id.
    pub async fn dispatch_request(
        &self,
        request: JsonRpcRequest,
        ctx: RequestContext,
    ) -> JsonRpcResponse {
        let id = request.id.clone();
        match self.invoke(&request.method, request.params, ctx).await {
            Ok(result) => JsonRpcResponse::success(result, id),
            Err(error) => JsonRpcResponse::error(error, id),
        }
    }

    /// Dispatch a notification: same lookup path, no response ever; errors
    /// are logged only.
    pub async fn dispatch_notification(&self, notification: JsonRpcRequest, ctx: RequestContext) {
        let method = notification.method.clone();
        match self.invoke(&method, notification.params, ctx).await {
            Ok(_) => {}
            Err(error) => {
                debug!(method, code = error.code, "notification handler error: {}", error.message);
            }
        }
    }
}

/// Correlation of requests initiated *by* the server (server-to-client RPC).
#[derive(Default)]
pub struct OutboundRequests {
    pending: StdMutex<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>,
}

impl OutboundRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an outgoing request id; the receiver resolves with the peer's
    /// response.
    pub fn begin(&self, id: RequestId) -> oneshot::Receiver<JsonRpcResponse> {
        let (sender, receiver) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .insert(id, sender);
        receiver
    }

    /// Correlate an inbound response. Orphans are discarded with a warning
    /// and return false.
    pub fn complete(&self, response: JsonRpcResponse) -> bool {
        let Some(id) = response.id.clone() else {
            warn!("discarding response without id");
            return false;
        };
        let sender = self
            .pending
            .lock()
            .expect("pending lock poisoned")
            .remove(&id);
        match sender {
            Some(sender) => sender.send(response).is_ok(),
            None => {
                warn!(%id, "discarding orphaned response");
                false
            }
        }
    }

    pub fn abandon(&self, id: &RequestId) {
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .remove(id);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("pending lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_handler() -> Arc<dyn MethodHandler> {
        Arc::new(FnMethodHandler::new(|params, _ctx| {
            Box::pin(async move { Ok(params.unwrap_or_else(|| json!({}))) }) as MethodFuture
        }))
    }

    fn panicking_handler() -> Arc<dyn MethodHandler> {
        Arc::new(FnMethodHandler::new(|_params, _ctx| {
            Box::pin(async move { panic!("boom") as Result<Value, JsonRpcError> }) as MethodFuture
        }))
    }

    fn ctx() -> RequestContext {
        RequestContext::new("test-session")
    }

    #[tokio::test]
    async fn request_response_echoes_id() {
        let dispatcher = MethodDispatcher::new();
        dispatcher.register("echo", echo_handler());

        let request = JsonRpcRequest::new("echo", Some(json!({"x": 1})), RequestId::string("abc"));
        let response = dispatcher.dispatch_request(request, ctx()).await;
        assert_eq!(response.id, Some(RequestId::string("abc")));
        assert_eq!(response.result, Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn unknown_method_is_32601() {
        let dispatcher = MethodDispatcher::new();
        let request = JsonRpcRequest::new("frobnicate", None, 4.into());
        let response = dispatcher.dispatch_request(request, ctx()).await;
        assert_eq!(response.error.unwrap().code, -32601);
        assert_eq!(response.id, Some(4.into()));
    }

    #[tokio::test]
    async fn handler_panic_becomes_32603() {
        let dispatcher = MethodDispatcher::new();
        dispatcher.register("explode", panicking_handler());
        let request = JsonRpcRequest::new("explode", None, 5.into());
        let response = dispatcher.dispatch_request(request, ctx()).await;
        assert_eq!(response.error.unwrap().code, -32603);
    }

    #[tokio::test]
    async fn notifications_produce_no_frame() {
        let dispatcher = MethodDispatcher::new();
        dispatcher.register("echo", echo_handler());
        // Returns unit; nothing to send. Unknown methods are only logged.
        dispatcher
            .dispatch_notification(JsonRpcRequest::notification("echo", None), ctx())
            .await;
        dispatcher
            .dispatch_notification(JsonRpcRequest::notification("unknown", None), ctx())
            .await;
    }

    #[test]
    fn registration_api_round_trips() {
        let dispatcher = MethodDispatcher::new();
        dispatcher.register("a", echo_handler());
        dispatcher.register("b", echo_handler());
        assert!(dispatcher.has("a"));
        assert_eq!(dispatcher.method_names(), vec!["a", "b"]);
        assert!(dispatcher.unregister("a"));
        assert!(!dispatcher.has("a"));
        assert!(!dispatcher.unregister("a"));
    }

    #[tokio::test]
    async fn outbound_correlation_resolves_and_orphans_warn() {
        let outbound = OutboundRequests::new();
        let receiver = outbound.begin(7.into());
        assert_eq!(outbound.pending_count(), 1);

        assert!(outbound.complete(JsonRpcResponse::success(json!({}), Some(7.into()))));
        let response = receiver.await.unwrap();
        assert!(response.is_success());

        // Same id again: orphaned.
        assert!(!outbound.complete(JsonRpcResponse::success(json!({}), Some(7.into()))));
        assert!(!outbound.complete(JsonRpcResponse::success(json!({}), None)));
    }
}
