//! The protocol engine.
//!
//! `McpServer` owns the session state machine, the method table, the
//! component registry, the notification broker, and the job queue. It
//! implements the transport layer's `MessageHandler` contract, so the same
//! engine serves stdio and HTTP unchanged.
//!
//! Lifecycle: `initialize` negotiates the protocol version and capability
//! documents; the client's `notifications/initialized` completes the
//! handshake. Until then every method except `initialize` and `ping` is
//! rejected with `-32002`. Handler failures become responses; transport
//! failures end the session.

use crate::broker::NotificationBroker;
use crate::config::{ServerConfig, TransportSelection};
use crate::context::{ProgressReporter, RequestContext};
use crate::discovery::{DiscoveryReport, DiscoveryScanner, HandlerBindings};
use crate::dispatcher::{FnMethodHandler, MethodDispatcher, MethodFuture, OutboundRequests};
use crate::handlers::ResourceUpdatePublisher;
use crate::jobs::{JobExecutor, JobQueue};
use crate::registry::ComponentRegistry;
use async_trait::async_trait;
use conduit_mcp_core::error::{error_codes, McpError, McpResult, ResourceError};
use conduit_mcp_core::protocol::constants::{methods, notifications};
use conduit_mcp_core::protocol::jsonrpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, MessageKind, RequestId,
};
use conduit_mcp_core::protocol::lifecycle::{
    InitializeRequest, InitializeResponse, NegotiatedSession, SessionState, ShutdownRequest,
};
use conduit_mcp_core::protocol::{version, ServerCapabilities, PROTOCOL_VERSION};
use conduit_mcp_core::types::notifications::{CancelledNotification, LogLevel, SetLevelRequest};
use conduit_mcp_core::types::prompts::{GetPromptRequest, ListPromptsRequest, ListPromptsResponse, Prompt};
use conduit_mcp_core::types::resources::{
    ListResourceTemplatesRequest, ListResourceTemplatesResponse, ListResourcesRequest,
    ListResourcesResponse, ReadResourceRequest, Resource, ResourceTemplate, SubscribeRequest,
    UnsubscribeRequest,
};
use conduit_mcp_core::types::tools::{ListToolsRequest, ListToolsResponse, Tool, ToolCallRequest, ToolCallResponse};
use conduit_mcp_core::types::ServerInfo;
use conduit_mcp_core::utils::{paginate, CancellationManager, DEFAULT_PAGE_SIZE};
use conduit_mcp_transport::events::SubscriberHub;
use conduit_mcp_transport::http::{HttpServerIdentity, HttpTransport};
use conduit_mcp_transport::stdio::StdioTransport;
use conduit_mcp_transport::{
    LifecycleEvent, MessageHandler, Transport, TransportContext,
};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, warn};

/// The MCP server engine. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct McpServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    info: ServerInfo,
    capabilities: ServerCapabilities,
    config: ServerConfig,
    state: RwLock<SessionState>,
    session: RwLock<Option<NegotiatedSession>>,
    registry: Arc<ComponentRegistry>,
    dispatcher: MethodDispatcher,
    broker: Arc<NotificationBroker>,
    jobs: OnceLock<Arc<JobQueue>>,
    outbound: OutboundRequests,
    cancellations: CancellationManager,
    log_level: RwLock<LogLevel>,
    /// URIs the peer has subscribed to via `resources/subscribe`.
    resource_subscriptions: RwLock<HashSet<String>>,
    /// Direct line to the connected peer, set while a transport is serving.
    peer_sink: RwLock<Option<mpsc::Sender<JsonRpcMessage>>>,
    closed: watch::Sender<bool>,
}

macro_rules! register_route {
    ($inner:expr, $name:expr, $method:ident) => {{
        let weak = Arc::downgrade($inner);
        $inner.dispatcher.register(
            $name,
            Arc::new(FnMethodHandler::new(move |params, ctx| {
                let weak = weak.clone();
                Box::pin(async move {
                    match weak.upgrade() {
                        Some(inner) => inner.$method(params, ctx).await,
                        None => Err(JsonRpcError::internal_error("server has shut down")),
                    }
                }) as MethodFuture
            })),
        );
    }};
}

impl McpServer {
    /// A server with the given identity and capabilities, default config.
    pub fn new(info: ServerInfo, capabilities: ServerCapabilities) -> Self {
        Self::build(info, capabilities, ServerConfig::default())
    }

    /// A server whose capabilities derive from the config's capability
    /// section.
    pub fn from_config(info: ServerInfo, config: ServerConfig) -> Self {
        let capabilities = config.capabilities.to_server_capabilities();
        Self::build(info, capabilities, config)
    }

    fn build(info: ServerInfo, capabilities: ServerCapabilities, config: ServerConfig) -> Self {
        let broker = Arc::new(NotificationBroker::new(
            config.notifications.to_broker_config(),
        ));
        let (closed, _) = watch::channel(false);
        let inner: Arc<ServerInner> = Arc::new(ServerInner {
            info,
            capabilities,
            state: RwLock::new(SessionState::Uninitialized),
            session: RwLock::new(None),
            registry: Arc::new(ComponentRegistry::new()),
            dispatcher: MethodDispatcher::new(),
            broker: Arc::clone(&broker),
            jobs: OnceLock::new(),
            outbound: OutboundRequests::new(),
            cancellations: CancellationManager::new(),
            log_level: RwLock::new(LogLevel::Info),
            resource_subscriptions: RwLock::new(HashSet::new()),
            peer_sink: RwLock::new(None),
            closed,
            config,
        });
        ServerInner::install_methods(&inner);

        let inner_dyn: Arc<dyn JobExecutor> = inner.clone();
        let executor: Weak<dyn JobExecutor> = Arc::downgrade(&inner_dyn);
        let jobs = JobQueue::new(inner.config.async_jobs.to_queue_config(), executor, broker);
        let _ = inner.jobs.set(jobs);

        Self { inner }
    }

    pub fn info(&self) -> &ServerInfo {
        &self.inner.info
    }

    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.inner.capabilities
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.inner.registry
    }

    pub fn broker(&self) -> &Arc<NotificationBroker> {
        &self.inner.broker
    }

    pub fn jobs(&self) -> &Arc<JobQueue> {
        self.inner
            .jobs
            .get()
            .expect("job queue is initialized at construction")
    }

    /// Register a custom method. Built-in MCP methods are installed at
    /// construction; hot re-registration replaces.
    pub fn register_method(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn crate::dispatcher::MethodHandler>,
    ) {
        self.inner.dispatcher.register(name, handler);
    }

    pub fn method_names(&self) -> Vec<String> {
        self.inner.dispatcher.method_names()
    }

    pub async fn session_state(&self) -> SessionState {
        *self.inner.state.read().await
    }

    /// The engine as a transport message handler.
    pub fn message_handler(&self) -> Arc<dyn MessageHandler> {
        Arc::new(EngineHandler {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Publisher handed to `Subscribable` resource handlers.
    pub fn resource_update_publisher(&self) -> ResourceUpdatePublisher {
        ResourceUpdatePublisher::new(Arc::clone(&self.inner.broker))
    }

    /// Run filesystem discovery and populate the registry.
    pub async fn run_discovery(&self, bindings: &HandlerBindings) -> McpResult<DiscoveryReport> {
        let scanner = DiscoveryScanner::new(self.inner.config.discovery.clone())?;
        scanner.populate(&self.inner.registry, bindings).await
    }

    /// Publish `notifications/resources/updated` for a URI.
    pub async fn publish_resource_updated(&self, uri: &str) -> String {
        self.inner
            .broker
            .publish(notifications::RESOURCES_UPDATED, json!({"uri": uri}))
            .await
    }

    /// Publish a `notifications/message` log event, honoring the session's
    /// minimum level. Returns the notification id when published.
    pub async fn log_message(
        &self,
        level: LogLevel,
        logger: Option<&str>,
        data: Value,
    ) -> Option<String> {
        if level < *self.inner.log_level.read().await {
            return None;
        }
        let mut payload = json!({"level": level, "data": data});
        if let Some(logger) = logger {
            payload["logger"] = json!(logger);
        }
        Some(
            self.inner
                .broker
                .publish(notifications::MESSAGE, payload)
                .await,
        )
    }

    pub async fn notify_tools_list_changed(&self) {
        self.inner
            .broker
            .publish(notifications::TOOLS_LIST_CHANGED, json!({}))
            .await;
    }

    pub async fn notify_resources_list_changed(&self) {
        self.inner
            .broker
            .publish(notifications::RESOURCES_LIST_CHANGED, json!({}))
            .await;
    }

    pub async fn notify_prompts_list_changed(&self) {
        self.inner
            .broker
            .publish(notifications::PROMPTS_LIST_CHANGED, json!({}))
            .await;
    }

    /// Server-to-client RPC: send a request to the connected peer and await
    /// the correlated response.
    pub async fn request_peer(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        timeout: Duration,
    ) -> McpResult<JsonRpcResponse> {
        let id = RequestId::string(format!("srv-{}", uuid::Uuid::new_v4()));
        let receiver = self.inner.outbound.begin(id.clone());
        let sink = {
            let sink = self.inner.peer_sink.read().await;
            sink.clone().ok_or_else(|| {
                McpError::internal_error("no peer transport attached")
            })?
        };
        sink.send(JsonRpcMessage::Request(JsonRpcRequest::new(
            method,
            params,
            id.clone(),
        )))
        .await
        .map_err(|_| McpError::Protocol(conduit_mcp_core::error::ProtocolError::ConnectionClosed))?;

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(McpError::internal_error("response channel dropped")),
            Err(_) => {
                self.inner.outbound.abandon(&id);
                Err(McpError::request_timeout())
            }
        }
    }

    /// Begin shutdown: refuse new requests, close subscriptions, stop serve
    /// loops.
    pub async fn shutdown(&self) {
        {
            let mut state = self.inner.state.write().await;
            if state.is_shutting_down() {
                return;
            }
            *state = SessionState::ShuttingDown;
        }
        info!("server shutting down");
        self.inner.broker.close_all().await;
        let _ = self.inner.closed.send(true);
    }

    /// Serve on the transport selected by `transports.default`.
    pub async fn serve(&self) -> McpResult<()> {
        match self.inner.config.transports.default {
            TransportSelection::Stdio => self.serve_stdio().await,
            TransportSelection::Http => self.serve_http().await,
        }
    }

    /// Serve a single peer over stdio until EOF or shutdown.
    pub async fn serve_stdio(&self) -> McpResult<()> {
        let transport_config = self.inner.config.transports.stdio.to_transport_config();
        let mut transport = StdioTransport::new(transport_config);
        transport
            .start(self.message_handler())
            .await
            .map_err(|e| McpError::internal_error(format!("stdio transport failed: {e}")))?;

        let sender = transport
            .outbound_sender()
            .expect("transport started above");
        *self.inner.peer_sink.write().await = Some(sender.clone());

        // Everything the broker publishes flows to the single stdio peer.
        let (subscription, stream) = self
            .inner
            .broker
            .subscribe(transport.session_id().to_string(), Vec::new(), HashMap::new())
            .await;
        let pump = tokio::spawn(async move {
            let mut stream = stream.stream;
            while let Some(envelope) = stream.next().await {
                let message =
                    JsonRpcMessage::notification(envelope.event_type, Some(envelope.payload));
                if sender.send(message).await.is_err() {
                    break;
                }
            }
        });

        self.wait_closed().await;

        self.inner.broker.unsubscribe(&subscription.id).await;
        let _ = pump.await;
        transport
            .stop()
            .await
            .map_err(|e| McpError::internal_error(format!("stdio shutdown failed: {e}")))?;
        *self.inner.peer_sink.write().await = None;
        *self.inner.state.write().await = SessionState::Closed;
        Ok(())
    }

    /// Serve HTTP until shutdown. SSE streams subscribe through the broker.
    pub async fn serve_http(&self) -> McpResult<()> {
        let identity = HttpServerIdentity {
            info: self.inner.info.clone(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: self.inner.capabilities.clone(),
        };
        let hub: Arc<dyn SubscriberHub> = self.inner.broker.clone();
        let mut transport = HttpTransport::new(
            self.inner.config.transports.http.to_transport_config(),
            identity,
            hub,
        );
        transport
            .start(self.message_handler())
            .await
            .map_err(|e| McpError::internal_error(format!("http transport failed: {e}")))?;

        // Server-initiated messages ride the SSE broadcast.
        let broadcast = transport.broadcast_sender();
        let (sink_tx, mut sink_rx) = mpsc::channel::<JsonRpcMessage>(64);
        *self.inner.peer_sink.write().await = Some(sink_tx);
        let pump = tokio::spawn(async move {
            while let Some(message) = sink_rx.recv().await {
                let _ = broadcast.send(message);
            }
        });

        self.wait_closed().await;

        *self.inner.peer_sink.write().await = None;
        let _ = pump.await;
        transport
            .stop()
            .await
            .map_err(|e| McpError::internal_error(format!("http shutdown failed: {e}")))?;
        *self.inner.state.write().await = SessionState::Closed;
        Ok(())
    }

    async fn wait_closed(&self) {
        let mut closed = self.inner.closed.subscribe();
        while !*closed.borrow() {
            if closed.changed().await.is_err() {
                break;
            }
        }
    }
}

struct EngineHandler {
    inner: Arc<ServerInner>,
}

#[async_trait]
impl MessageHandler for EngineHandler {
    async fn on_message(
        &self,
        message: JsonRpcMessage,
        ctx: TransportContext,
    ) -> Option<JsonRpcMessage> {
        self.inner.process_message(message, ctx).await
    }

    async fn on_lifecycle(&self, event: LifecycleEvent, ctx: TransportContext) {
        match event {
            LifecycleEvent::Connected => {
                debug!(session_id = %ctx.session_id, transport = ctx.kind.as_str(), "peer connected");
            }
            LifecycleEvent::Disconnected => {
                info!(session_id = %ctx.session_id, "peer disconnected, closing session");
                *self.inner.state.write().await = SessionState::Closed;
                self.inner.broker.close_all().await;
                let _ = self.inner.closed.send(true);
            }
            LifecycleEvent::Error(cause) => {
                warn!(session_id = %ctx.session_id, %cause, "transport error");
            }
        }
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, JsonRpcError> {
    let params = params.ok_or_else(|| JsonRpcError::invalid_params("missing params"))?;
    serde_json::from_value(params).map_err(|e| JsonRpcError::invalid_params(e.to_string()))
}

fn parse_params_or_default<T: DeserializeOwned + Default>(
    params: Option<Value>,
) -> Result<T, JsonRpcError> {
    match params {
        None => Ok(T::default()),
        Some(value) => {
            serde_json::from_value(value).map_err(|e| JsonRpcError::invalid_params(e.to_string()))
        }
    }
}

fn to_result<T: Serialize>(value: &T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal_error(e.to_string()))
}

fn page_error(error: conduit_mcp_core::error::ProtocolError) -> JsonRpcError {
    McpError::Protocol(error).into()
}

#[derive(Debug, Deserialize)]
struct JobSubmitRequest {
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JobIdRequest {
    id: String,
    #[serde(default)]
    reason: Option<String>,
}

impl ServerInner {
    fn install_methods(inner: &Arc<Self>) {
        register_route!(inner, methods::INITIALIZE, handle_initialize);
        register_route!(inner, methods::PING, handle_ping);
        register_route!(inner, methods::SHUTDOWN, handle_shutdown);
        register_route!(inner, methods::TOOLS_LIST, handle_tools_list);
        register_route!(inner, methods::TOOLS_CALL, handle_tools_call);
        register_route!(inner, methods::RESOURCES_LIST, handle_resources_list);
        register_route!(
            inner,
            methods::RESOURCES_TEMPLATES_LIST,
            handle_resources_templates_list
        );
        register_route!(inner, methods::RESOURCES_READ, handle_resources_read);
        register_route!(inner, methods::RESOURCES_SUBSCRIBE, handle_resources_subscribe);
        register_route!(
            inner,
            methods::RESOURCES_UNSUBSCRIBE,
            handle_resources_unsubscribe
        );
        register_route!(inner, methods::PROMPTS_LIST, handle_prompts_list);
        register_route!(inner, methods::PROMPTS_GET, handle_prompts_get);
        register_route!(inner, methods::LOGGING_SET_LEVEL, handle_logging_set_level);
        register_route!(inner, methods::JOBS_SUBMIT, handle_jobs_submit);
        register_route!(inner, methods::JOBS_STATUS, handle_jobs_status);
        register_route!(inner, methods::JOBS_RESULT, handle_jobs_result);
        register_route!(inner, methods::JOBS_CANCEL, handle_jobs_cancel);
    }

    async fn process_message(
        &self,
        message: JsonRpcMessage,
        ctx: TransportContext,
    ) -> Option<JsonRpcMessage> {
        match message.kind() {
            MessageKind::Invalid => {
                warn!("rejecting invalid envelope");
                Some(JsonRpcMessage::Response(JsonRpcResponse::error(
                    JsonRpcError::invalid_request("envelope invariants violated"),
                    None,
                )))
            }
            MessageKind::Response => {
                if let JsonRpcMessage::Response(response) = message {
                    self.outbound.complete(response);
                }
                None
            }
            MessageKind::Notification => {
                if let JsonRpcMessage::Request(notification) = message {
                    self.handle_notification(notification, ctx).await;
                }
                None
            }
            MessageKind::Request => {
                if let JsonRpcMessage::Request(request) = message {
                    Some(JsonRpcMessage::Response(
                        self.handle_request(request, ctx).await,
                    ))
                } else {
                    None
                }
            }
        }
    }

    async fn handle_request(
        &self,
        request: JsonRpcRequest,
        tctx: TransportContext,
    ) -> JsonRpcResponse {
        let id = request.id.clone();
        let method = request.method.clone();
        debug!(%method, ?id, "handling request");

        let state = *self.state.read().await;
        if !state.allows_method(&method) {
            let error = match state {
                SessionState::Uninitialized => JsonRpcError::not_initialized(),
                SessionState::Initializing => {
                    if method == methods::INITIALIZE {
                        JsonRpcError::invalid_request("initialization already in progress")
                    } else {
                        JsonRpcError::not_initialized()
                    }
                }
                _ => JsonRpcError::new(error_codes::SERVER_ERROR, "server is shutting down"),
            };
            return JsonRpcResponse::error(error, id);
        }

        let request_key = id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_default();
        let token = self.cancellations.register(request_key.clone()).await;
        let reporter =
            ProgressReporter::new(Arc::clone(&self.broker), json!(request_key.clone()));
        let mut ctx = RequestContext::new(tctx.session_id)
            .with_cancellation(token)
            .with_progress(reporter);
        if let Some(request_id) = id.clone() {
            ctx = ctx.with_request_id(request_id);
        }

        let deadline = self.config.async_jobs.default_timeout();
        let response =
            match tokio::time::timeout(deadline, self.dispatcher.dispatch_request(request, ctx))
                .await
            {
                Ok(response) => response,
                Err(_) => {
                    // The handler ignored its token past the hard deadline:
                    // abandon it and answer -32603.
                    self.cancellations
                        .cancel(&request_key, "request deadline exceeded")
                        .await;
                    warn!(%method, "request deadline exceeded");
                    JsonRpcResponse::error(
                        JsonRpcError::internal_error("request deadline exceeded"),
                        id,
                    )
                }
            };
        self.cancellations.complete(&request_key).await;
        response
    }

    async fn handle_notification(&self, notification: JsonRpcRequest, tctx: TransportContext) {
        match notification.method.as_str() {
            notifications::INITIALIZED => {
                let mut state = self.state.write().await;
                if *state == SessionState::Initializing {
                    *state = SessionState::Initialized;
                    drop(state);
                    info!("session initialized");
                    self.emit_list_changed().await;
                } else {
                    warn!("unexpected notifications/initialized in state {:?}", *state);
                }
            }
            notifications::CANCELLED => {
                let Ok(cancelled) = serde_json::from_value::<CancelledNotification>(
                    notification.params.unwrap_or_default(),
                ) else {
                    debug!("malformed notifications/cancelled, ignoring");
                    return;
                };
                let key = match &cancelled.request_id {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let reason = cancelled
                    .reason
                    .unwrap_or_else(|| "cancelled by client".to_string());
                let request_hit = self.cancellations.cancel(&key, reason.clone()).await;
                let job_hit = match self.jobs.get() {
                    Some(jobs) => jobs.cancel(&key, reason).await,
                    None => false,
                };
                if !request_hit && !job_hit {
                    debug!(%key, "cancellation for unknown request");
                }
            }
            _ => {
                if self.dispatcher.has(&notification.method) {
                    let ctx = RequestContext::new(tctx.session_id);
                    self.dispatcher.dispatch_notification(notification, ctx).await;
                } else {
                    debug!(method = %notification.method, "unhandled notification");
                }
            }
        }
    }

    async fn emit_list_changed(&self) {
        if self.capabilities.supports_tool_list_changed() {
            self.broker
                .publish(notifications::TOOLS_LIST_CHANGED, json!({}))
                .await;
        }
        if self.capabilities.supports_resource_list_changed() {
            self.broker
                .publish(notifications::RESOURCES_LIST_CHANGED, json!({}))
                .await;
        }
        if self.capabilities.supports_prompt_list_changed() {
            self.broker
                .publish(notifications::PROMPTS_LIST_CHANGED, json!({}))
                .await;
        }
    }

    // ===== Method implementations =====

    async fn handle_initialize(
        &self,
        params: Option<Value>,
        _ctx: RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let request: InitializeRequest = parse_params(params)?;
        let negotiated = version::negotiate(&request.protocol_version)
            .map_err(|e| McpError::Protocol(e).into_rpc())?;

        {
            let mut state = self.state.write().await;
            if *state != SessionState::Uninitialized {
                return Err(JsonRpcError::invalid_request("server already initialized"));
            }
            *state = SessionState::Initializing;
        }
        *self.session.write().await = Some(NegotiatedSession {
            protocol_version: negotiated.to_string(),
            client_info: request.client_info.clone(),
            client_capabilities: request.capabilities,
        });
        info!(
            client = %request.client_info.name,
            version = %negotiated,
            "initialize accepted"
        );

        to_result(&InitializeResponse {
            protocol_version: negotiated.to_string(),
            capabilities: self.capabilities.clone(),
            server_info: self.info.clone(),
            instructions: None,
        })
    }

    async fn handle_ping(
        &self,
        _params: Option<Value>,
        _ctx: RequestContext,
    ) -> Result<Value, JsonRpcError> {
        Ok(json!({}))
    }

    async fn handle_shutdown(
        &self,
        params: Option<Value>,
        _ctx: RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let request: ShutdownRequest = parse_params_or_default(params)?;
        if let Some(reason) = &request.reason {
            info!(%reason, "shutdown requested");
        }
        *self.state.write().await = SessionState::ShuttingDown;
        let _ = self.closed.send(true);
        Ok(json!({}))
    }

    async fn handle_tools_list(
        &self,
        params: Option<Value>,
        _ctx: RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let request: ListToolsRequest = parse_params_or_default(params)?;
        let tools: Vec<Tool> = self
            .registry
            .list_tools()
            .await
            .iter()
            .map(|descriptor| descriptor.tool.clone())
            .collect();
        let (tools, next_cursor) =
            paginate(&tools, request.cursor.as_deref(), DEFAULT_PAGE_SIZE).map_err(page_error)?;
        to_result(&ListToolsResponse { tools, next_cursor })
    }

    async fn handle_tools_call(
        &self,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let request: ToolCallRequest = parse_params(params)?;
        let Some(descriptor) = self.registry.get_tool(&request.name).await else {
            return Err(JsonRpcError::invalid_params(format!(
                "unknown tool: {}",
                request.name
            )));
        };

        let arguments = request.arguments.unwrap_or_else(|| json!({}));
        let arguments =
            match conduit_mcp_core::schema::validate_arguments(&arguments, &descriptor.tool.input_schema)
            {
                Ok(arguments) => arguments,
                Err(issues) => {
                    return Err(JsonRpcError::invalid_params(format!(
                        "arguments for tool '{}' failed validation",
                        request.name
                    ))
                    .with_data(json!({ "errors": issues })));
                }
            };

        match descriptor.handler.call(arguments, ctx).await {
            Ok(result) => to_result(&result),
            // Protocol-level failures stay JSON-RPC errors; everything a
            // handler signals becomes an isError content envelope.
            Err(McpError::Protocol(e)) => Err(McpError::Protocol(e).into_rpc()),
            Err(error) => to_result(&ToolCallResponse::error(error.to_string())),
        }
    }

    async fn handle_resources_list(
        &self,
        params: Option<Value>,
        _ctx: RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let request: ListResourcesRequest = parse_params_or_default(params)?;
        let resources: Vec<Resource> = self
            .registry
            .list_resources()
            .await
            .iter()
            .map(|descriptor| descriptor.resource.clone())
            .collect();
        let (resources, next_cursor) =
            paginate(&resources, request.cursor.as_deref(), DEFAULT_PAGE_SIZE)
                .map_err(page_error)?;
        to_result(&ListResourcesResponse {
            resources,
            next_cursor,
        })
    }

    async fn handle_resources_templates_list(
        &self,
        params: Option<Value>,
        _ctx: RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let request: ListResourceTemplatesRequest = parse_params_or_default(params)?;
        let templates: Vec<ResourceTemplate> = self
            .registry
            .list_templates()
            .await
            .iter()
            .map(|descriptor| descriptor.template.clone())
            .collect();
        let (resource_templates, next_cursor) =
            paginate(&templates, request.cursor.as_deref(), DEFAULT_PAGE_SIZE)
                .map_err(page_error)?;
        to_result(&ListResourceTemplatesResponse {
            resource_templates,
            next_cursor,
        })
    }

    async fn handle_resources_read(
        &self,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let request: ReadResourceRequest = parse_params(params)?;

        if let Some(descriptor) = self.registry.get_resource(&request.uri).await {
            return match descriptor.handler.read(&request.uri, ctx).await {
                Ok(response) => to_result(&response),
                Err(error) => Err(error.into_rpc()),
            };
        }
        if let Some(descriptor) = self.registry.match_template(&request.uri).await {
            return match descriptor.handler.read(&request.uri, ctx).await {
                Ok(response) => to_result(&response),
                Err(error) => Err(error.into_rpc()),
            };
        }
        Err(McpError::resource_not_found(request.uri).into_rpc())
    }

    async fn handle_resources_subscribe(
        &self,
        params: Option<Value>,
        _ctx: RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let request: SubscribeRequest = parse_params(params)?;
        let Some(descriptor) = self.registry.get_resource(&request.uri).await else {
            return Err(McpError::resource_not_found(request.uri).into_rpc());
        };
        if !self.capabilities.supports_resource_subscriptions()
            || !descriptor.supports_subscription
        {
            return Err(
                McpError::Resource(ResourceError::SubscriptionDenied(request.uri)).into_rpc(),
            );
        }
        if let Some(subscribable) = &descriptor.subscribable {
            subscribable
                .subscribe(
                    &request.uri,
                    ResourceUpdatePublisher::new(Arc::clone(&self.broker)),
                )
                .await
                .map_err(McpError::into_rpc)?;
        }
        self.resource_subscriptions
            .write()
            .await
            .insert(request.uri);
        Ok(json!({}))
    }

    async fn handle_resources_unsubscribe(
        &self,
        params: Option<Value>,
        _ctx: RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let request: UnsubscribeRequest = parse_params(params)?;
        let was_subscribed = self
            .resource_subscriptions
            .write()
            .await
            .remove(&request.uri);
        if was_subscribed {
            if let Some(descriptor) = self.registry.get_resource(&request.uri).await {
                if let Some(subscribable) = &descriptor.subscribable {
                    subscribable
                        .unsubscribe(&request.uri)
                        .await
                        .map_err(McpError::into_rpc)?;
                }
            }
        }
        Ok(json!({}))
    }

    async fn handle_prompts_list(
        &self,
        params: Option<Value>,
        _ctx: RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let request: ListPromptsRequest = parse_params_or_default(params)?;
        let prompts: Vec<Prompt> = self
            .registry
            .list_prompts()
            .await
            .iter()
            .map(|descriptor| descriptor.prompt.clone())
            .collect();
        let (prompts, next_cursor) =
            paginate(&prompts, request.cursor.as_deref(), DEFAULT_PAGE_SIZE).map_err(page_error)?;
        to_result(&ListPromptsResponse {
            prompts,
            next_cursor,
        })
    }

    async fn handle_prompts_get(
        &self,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let request: GetPromptRequest = parse_params(params)?;
        let Some(descriptor) = self.registry.get_prompt(&request.name).await else {
            return Err(JsonRpcError::invalid_params(format!(
                "unknown prompt: {}",
                request.name
            )));
        };

        let arguments = request.arguments.unwrap_or_else(|| json!({}));
        let arguments = match conduit_mcp_core::schema::validate_arguments(
            &arguments,
            &descriptor.prompt.arguments_schema(),
        ) {
            Ok(arguments) => arguments,
            Err(issues) => {
                return Err(JsonRpcError::invalid_params(format!(
                    "arguments for prompt '{}' failed validation",
                    request.name
                ))
                .with_data(json!({ "errors": issues })));
            }
        };

        match descriptor.handler.render(arguments, ctx).await {
            Ok(response) => to_result(&response),
            Err(error) => Err(error.into_rpc()),
        }
    }

    async fn handle_logging_set_level(
        &self,
        params: Option<Value>,
        _ctx: RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let request: SetLevelRequest = parse_params(params)?;
        *self.log_level.write().await = request.level;
        debug!(level = ?request.level, "log level updated");
        Ok(json!({}))
    }

    fn job_queue(&self) -> Result<&Arc<JobQueue>, JsonRpcError> {
        self.jobs
            .get()
            .ok_or_else(|| JsonRpcError::internal_error("job queue not initialized"))
    }

    async fn handle_jobs_submit(
        &self,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let request: JobSubmitRequest = parse_params(params)?;
        if !self.dispatcher.has(&request.method) {
            return Err(JsonRpcError::invalid_params(format!(
                "unknown method: {}",
                request.method
            )));
        }
        let id = self
            .job_queue()?
            .enqueue(request.method, request.params, ctx.session_id)
            .await
            .map_err(McpError::into_rpc)?;
        Ok(json!({"id": id, "status": "queued"}))
    }

    async fn handle_jobs_status(
        &self,
        params: Option<Value>,
        _ctx: RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let request: JobIdRequest = parse_params(params)?;
        match self.job_queue()?.status(&request.id).await {
            Some(record) => to_result(&record),
            None => Err(JsonRpcError::invalid_params(format!(
                "unknown job: {}",
                request.id
            ))),
        }
    }

    async fn handle_jobs_result(
        &self,
        params: Option<Value>,
        _ctx: RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let request: JobIdRequest = parse_params(params)?;
        match self.job_queue()?.status(&request.id).await {
            Some(record) if record.status.is_terminal() => to_result(&record),
            Some(record) => Ok(json!({"id": record.id, "status": record.status})),
            None => Err(JsonRpcError::invalid_params(format!(
                "unknown job: {}",
                request.id
            ))),
        }
    }

    async fn handle_jobs_cancel(
        &self,
        params: Option<Value>,
        _ctx: RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let request: JobIdRequest = parse_params(params)?;
        let reason = request.reason.unwrap_or_else(|| "client request".to_string());
        let cancelled = self.job_queue()?.cancel(&request.id, reason).await;
        Ok(json!({"cancelled": cancelled}))
    }
}

#[async_trait]
impl JobExecutor for ServerInner {
    async fn execute(
        &self,
        method: &str,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> Result<Value, JsonRpcError> {
        self.dispatcher.invoke(method, params, ctx).await
    }
}

/// `?`-friendly conversion to the wire error.
trait IntoRpc {
    fn into_rpc(self) -> JsonRpcError;
}

impl IntoRpc for McpError {
    fn into_rpc(self) -> JsonRpcError {
        self.into()
    }
}
