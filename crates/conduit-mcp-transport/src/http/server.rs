//! HTTP transport server.
//!
//! Routes:
//! - `POST /`: JSON-RPC request/response. Status 200 for any well-formed
//!   JSON-RPC (errors travel in the envelope); 400 only for non-JSON bodies;
//!   202 for notifications.
//! - `OPTIONS /`: CORS preflight, answered by the CORS layer.
//! - `GET /health`: liveness plus transport counters, 200/503.
//! - `GET /info`: server identity, protocol, capabilities, endpoints.
//! - `GET /events`: SSE stream of broker notifications for this caller,
//!   one `event:`/`data:` pair per notification, with keep-alive comments.
//!
//! Concurrent POSTs are served in parallel by axum; each request carries an
//! ephemeral session keyed by the caller's `mcp-session-id` header (one is
//! minted when absent). An SSE connection registers a broker subscription
//! that is torn down when the client disconnects.

use crate::events::{SubscriberHub, SubscriberStream};
use crate::{
    ConnectionState, MessageHandler, Result, Transport, TransportContext, TransportError,
    TransportKind, TransportMetrics, TransportStats,
};
use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::{header::HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use conduit_mcp_core::protocol::capabilities::ServerCapabilities;
use conduit_mcp_core::protocol::jsonrpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcResponse, RequestId,
};
use conduit_mcp_core::types::info::ServerInfo;
use conduit_mcp_core::utils::generate_session_id;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

const SESSION_HEADER: &str = "mcp-session-id";

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub origins: Vec<String>,
    pub methods: Vec<String>,
    pub headers: Vec<String>,
    pub max_age: Duration,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: vec!["*".to_string()],
            methods: vec!["GET".to_string(), "POST".to_string(), "OPTIONS".to_string()],
            headers: vec![
                "content-type".to_string(),
                "authorization".to_string(),
                SESSION_HEADER.to_string(),
            ],
            max_age: Duration::from_secs(3600),
        }
    }
}

/// Injected bearer-token policy. Anything richer belongs to an auth backend
/// outside this crate.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub host: String,
    pub port: u16,
    pub cors: CorsConfig,
    pub auth: AuthConfig,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            cors: CorsConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

/// What `GET /info` reports about the server behind this transport.
#[derive(Debug, Clone)]
pub struct HttpServerIdentity {
    pub info: ServerInfo,
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
}

struct AppState {
    config: HttpTransportConfig,
    identity: HttpServerIdentity,
    handler: Arc<dyn MessageHandler>,
    hub: Arc<dyn SubscriberHub>,
    broadcast: tokio::sync::broadcast::Sender<JsonRpcMessage>,
    metrics: Arc<TransportMetrics>,
    state: Arc<StdRwLock<ConnectionState>>,
}

pub struct HttpTransport {
    config: HttpTransportConfig,
    identity: HttpServerIdentity,
    hub: Arc<dyn SubscriberHub>,
    broadcast: tokio::sync::broadcast::Sender<JsonRpcMessage>,
    state: Arc<StdRwLock<ConnectionState>>,
    metrics: Arc<TransportMetrics>,
    shutdown: Option<watch::Sender<bool>>,
    server_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl HttpTransport {
    pub fn new(
        config: HttpTransportConfig,
        identity: HttpServerIdentity,
        hub: Arc<dyn SubscriberHub>,
    ) -> Self {
        let (broadcast, _) = tokio::sync::broadcast::channel(256);
        Self {
            config,
            identity,
            hub,
            broadcast,
            state: Arc::new(StdRwLock::new(ConnectionState::Idle)),
            metrics: Arc::new(TransportMetrics::default()),
            shutdown: None,
            server_task: None,
            local_addr: None,
        }
    }

    /// The bound address, available after `start` (useful with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Sender fanning out to every live SSE stream (the `message` event).
    pub fn broadcast_sender(&self) -> tokio::sync::broadcast::Sender<JsonRpcMessage> {
        self.broadcast.clone()
    }

    /// Build the router without binding a listener; tests drive it with
    /// `tower::ServiceExt::oneshot`.
    pub fn router(&self, handler: Arc<dyn MessageHandler>) -> Router {
        let state = Arc::new(AppState {
            config: self.config.clone(),
            identity: self.identity.clone(),
            handler,
            hub: Arc::clone(&self.hub),
            broadcast: self.broadcast.clone(),
            metrics: Arc::clone(&self.metrics),
            state: Arc::clone(&self.state),
        });

        Router::new()
            .route("/", post(post_rpc))
            .route("/health", get(get_health))
            .route("/info", get(get_info))
            .route("/events", get(get_events))
            .layer(cors_layer(&self.config.cors))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    fn set_state(&self, next: ConnectionState) {
        *self.state.write().expect("state lock poisoned") = next;
    }
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origins = if config.origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            config
                .origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };
    let methods: Vec<Method> = config
        .methods
        .iter()
        .filter_map(|m| m.parse().ok())
        .collect();
    let headers: Vec<HeaderName> = config
        .headers
        .iter()
        .filter_map(|h| h.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(headers)
        .max_age(config.max_age)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn start(&mut self, handler: Arc<dyn MessageHandler>) -> Result<()> {
        if self.server_task.is_some() {
            return Err(TransportError::Initialization {
                message: "transport already started".to_string(),
            });
        }

        let router = self.router(handler);
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            TransportError::Initialization {
                message: format!("failed to bind {addr}: {e}"),
            }
        })?;
        self.local_addr = listener.local_addr().ok();

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        self.shutdown = Some(shutdown_tx);

        info!(addr = %addr, "HTTP transport listening");
        self.set_state(ConnectionState::Connected);
        self.metrics.mark_connected();

        let state = Arc::clone(&self.state);
        self.server_task = Some(tokio::spawn(async move {
            let serve = axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.changed().await;
                });
            if let Err(e) = serve.await {
                error!("HTTP server failed: {e}");
                *state.write().expect("state lock poisoned") =
                    ConnectionState::Failed(e.to_string());
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.set_state(ConnectionState::ShuttingDown);
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(task) = self.server_task.take() {
            let _ = task.await;
        }
        self.set_state(ConnectionState::Disconnected);
        debug!("HTTP transport stopped");
        Ok(())
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<()> {
        // Fan out to every live SSE stream; no subscribers is not an error.
        let _ = self.broadcast.send(message);
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        self.state.read().expect("state lock poisoned").clone()
    }

    fn stats(&self) -> TransportStats {
        self.metrics.snapshot()
    }
}

fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    if !state.config.auth.enabled {
        return true;
    }
    let Some(expected) = &state.config.auth.token else {
        return false;
    };
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|presented| presented == expected)
}

fn session_id_from(headers: &HeaderMap) -> String {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(generate_session_id)
}

async fn post_rpc(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !authorized(&state, &headers) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(JsonRpcResponse::error(
                JsonRpcError::new(-32000, "Unauthorized"),
                None,
            )),
        )
            .into_response();
    }

    // 400 is reserved for bodies that are not JSON at all; a JSON body that
    // is not a valid envelope earns a 200 with `-32600` in the envelope.
    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            state.metrics.parse_errors.fetch_add(1, Ordering::Relaxed);
            return (
                StatusCode::BAD_REQUEST,
                Json(JsonRpcResponse::error(
                    JsonRpcError::parse_error(e.to_string()),
                    None,
                )),
            )
                .into_response();
        }
    };

    let message: JsonRpcMessage = match serde_json::from_value(value.clone()) {
        Ok(message) => message,
        Err(e) => {
            let id: Option<RequestId> =
                value.get("id").and_then(|id| serde_json::from_value(id.clone()).ok());
            return Json(JsonRpcResponse::error(
                JsonRpcError::invalid_request(e.to_string()),
                id,
            ))
            .into_response();
        }
    };

    let session_id = session_id_from(&headers);
    state.metrics.messages_received.fetch_add(1, Ordering::Relaxed);
    let ctx = TransportContext::new(session_id.clone(), TransportKind::Http);

    match state.handler.on_message(message, ctx).await {
        Some(reply) => {
            state.metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
            (
                StatusCode::OK,
                [(SESSION_HEADER, session_id)],
                Json(reply),
            )
                .into_response()
        }
        None => (StatusCode::ACCEPTED, [(SESSION_HEADER, session_id)]).into_response(),
    }
}

async fn get_health(State(state): State<Arc<AppState>>) -> Response {
    let connection = state.state.read().expect("state lock poisoned").clone();
    let healthy = matches!(connection, ConnectionState::Connected);
    let stats = state.metrics.snapshot();
    let body = json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "checks": {
            "listener": if healthy { "ok" } else { "down" },
        },
        "transport": {
            "kind": "http",
            "messagesReceived": stats.messages_received,
            "messagesSent": stats.messages_sent,
            "parseErrors": stats.parse_errors,
        },
    });
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

async fn get_info(State(state): State<Arc<AppState>>) -> Response {
    let identity = &state.identity;
    Json(json!({
        "server": {
            "name": identity.info.name,
            "version": identity.info.version,
        },
        "protocol": {
            "version": identity.protocol_version,
            "transport": "http",
        },
        "capabilities": identity.capabilities,
        "endpoints": {
            "rpc": "/",
            "events": "/events",
            "health": "/health",
            "info": "/info",
        },
    }))
    .into_response()
}

/// Closes the broker subscription when the SSE stream is dropped.
struct SubscriptionGuard {
    hub: Arc<dyn SubscriberHub>,
    subscription_id: String,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let hub = Arc::clone(&self.hub);
        let id = std::mem::take(&mut self.subscription_id);
        tokio::spawn(async move {
            hub.close(&id).await;
        });
    }
}

async fn get_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let client_id = session_id_from(&headers);
    let types: Vec<String> = params
        .get("types")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let filter: HashMap<String, Value> = params
        .get("filter")
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();

    let SubscriberStream {
        subscription_id,
        stream,
    } = state.hub.open(client_id.clone(), types, filter).await;
    debug!(%client_id, %subscription_id, "SSE stream opened");

    let guard = SubscriptionGuard {
        hub: Arc::clone(&state.hub),
        subscription_id,
    };

    let notifications = stream.map(move |envelope| {
        let _held_open = &guard;
        let data = serde_json::to_string(&envelope.payload).unwrap_or_else(|_| "{}".to_string());
        Ok::<Event, std::convert::Infallible>(
            Event::default()
                .id(envelope.id)
                .event(envelope.event_type)
                .data(data),
        )
    });

    let server_messages = tokio_stream::wrappers::BroadcastStream::new(state.broadcast.subscribe())
        .filter_map(|result| async move { result.ok() })
        .map(|message| {
            let data = serde_json::to_string(&message).unwrap_or_else(|_| "{}".to_string());
            Ok::<Event, std::convert::Infallible>(Event::default().event("message").data(data))
        });

    let merged = futures::stream::select(notifications, server_messages);

    Sse::new(merged)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keep-alive"),
        )
        .into_response()
}
