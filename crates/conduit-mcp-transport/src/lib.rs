//! # Conduit MCP Transport
//!
//! Transport layer for the Conduit MCP framework. Two transports share one
//! contract: a [`Transport`] is started with an attached [`MessageHandler`]
//! and invokes it once per received, decoded message; outbound traffic goes
//! through [`Transport::send`] over a bounded queue.
//!
//! - [`stdio::StdioTransport`]: a single peer over standard input/output,
//!   framed by the core codec (newline-delimited or `Content-Length`).
//! - [`http::HttpTransport`]: JSON-RPC over `POST /`, CORS preflight,
//!   `GET /health`, `GET /info`, and Server-Sent Events on `GET /events`
//!   for push notifications.

use async_trait::async_trait;
use conduit_mcp_core::protocol::JsonRpcMessage;
use std::time::SystemTime;
use thiserror::Error;

pub mod events;
pub mod http;
pub mod stdio;

pub use events::{NotificationEnvelope, SubscriberHub, SubscriberStream};
pub use http::{HttpServerIdentity, HttpTransport, HttpTransportConfig};
pub use stdio::{StdioTransport, StdioTransportConfig};

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport not ready: {state:?}")]
    NotReady { state: ConnectionState },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("serialization error: {message}")]
    Serialization { message: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("initialization error: {message}")]
    Initialization { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Connection state exposed by every transport.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connected,
    ShuttingDown,
    Disconnected,
    Failed(String),
}

/// Counters kept by every transport, snapshotted on demand.
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub parse_errors: u64,
    pub send_errors: u64,
    pub connected_at: Option<SystemTime>,
}

/// Shared atomic counters behind [`TransportStats`].
#[derive(Debug, Default)]
pub(crate) struct TransportMetrics {
    pub messages_sent: std::sync::atomic::AtomicU64,
    pub messages_received: std::sync::atomic::AtomicU64,
    pub parse_errors: std::sync::atomic::AtomicU64,
    pub send_errors: std::sync::atomic::AtomicU64,
    pub connected_at: std::sync::RwLock<Option<SystemTime>>,
}

impl TransportMetrics {
    pub(crate) fn snapshot(&self) -> TransportStats {
        use std::sync::atomic::Ordering;
        TransportStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            connected_at: *self.connected_at.read().expect("metrics lock poisoned"),
        }
    }

    pub(crate) fn mark_connected(&self) {
        *self.connected_at.write().expect("metrics lock poisoned") = Some(SystemTime::now());
    }
}

/// Which transport a message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Http,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Http => "http",
        }
    }
}

/// Per-message delivery context handed to the [`MessageHandler`].
#[derive(Debug, Clone)]
pub struct TransportContext {
    /// Session identity: the single stdio peer, or the caller identity of an
    /// HTTP request / SSE stream.
    pub session_id: String,
    pub kind: TransportKind,
}

impl TransportContext {
    pub fn new(session_id: impl Into<String>, kind: TransportKind) -> Self {
        Self {
            session_id: session_id.into(),
            kind,
        }
    }
}

/// Transport lifecycle events surfaced to the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Connected,
    Disconnected,
    Error(String),
}

/// The message-handler contract shared by both transports.
///
/// `on_message` is invoked once per received, decoded message. A returned
/// message (the response to a request) is delivered back to the peer;
/// notifications return `None`.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(
        &self,
        message: JsonRpcMessage,
        ctx: TransportContext,
    ) -> Option<JsonRpcMessage>;

    async fn on_lifecycle(&self, event: LifecycleEvent, ctx: TransportContext) {
        let _ = (event, ctx);
    }
}

/// Contract shared by both transports: started with a handler, stopped
/// gracefully, and able to push server-initiated messages to the peer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Begin moving bytes; every decoded inbound message is handed to
    /// `handler`.
    async fn start(&mut self, handler: std::sync::Arc<dyn MessageHandler>) -> Result<()>;

    /// Graceful shutdown: flush pending outbound frames within the
    /// configured timeout, then close.
    async fn stop(&mut self) -> Result<()>;

    /// Queue a server-initiated message (notification or server-to-client
    /// request) for delivery. Applies backpressure when the outbound queue
    /// is full.
    async fn send(&self, message: JsonRpcMessage) -> Result<()>;

    fn state(&self) -> ConnectionState;

    fn stats(&self) -> TransportStats;
}
