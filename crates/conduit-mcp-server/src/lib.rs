//! # Conduit MCP Server
//!
//! The server runtime of the Conduit MCP framework: the protocol engine
//! ([`McpServer`]), the method dispatcher, the component registry with
//! filesystem discovery, the notification broker, the async job queue, and
//! the typed configuration surface.
//!
//! ```no_run
//! use conduit_mcp_core::protocol::ServerCapabilities;
//! use conduit_mcp_core::types::{ServerInfo, Tool, ToolCallResponse};
//! use conduit_mcp_server::{McpServer, RequestContext, ToolDescriptor, ToolFn};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = McpServer::new(
//!         ServerInfo::new("example-server", "1.0.0"),
//!         ServerCapabilities::full(),
//!     );
//!     server
//!         .registry()
//!         .register_tool(ToolDescriptor::new(
//!             Tool::new(
//!                 "echo",
//!                 "Echo the input back",
//!                 serde_json::json!({
//!                     "type": "object",
//!                     "properties": {"value": {"type": "string"}},
//!                     "required": ["value"]
//!                 }),
//!             ),
//!             Arc::new(ToolFn(|args: serde_json::Value, _ctx: RequestContext| async move {
//!                 Ok(ToolCallResponse::text(args["value"].as_str().unwrap_or("").to_string()))
//!             })),
//!         ))
//!         .await?;
//!     server.serve_stdio().await?;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod config;
pub mod context;
pub mod discovery;
pub mod dispatcher;
pub mod handlers;
pub mod jobs;
pub mod registry;
pub mod runtime;
pub mod server;

pub use broker::{
    BrokerConfig, DeliveryStatus, NotificationBroker, OverflowPolicy, Subscription,
};
pub use config::{ConfigError, ServerConfig, TransportSelection};
pub use context::{ProgressReporter, RequestContext};
pub use discovery::{DiscoveryReport, DiscoveryScanner, HandlerBindings};
pub use dispatcher::{FnMethodHandler, MethodDispatcher, MethodHandler, OutboundRequests};
pub use handlers::{
    PromptFn, PromptHandler, ResourceFn, ResourceHandler, ResourceUpdatePublisher, Subscribable,
    ToolFn, ToolHandler,
};
pub use jobs::{JobQueue, JobQueueConfig, JobRecord, JobStatus};
pub use registry::{
    ComponentKind, ComponentRegistry, GroupAttributes, PromptDescriptor, RegistrationGroup,
    RegistryError, ResourceDescriptor, TemplateDescriptor, ToolDescriptor,
};
pub use runtime::{exit_codes, init_tracing};
pub use server::McpServer;
