//! # Conduit MCP Core
//!
//! Protocol substrate for the Conduit MCP server framework: the JSON-RPC 2.0
//! envelope and its frame codec, the MCP lifecycle (capability negotiation,
//! version handshake, session states), the wire types for tools, resources,
//! and prompts, a JSON-schema subset validator for invocation arguments, and
//! shared utilities (opaque pagination cursors, cooperative cancellation,
//! identifier generation).
//!
//! Transports live in `conduit-mcp-transport`; the registry, discovery,
//! dispatch, broker, and job-queue machinery live in `conduit-mcp-server`.
//!
//! ## Modules
//!
//! - [`protocol`]: envelope, framing, lifecycle, capabilities, versions
//! - [`types`]: tools, resources, prompts, notifications, identities
//! - [`schema`]: argument validation and schema derivation
//! - [`utils`]: pagination, cancellation, identifiers
//! - [`error`]: the `McpError` taxonomy and wire-code mapping

pub mod error;
pub mod protocol;
pub mod schema;
pub mod types;
pub mod utils;

pub use error::{error_codes, McpError, McpResult, ProtocolError, ResourceError, ToolError};
pub use protocol::{
    ClientCapabilities, FrameCodec, Framing, FramingError, InitializeRequest, InitializeResponse,
    JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, MessageKind, RequestId,
    ServerCapabilities, SessionState, PROTOCOL_VERSION,
};
pub use types::{
    ClientInfo, LogLevel, Prompt, PromptArgument, Resource, ServerInfo, Tool, ToolCallRequest,
    ToolCallResponse, ToolContent,
};
