//! # Conduit MCP
//!
//! A server-side [Model Context Protocol](https://modelcontextprotocol.io)
//! framework: JSON-RPC 2.0 engine with capability negotiation, stdio and
//! HTTP/SSE transports, a typed component registry with filesystem
//! discovery, schema-validated invocations, a notification broker, and an
//! async job queue.
//!
//! This crate is the facade; the implementation lives in the member crates:
//!
//! - [`conduit_mcp_core`]: envelope, frame codec, lifecycle, wire types,
//!   schema validation
//! - [`conduit_mcp_transport`]: stdio and HTTP transports
//! - [`conduit_mcp_server`]: engine, registry, discovery, broker, jobs,
//!   config
//!
//! Most applications only need the [`prelude`].

pub use conduit_mcp_core;
pub use conduit_mcp_server;
pub use conduit_mcp_transport;

pub mod prelude;

pub use conduit_mcp_core::{McpError, McpResult};
pub use conduit_mcp_server::McpServer;
