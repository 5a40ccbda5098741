//! Error types for the Conduit MCP core crate.
//!
//! `McpError` is the canonical error type across the workspace. It wraps the
//! per-domain error enums (protocol, tool, resource) together with the usual
//! serde/io escape hatches, and owns the mapping onto JSON-RPC wire codes via
//! `From<McpError> for JsonRpcError`.

use thiserror::Error;

/// Canonical result type for MCP operations.
pub type McpResult<T> = Result<T, McpError>;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl McpError {
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::Protocol(ProtocolError::InvalidParams(msg.into()))
    }

    pub fn method_not_found(msg: impl Into<String>) -> Self {
        Self::Protocol(ProtocolError::MethodNotFound(msg.into()))
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::Protocol(ProtocolError::InvalidRequest(msg.into()))
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::Protocol(ProtocolError::InternalError(msg.into()))
    }

    pub fn not_initialized() -> Self {
        Self::Protocol(ProtocolError::NotInitialized)
    }

    pub fn request_timeout() -> Self {
        Self::Protocol(ProtocolError::RequestTimeout)
    }

    pub fn resource_not_found(uri: impl Into<String>) -> Self {
        Self::Resource(ResourceError::NotFound(uri.into()))
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid JSON-RPC version: {0}")]
    InvalidVersion(String),

    #[error("Invalid request ID: {0}")]
    InvalidRequestId(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Server not initialized")]
    NotInitialized,

    #[error("Unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(String),

    #[error("Request timeout")]
    RequestTimeout,

    #[error("Request cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Connection closed")]
    ConnectionClosed,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    Unknown(String),

    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid tool input: {0}")]
    InvalidInput(String),
}

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("Subscriptions not supported by resource: {0}")]
    SubscriptionDenied(String),

    #[error("Resource read failed: {0}")]
    ReadFailed(String),
}

/// JSON-RPC and MCP wire error codes.
///
/// The five standard JSON-RPC 2.0 codes plus the MCP-specific codes inside
/// the reserved server range `-32000..=-32099`.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    pub const SERVER_ERROR: i32 = -32000;
    pub const RESOURCE_NOT_FOUND: i32 = -32001;
    pub const NOT_INITIALIZED: i32 = -32002;
    pub const SUBSCRIPTION_DENIED: i32 = -32003;
    pub const TOOL_EXECUTION_ERROR: i32 = -32004;

    pub const SERVER_ERROR_START: i32 = -32000;
    pub const SERVER_ERROR_END: i32 = -32099;
}

impl From<McpError> for crate::protocol::JsonRpcError {
    fn from(err: McpError) -> Self {
        use crate::protocol::JsonRpcError;

        match err {
            McpError::Protocol(ProtocolError::MethodNotFound(method)) => JsonRpcError::new(
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {method}"),
            ),
            McpError::Protocol(ProtocolError::InvalidParams(msg)) => {
                JsonRpcError::new(error_codes::INVALID_PARAMS, format!("Invalid params: {msg}"))
            }
            McpError::Protocol(ProtocolError::InvalidRequest(msg)) => JsonRpcError::new(
                error_codes::INVALID_REQUEST,
                format!("Invalid request: {msg}"),
            ),
            McpError::Protocol(ProtocolError::InvalidVersion(msg)) => JsonRpcError::new(
                error_codes::INVALID_REQUEST,
                format!("Invalid JSON-RPC version: {msg}"),
            ),
            McpError::Protocol(ProtocolError::InvalidRequestId(msg)) => JsonRpcError::new(
                error_codes::INVALID_REQUEST,
                format!("Invalid request ID: {msg}"),
            ),
            McpError::Protocol(ProtocolError::InvalidResponse(msg)) => JsonRpcError::new(
                error_codes::INVALID_REQUEST,
                format!("Invalid response: {msg}"),
            ),
            McpError::Protocol(ProtocolError::NotInitialized) => JsonRpcError::new(
                error_codes::NOT_INITIALIZED,
                "Server not initialized".to_string(),
            ),
            McpError::Protocol(ProtocolError::UnsupportedProtocolVersion(version)) => {
                JsonRpcError::new(
                    error_codes::INVALID_PARAMS,
                    format!("Unsupported protocol version: {version}"),
                )
            }
            McpError::Protocol(ProtocolError::RequestTimeout) => {
                JsonRpcError::new(error_codes::INTERNAL_ERROR, "Request timeout".to_string())
            }
            McpError::Protocol(ProtocolError::Cancelled(reason)) => JsonRpcError::new(
                error_codes::SERVER_ERROR,
                format!("Request cancelled: {reason}"),
            ),
            McpError::Protocol(ProtocolError::InternalError(msg)) => {
                JsonRpcError::new(error_codes::INTERNAL_ERROR, format!("Internal error: {msg}"))
            }
            McpError::Protocol(ProtocolError::ConnectionClosed) => JsonRpcError::new(
                error_codes::INTERNAL_ERROR,
                "Connection closed".to_string(),
            ),
            McpError::Tool(ToolError::Unknown(name)) => JsonRpcError::new(
                error_codes::INVALID_PARAMS,
                format!("Unknown tool: {name}"),
            ),
            McpError::Tool(ToolError::ExecutionFailed(msg)) => JsonRpcError::new(
                error_codes::TOOL_EXECUTION_ERROR,
                format!("Tool execution failed: {msg}"),
            ),
            McpError::Tool(ToolError::InvalidInput(msg)) => JsonRpcError::new(
                error_codes::INVALID_PARAMS,
                format!("Invalid tool input: {msg}"),
            ),
            McpError::Resource(ResourceError::NotFound(uri)) => JsonRpcError::new(
                error_codes::RESOURCE_NOT_FOUND,
                format!("Resource not found: {uri}"),
            ),
            McpError::Resource(ResourceError::InvalidUri(uri)) => JsonRpcError::new(
                error_codes::INVALID_PARAMS,
                format!("Invalid URI: {uri}"),
            ),
            McpError::Resource(ResourceError::SubscriptionDenied(uri)) => JsonRpcError::new(
                error_codes::SUBSCRIPTION_DENIED,
                format!("Resource does not support subscriptions: {uri}"),
            ),
            McpError::Resource(ResourceError::ReadFailed(msg)) => JsonRpcError::new(
                error_codes::INTERNAL_ERROR,
                format!("Resource read failed: {msg}"),
            ),
            McpError::Serialization(e) => JsonRpcError::new(
                error_codes::PARSE_ERROR,
                format!("Serialization error: {e}"),
            ),
            McpError::Io(e) => {
                JsonRpcError::new(error_codes::INTERNAL_ERROR, format!("IO error: {e}"))
            }
            McpError::Other(e) => {
                JsonRpcError::new(error_codes::INTERNAL_ERROR, format!("{e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::JsonRpcError;

    #[test]
    fn wire_codes_match_taxonomy() {
        let cases: Vec<(McpError, i32)> = vec![
            (McpError::method_not_found("frobnicate"), -32601),
            (McpError::invalid_params("bad"), -32602),
            (McpError::invalid_request("bad"), -32600),
            (McpError::internal_error("boom"), -32603),
            (McpError::not_initialized(), -32002),
            (McpError::resource_not_found("file:///x"), -32001),
            (
                McpError::Resource(ResourceError::SubscriptionDenied("file:///x".into())),
                -32003,
            ),
        ];
        for (err, code) in cases {
            let rpc: JsonRpcError = err.into();
            assert_eq!(rpc.code, code);
            assert!(!rpc.message.is_empty());
        }
    }

    #[test]
    fn server_range_codes_stay_in_range() {
        for code in [
            error_codes::SERVER_ERROR,
            error_codes::RESOURCE_NOT_FOUND,
            error_codes::NOT_INITIALIZED,
            error_codes::SUBSCRIPTION_DENIED,
            error_codes::TOOL_EXECUTION_ERROR,
        ] {
            assert!((error_codes::SERVER_ERROR_END..=error_codes::SERVER_ERROR_START).contains(&code));
        }
    }
}
