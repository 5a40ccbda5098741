//! One-stop imports for building a Conduit MCP server.

pub use conduit_mcp_core::error::{error_codes, McpError, McpResult};
pub use conduit_mcp_core::protocol::{
    ClientCapabilities, FrameCodec, Framing, InitializeRequest, InitializeResponse, JsonRpcError,
    JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, RequestId, ServerCapabilities, SessionState,
    PROTOCOL_VERSION,
};
pub use conduit_mcp_core::schema::{schema_for, validate_arguments, ValidationIssue};
pub use conduit_mcp_core::types::{
    ClientInfo, GetPromptResponse, ListPromptsResponse, ListResourcesResponse, ListToolsResponse,
    LogLevel, Prompt, PromptArgument, PromptMessage, ReadResourceResponse, Resource,
    ResourceContents, ServerInfo, Tool, ToolCallRequest, ToolCallResponse, ToolContent,
};
pub use conduit_mcp_core::utils::CancellationToken;
pub use conduit_mcp_server::{
    ComponentKind, ComponentRegistry, DiscoveryScanner, GroupAttributes, HandlerBindings,
    JobStatus, McpServer, NotificationBroker, OverflowPolicy, PromptDescriptor, PromptFn,
    PromptHandler, RequestContext, ResourceDescriptor, ResourceFn, ResourceHandler,
    ResourceUpdatePublisher, ServerConfig, Subscribable, ToolDescriptor, ToolFn, ToolHandler,
};
pub use conduit_mcp_transport::{
    HttpTransport, HttpTransportConfig, StdioTransport, StdioTransportConfig, Transport,
};
