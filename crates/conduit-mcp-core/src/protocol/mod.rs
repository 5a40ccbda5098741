//! JSON-RPC framing and MCP protocol machinery.

pub mod capabilities;
pub mod constants;
pub mod framing;
pub mod jsonrpc;
pub mod lifecycle;
pub mod version;

pub use capabilities::{
    ClientCapabilities, LoggingCapability, PromptsCapability, ResourcesCapability,
    RootsCapability, SamplingCapability, ServerCapabilities, ToolsCapability,
};
pub use framing::{FrameCodec, Framing, FramingError, DEFAULT_MAX_MESSAGE_SIZE};
pub use jsonrpc::{
    validate_message, JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, MessageKind,
    RequestId,
};
pub use lifecycle::{
    InitializeRequest, InitializeResponse, NegotiatedSession, SessionState, ShutdownRequest,
};
pub use version::{is_supported, negotiate, PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS};
