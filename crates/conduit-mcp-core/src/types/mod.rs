//! MCP data types: tools, resources, prompts, notifications, identities.

pub mod info;
pub mod notifications;
pub mod prompts;
pub mod resources;
pub mod tools;

pub use info::{ClientInfo, ServerInfo};
pub use notifications::{
    CancelledNotification, LogLevel, LoggingMessageNotification, ProgressNotification,
    ResourceUpdatedNotification, SetLevelRequest,
};
pub use prompts::{
    GetPromptRequest, GetPromptResponse, ListPromptsRequest, ListPromptsResponse, MessageContent,
    Prompt, PromptArgument, PromptMessage, Role,
};
pub use resources::{
    ListResourceTemplatesRequest, ListResourceTemplatesResponse, ListResourcesRequest,
    ListResourcesResponse, ReadResourceRequest, ReadResourceResponse, Resource, ResourceContents,
    ResourceTemplate, SubscribeRequest, UnsubscribeRequest,
};
pub use tools::{
    ListToolsRequest, ListToolsResponse, Tool, ToolCallRequest, ToolCallResponse, ToolContent,
};
