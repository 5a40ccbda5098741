//! Protocol string constants.

/// The JSON-RPC version literal carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Maximum accepted length for string request IDs.
pub const MAX_REQUEST_ID_LENGTH: usize = 256;

/// MCP request method names.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const SHUTDOWN: &str = "shutdown";
    pub const PING: &str = "ping";

    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";

    pub const RESOURCES_LIST: &str = "resources/list";
    pub const RESOURCES_TEMPLATES_LIST: &str = "resources/templates/list";
    pub const RESOURCES_READ: &str = "resources/read";
    pub const RESOURCES_SUBSCRIBE: &str = "resources/subscribe";
    pub const RESOURCES_UNSUBSCRIBE: &str = "resources/unsubscribe";

    pub const PROMPTS_LIST: &str = "prompts/list";
    pub const PROMPTS_GET: &str = "prompts/get";

    pub const LOGGING_SET_LEVEL: &str = "logging/setLevel";

    pub const JOBS_SUBMIT: &str = "jobs/submit";
    pub const JOBS_STATUS: &str = "jobs/status";
    pub const JOBS_RESULT: &str = "jobs/result";
    pub const JOBS_CANCEL: &str = "jobs/cancel";
}

/// MCP notification method names.
pub mod notifications {
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const CANCELLED: &str = "notifications/cancelled";
    pub const PROGRESS: &str = "notifications/progress";
    pub const MESSAGE: &str = "notifications/message";

    pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
    pub const RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
    pub const RESOURCES_UPDATED: &str = "notifications/resources/updated";
    pub const PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";
}
