//! Session lifecycle: `initialize` handshake payloads and the state machine.

use crate::protocol::capabilities::{ClientCapabilities, ServerCapabilities};
use crate::types::info::{ClientInfo, ServerInfo};
use serde::{Deserialize, Serialize};

/// Parameters of the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ClientCapabilities,
    pub client_info: ClientInfo,
}

/// Result of a successful `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: ServerInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Parameters of the `shutdown` request.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ShutdownRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Session lifecycle state.
///
/// `initialize` moves Uninitialized to Initializing; the client's
/// `notifications/initialized` completes the handshake. Most methods are
/// rejected until then.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Initialized,
    ShuttingDown,
    Closed,
}

impl SessionState {
    /// Whether ordinary MCP methods may be dispatched.
    pub fn can_operate(self) -> bool {
        matches!(self, SessionState::Initialized)
    }

    pub fn is_shutting_down(self) -> bool {
        matches!(self, SessionState::ShuttingDown | SessionState::Closed)
    }

    /// Methods allowed regardless of initialization state.
    pub fn allows_method(self, method: &str) -> bool {
        use crate::protocol::constants::methods;
        match self {
            SessionState::Uninitialized => {
                method == methods::INITIALIZE || method == methods::PING
            }
            SessionState::Initializing => {
                method == methods::PING
            }
            SessionState::Initialized => true,
            SessionState::ShuttingDown | SessionState::Closed => method == methods::PING,
        }
    }
}

/// Negotiated per-session data recorded by the engine after `initialize`.
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiatedSession {
    pub protocol_version: String,
    pub client_info: ClientInfo,
    pub client_capabilities: ClientCapabilities,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::methods;
    use serde_json::json;

    #[test]
    fn initialize_request_parses_wire_shape() {
        let request: InitializeRequest = serde_json::from_value(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {"name": "c", "version": "1"}
        }))
        .unwrap();
        assert_eq!(request.protocol_version, "2024-11-05");
        assert_eq!(request.client_info.name, "c");
    }

    #[test]
    fn gate_admits_initialize_and_ping_only() {
        let state = SessionState::Uninitialized;
        assert!(state.allows_method(methods::INITIALIZE));
        assert!(state.allows_method(methods::PING));
        assert!(!state.allows_method(methods::TOOLS_LIST));
        assert!(!state.allows_method(methods::RESOURCES_READ));
    }

    #[test]
    fn initializing_rejects_everything_but_ping() {
        let state = SessionState::Initializing;
        assert!(state.allows_method(methods::PING));
        assert!(!state.allows_method(methods::INITIALIZE));
        assert!(!state.allows_method(methods::TOOLS_CALL));
    }

    #[test]
    fn initialized_allows_all() {
        assert!(SessionState::Initialized.allows_method(methods::TOOLS_CALL));
        assert!(SessionState::Initialized.can_operate());
    }
}
