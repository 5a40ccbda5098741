//! Capability documents exchanged during `initialize`.

use serde::{Deserialize, Serialize};

/// Capabilities advertised by a connecting client.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ClientCapabilities {
    /// Filesystem roots the client can expose to the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<RootsCapability>,

    /// LLM sampling on behalf of the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<SamplingCapability>,

    /// Anything the client advertises that this server does not model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<serde_json::Value>,
}

/// Capabilities advertised by the server.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsCapability>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingCapability>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RootsCapability {
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SamplingCapability {}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ResourcesCapability {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,

    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PromptsCapability {
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LoggingCapability {}

impl ServerCapabilities {
    /// Everything on: the default for a server that registers all three
    /// component kinds.
    pub fn full() -> Self {
        Self {
            tools: Some(ToolsCapability {
                list_changed: Some(true),
            }),
            resources: Some(ResourcesCapability {
                subscribe: Some(true),
                list_changed: Some(true),
            }),
            prompts: Some(PromptsCapability {
                list_changed: Some(true),
            }),
            logging: Some(LoggingCapability {}),
        }
    }

    pub fn supports_tool_list_changed(&self) -> bool {
        self.tools
            .as_ref()
            .and_then(|t| t.list_changed)
            .unwrap_or(false)
    }

    pub fn supports_resource_subscriptions(&self) -> bool {
        self.resources
            .as_ref()
            .and_then(|r| r.subscribe)
            .unwrap_or(false)
    }

    pub fn supports_resource_list_changed(&self) -> bool {
        self.resources
            .as_ref()
            .and_then(|r| r.list_changed)
            .unwrap_or(false)
    }

    pub fn supports_prompt_list_changed(&self) -> bool {
        self.prompts
            .as_ref()
            .and_then(|p| p.list_changed)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn full_capabilities_serialize_with_wire_names() {
        let value = serde_json::to_value(ServerCapabilities::full()).unwrap();
        assert_eq!(value["tools"]["listChanged"], json!(true));
        assert_eq!(value["resources"]["subscribe"], json!(true));
        assert_eq!(value["prompts"]["listChanged"], json!(true));
        assert!(value["logging"].is_object());
    }

    #[test]
    fn absent_sections_are_omitted() {
        let caps = ServerCapabilities {
            tools: Some(ToolsCapability {
                list_changed: Some(true),
            }),
            ..Default::default()
        };
        let value = serde_json::to_value(&caps).unwrap();
        assert!(value.get("resources").is_none());
        assert!(value.get("prompts").is_none());
    }

    #[test]
    fn feature_queries_default_to_false() {
        let caps = ServerCapabilities::default();
        assert!(!caps.supports_tool_list_changed());
        assert!(!caps.supports_resource_subscriptions());
    }
}
