//! Tool types: listings, invocations, and the content envelope returned by
//! tool handlers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool as listed to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    pub name: String,
    pub description: String,
    /// JSON schema describing the tool's arguments object.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ListToolsRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListToolsResponse {
    pub tools: Vec<Tool>,
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters of `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// The content envelope produced by a tool invocation.
///
/// `is_error` is always serialized: a handler-signalled failure travels as
/// `isError: true` in the *result*, never as a JSON-RPC error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallResponse {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolCallResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(text)],
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(message)],
            is_error: true,
        }
    }
}

/// One content block inside a tool result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text {
        text: String,
    },
    Image {
        /// Base64-encoded image bytes.
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        uri: String,
        #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self::Image {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn resource(uri: impl Into<String>) -> Self {
        Self::Resource {
            uri: uri.into(),
            mime_type: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_serializes_input_schema_wire_name() {
        let tool = Tool::new("echo", "Echo the input", json!({"type": "object"}));
        let value = serde_json::to_value(&tool).unwrap();
        assert!(value.get("inputSchema").is_some());
        assert!(value.get("input_schema").is_none());
    }

    #[test]
    fn success_envelope_carries_is_error_false() {
        let value = serde_json::to_value(ToolCallResponse::text("5")).unwrap();
        assert_eq!(value["isError"], json!(false));
        assert_eq!(value["content"][0]["type"], json!("text"));
        assert_eq!(value["content"][0]["text"], json!("5"));
    }

    #[test]
    fn failure_envelope_is_a_result_not_an_error() {
        let value = serde_json::to_value(ToolCallResponse::error("division by zero")).unwrap();
        assert_eq!(value["isError"], json!(true));
    }

    #[test]
    fn content_variants_tag_by_type() {
        let image = serde_json::to_value(ToolContent::image("aGk=", "image/png")).unwrap();
        assert_eq!(image["type"], json!("image"));
        assert_eq!(image["mimeType"], json!("image/png"));

        let resource = serde_json::to_value(ToolContent::resource("file:///a")).unwrap();
        assert_eq!(resource["type"], json!("resource"));
    }
}
