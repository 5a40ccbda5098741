//! JSON-RPC 2.0 envelope types.
//!
//! A message on the wire is one of four shapes: request, notification
//! (a request without an `id`), success response, or error response.
//! `JsonRpcMessage` deserializes any of them; [`MessageKind`] classifies a
//! parsed message for dispatch.

use crate::protocol::constants::{JSONRPC_VERSION, MAX_REQUEST_ID_LENGTH};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;

/// JSON-RPC 2.0 request ID: string or number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl RequestId {
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    pub fn number(n: i64) -> Self {
        Self::Number(n)
    }

    pub fn validate(&self) -> Result<(), crate::error::ProtocolError> {
        if let RequestId::String(s) = self {
            if s.is_empty() {
                return Err(crate::error::ProtocolError::InvalidRequestId(
                    "request ID string cannot be empty".to_string(),
                ));
            }
            if s.len() > MAX_REQUEST_ID_LENGTH {
                return Err(crate::error::ProtocolError::InvalidRequestId(format!(
                    "request ID string too long (max {MAX_REQUEST_ID_LENGTH} characters)"
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "{s}"),
            RequestId::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

/// JSON-RPC 2.0 request (or notification, when `id` is absent).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: Cow<'static, str>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Option<Value>, id: RequestId) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            method: method.into(),
            params,
            id: Some(id),
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            method: method.into(),
            params,
            id: None,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC 2.0 response. Exactly one of `result` / `error` is present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<RequestId>,
}

impl JsonRpcResponse {
    pub fn success(result: Value, id: Option<RequestId>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(error: JsonRpcError, id: Option<RequestId>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            result: None,
            error: Some(error),
            id,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_some()
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::new(
            crate::error::error_codes::PARSE_ERROR,
            format!("Parse error: {}", detail.into()),
        )
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(
            crate::error::error_codes::INVALID_REQUEST,
            format!("Invalid request: {}", detail.into()),
        )
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            crate::error::error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {method}"),
        )
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::new(
            crate::error::error_codes::INVALID_PARAMS,
            format!("Invalid params: {}", detail.into()),
        )
    }

    pub fn internal_error(detail: impl Into<String>) -> Self {
        Self::new(
            crate::error::error_codes::INTERNAL_ERROR,
            format!("Internal error: {}", detail.into()),
        )
    }

    pub fn not_initialized() -> Self {
        Self::new(
            crate::error::error_codes::NOT_INITIALIZED,
            "Server not initialized",
        )
    }
}

/// A decoded JSON-RPC message.
///
/// Untagged: a request-shaped value (with or without `id`) deserializes as
/// `Request`; a result/error-shaped value deserializes as `Response`. Use
/// [`JsonRpcMessage::kind`] to classify, which also separates notifications
/// from requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
}

/// Classification of a decoded message for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Notification,
    Response,
    Invalid,
}

impl JsonRpcMessage {
    pub fn request(request: JsonRpcRequest) -> Self {
        Self::Request(request)
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Request(JsonRpcRequest::notification(method, params))
    }

    pub fn response(response: JsonRpcResponse) -> Self {
        Self::Response(response)
    }

    pub fn id(&self) -> Option<&RequestId> {
        match self {
            JsonRpcMessage::Request(req) => req.id.as_ref(),
            JsonRpcMessage::Response(resp) => resp.id.as_ref(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            JsonRpcMessage::Request(req) => {
                if req.jsonrpc != JSONRPC_VERSION || req.method.is_empty() {
                    MessageKind::Invalid
                } else if req.id.is_none() {
                    MessageKind::Notification
                } else {
                    MessageKind::Request
                }
            }
            JsonRpcMessage::Response(resp) => {
                if resp.jsonrpc != JSONRPC_VERSION
                    || resp.result.is_some() == resp.error.is_some()
                {
                    MessageKind::Invalid
                } else {
                    MessageKind::Response
                }
            }
        }
    }
}

/// Validate envelope invariants on a decoded message.
pub fn validate_message(message: &JsonRpcMessage) -> Result<(), crate::error::ProtocolError> {
    match message {
        JsonRpcMessage::Request(request) => {
            if request.jsonrpc != JSONRPC_VERSION {
                return Err(crate::error::ProtocolError::InvalidVersion(
                    request.jsonrpc.to_string(),
                ));
            }
            if request.method.is_empty() {
                return Err(crate::error::ProtocolError::InvalidRequest(
                    "method name cannot be empty".to_string(),
                ));
            }
            if let Some(ref id) = request.id {
                id.validate()?;
            }
        }
        JsonRpcMessage::Response(response) => {
            if response.jsonrpc != JSONRPC_VERSION {
                return Err(crate::error::ProtocolError::InvalidVersion(
                    response.jsonrpc.to_string(),
                ));
            }
            if response.result.is_some() && response.error.is_some() {
                return Err(crate::error::ProtocolError::InvalidResponse(
                    "response cannot carry both result and error".to_string(),
                ));
            }
            if response.result.is_none() && response.error.is_none() {
                return Err(crate::error::ProtocolError::InvalidResponse(
                    "response must carry either result or error".to_string(),
                ));
            }
            if let Some(ref id) = response.id {
                id.validate()?;
            }
        }
    }
    Ok(())
}
