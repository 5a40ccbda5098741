//! Handler traits implemented by tool, resource, and prompt providers.
//!
//! Handlers are values: the registry stores them as trait objects and the
//! engine invokes them with validated arguments plus a [`RequestContext`]
//! carrying the cancellation signal. The three kinds differ only in their
//! result type.

use crate::broker::NotificationBroker;
use crate::context::RequestContext;
use async_trait::async_trait;
use conduit_mcp_core::error::McpResult;
use conduit_mcp_core::protocol::constants::notifications;
use conduit_mcp_core::types::prompts::GetPromptResponse;
use conduit_mcp_core::types::resources::ReadResourceResponse;
use conduit_mcp_core::types::tools::ToolCallResponse;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;

/// A callable tool. Arguments arrive validated against the tool's declared
/// input schema, with defaults filled.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value, ctx: RequestContext) -> McpResult<ToolCallResponse>;
}

/// A readable resource (or family of resources behind a URI template).
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn read(&self, uri: &str, ctx: RequestContext) -> McpResult<ReadResourceResponse>;
}

/// A prompt template renderer.
#[async_trait]
pub trait PromptHandler: Send + Sync {
    async fn render(&self, arguments: Value, ctx: RequestContext) -> McpResult<GetPromptResponse>;
}

/// Opt-in subscription capability for resource handlers.
///
/// The model is stateful: on subscribe the handler receives a publisher and
/// emits `notifications/resources/updated` itself whenever the resource
/// changes. The engine never polls.
#[async_trait]
pub trait Subscribable: Send + Sync {
    async fn subscribe(&self, uri: &str, publisher: ResourceUpdatePublisher) -> McpResult<()>;

    async fn unsubscribe(&self, uri: &str) -> McpResult<()>;
}

/// Handle a subscribed resource handler uses to announce changes.
#[derive(Clone)]
pub struct ResourceUpdatePublisher {
    broker: Arc<NotificationBroker>,
}

impl ResourceUpdatePublisher {
    pub fn new(broker: Arc<NotificationBroker>) -> Self {
        Self { broker }
    }

    /// Publish `notifications/resources/updated` for `uri`; returns the
    /// notification id.
    pub async fn resource_updated(&self, uri: &str) -> String {
        self.broker
            .publish(notifications::RESOURCES_UPDATED, json!({"uri": uri}))
            .await
    }
}

/// Adapter turning an async closure into a [`ToolHandler`].
pub struct ToolFn<F>(pub F);

#[async_trait]
impl<F, Fut> ToolHandler for ToolFn<F>
where
    F: Fn(Value, RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = McpResult<ToolCallResponse>> + Send,
{
    async fn call(&self, arguments: Value, ctx: RequestContext) -> McpResult<ToolCallResponse> {
        (self.0)(arguments, ctx).await
    }
}

/// Adapter turning an async closure into a [`ResourceHandler`].
pub struct ResourceFn<F>(pub F);

#[async_trait]
impl<F, Fut> ResourceHandler for ResourceFn<F>
where
    F: Fn(String, RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = McpResult<ReadResourceResponse>> + Send,
{
    async fn read(&self, uri: &str, ctx: RequestContext) -> McpResult<ReadResourceResponse> {
        (self.0)(uri.to_string(), ctx).await
    }
}

/// Adapter turning an async closure into a [`PromptHandler`].
pub struct PromptFn<F>(pub F);

#[async_trait]
impl<F, Fut> PromptHandler for PromptFn<F>
where
    F: Fn(Value, RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = McpResult<GetPromptResponse>> + Send,
{
    async fn render(&self, arguments: Value, ctx: RequestContext) -> McpResult<GetPromptResponse> {
        (self.0)(arguments, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_mcp_core::types::tools::ToolContent;

    #[tokio::test]
    async fn closure_adapters_invoke() {
        let handler = ToolFn(|args: Value, _ctx: RequestContext| async move {
            let a = args["a"].as_f64().unwrap_or_default();
            let b = args["b"].as_f64().unwrap_or_default();
            Ok(ToolCallResponse {
                content: vec![ToolContent::text((a + b).to_string())],
                is_error: false,
            })
        });
        let ctx = RequestContext::new("test");
        let result = handler.call(json!({"a": 2, "b": 3}), ctx).await.unwrap();
        assert!(!result.is_error);
        assert_eq!(
            result.content,
            vec![ToolContent::text("5")]
        );
    }
}
