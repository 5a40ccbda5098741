//! Component registry: the write-once home of tool, resource, and prompt
//! descriptors.
//!
//! Descriptors live in insertion-ordered partitions keyed by name (URI for
//! resources). Registration of a duplicate key fails with
//! [`RegistryError::AlreadyRegistered`] and leaves the partition untouched.
//! Reads take the reader side of a `RwLock`; writes are serialized by the
//! writer side.

use crate::handlers::{PromptHandler, ResourceHandler, Subscribable, ToolHandler};
use conduit_mcp_core::types::prompts::Prompt;
use conduit_mcp_core::types::resources::{Resource, ResourceTemplate};
use conduit_mcp_core::types::tools::Tool;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Tool,
    Resource,
    Prompt,
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentKind::Tool => write!(f, "tool"),
            ComponentKind::Resource => write!(f, "resource"),
            ComponentKind::Prompt => write!(f, "prompt"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{kind} '{name}' is already registered")]
    AlreadyRegistered { kind: ComponentKind, name: String },

    #[error("{kind} '{name}' is not registered")]
    NotFound { kind: ComponentKind, name: String },
}

/// A registered tool: its listing entry plus the invocable handler.
pub struct ToolDescriptor {
    pub tool: Tool,
    pub handler: Arc<dyn ToolHandler>,
    pub middleware: Vec<String>,
    pub metadata: HashMap<String, Value>,
}

impl ToolDescriptor {
    pub fn new(tool: Tool, handler: Arc<dyn ToolHandler>) -> Self {
        Self {
            tool,
            handler,
            middleware: Vec::new(),
            metadata: HashMap::new(),
        }
    }
}

/// A registered resource, keyed by URI.
pub struct ResourceDescriptor {
    pub resource: Resource,
    pub supports_subscription: bool,
    pub handler: Arc<dyn ResourceHandler>,
    pub subscribable: Option<Arc<dyn Subscribable>>,
    pub middleware: Vec<String>,
    pub metadata: HashMap<String, Value>,
}

impl ResourceDescriptor {
    pub fn new(resource: Resource, handler: Arc<dyn ResourceHandler>) -> Self {
        Self {
            resource,
            supports_subscription: false,
            handler,
            subscribable: None,
            middleware: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn subscribable(mut self, subscribable: Arc<dyn Subscribable>) -> Self {
        self.supports_subscription = true;
        self.subscribable = Some(subscribable);
        self
    }
}

/// A registered resource template, matched when no exact URI is registered.
pub struct TemplateDescriptor {
    pub template: ResourceTemplate,
    pub handler: Arc<dyn ResourceHandler>,
    pub middleware: Vec<String>,
    pub metadata: HashMap<String, Value>,
}

impl TemplateDescriptor {
    pub fn new(template: ResourceTemplate, handler: Arc<dyn ResourceHandler>) -> Self {
        Self {
            template,
            handler,
            middleware: Vec::new(),
            metadata: HashMap::new(),
        }
    }
}

/// A registered prompt.
pub struct PromptDescriptor {
    pub prompt: Prompt,
    pub handler: Arc<dyn PromptHandler>,
    pub middleware: Vec<String>,
    pub metadata: HashMap<String, Value>,
}

impl PromptDescriptor {
    pub fn new(prompt: Prompt, handler: Arc<dyn PromptHandler>) -> Self {
        Self {
            prompt,
            handler,
            middleware: Vec::new(),
            metadata: HashMap::new(),
        }
    }
}

/// One insertion-ordered partition.
struct Partition<T> {
    order: Vec<String>,
    entries: HashMap<String, Arc<T>>,
}

impl<T> Default for Partition<T> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            entries: HashMap::new(),
        }
    }
}

impl<T> Partition<T> {
    fn insert(&mut self, kind: ComponentKind, name: String, value: T) -> Result<(), RegistryError> {
        if self.entries.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered { kind, name });
        }
        self.order.push(name.clone());
        self.entries.insert(name, Arc::new(value));
        Ok(())
    }

    fn remove(&mut self, kind: ComponentKind, name: &str) -> Result<Arc<T>, RegistryError> {
        match self.entries.remove(name) {
            Some(value) => {
                self.order.retain(|n| n != name);
                Ok(value)
            }
            None => Err(RegistryError::NotFound {
                kind,
                name: name.to_string(),
            }),
        }
    }

    fn get(&self, name: &str) -> Option<Arc<T>> {
        self.entries.get(name).cloned()
    }

    fn list(&self) -> Vec<Arc<T>> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name).cloned())
            .collect()
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// The registry: three partitions plus resource templates.
#[derive(Default)]
pub struct ComponentRegistry {
    tools: RwLock<Partition<ToolDescriptor>>,
    resources: RwLock<Partition<ResourceDescriptor>>,
    templates: RwLock<Partition<TemplateDescriptor>>,
    prompts: RwLock<Partition<PromptDescriptor>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_tool(&self, descriptor: ToolDescriptor) -> Result<(), RegistryError> {
        let name = descriptor.tool.name.clone();
        self.tools
            .write()
            .await
            .insert(ComponentKind::Tool, name, descriptor)
    }

    pub async fn register_resource(
        &self,
        descriptor: ResourceDescriptor,
    ) -> Result<(), RegistryError> {
        let uri = descriptor.resource.uri.clone();
        self.resources
            .write()
            .await
            .insert(ComponentKind::Resource, uri, descriptor)
    }

    pub async fn register_template(
        &self,
        descriptor: TemplateDescriptor,
    ) -> Result<(), RegistryError> {
        let key = descriptor.template.uri_template.clone();
        self.templates
            .write()
            .await
            .insert(ComponentKind::Resource, key, descriptor)
    }

    pub async fn register_prompt(&self, descriptor: PromptDescriptor) -> Result<(), RegistryError> {
        let name = descriptor.prompt.name.clone();
        self.prompts
            .write()
            .await
            .insert(ComponentKind::Prompt, name, descriptor)
    }

    pub async fn unregister_tool(&self, name: &str) -> Result<(), RegistryError> {
        self.tools
            .write()
            .await
            .remove(ComponentKind::Tool, name)
            .map(|_| ())
    }

    pub async fn unregister_resource(&self, uri: &str) -> Result<(), RegistryError> {
        self.resources
            .write()
            .await
            .remove(ComponentKind::Resource, uri)
            .map(|_| ())
    }

    pub async fn unregister_prompt(&self, name: &str) -> Result<(), RegistryError> {
        self.prompts
            .write()
            .await
            .remove(ComponentKind::Prompt, name)
            .map(|_| ())
    }

    pub async fn get_tool(&self, name: &str) -> Option<Arc<ToolDescriptor>> {
        self.tools.read().await.get(name)
    }

    pub async fn get_resource(&self, uri: &str) -> Option<Arc<ResourceDescriptor>> {
        self.resources.read().await.get(uri)
    }

    pub async fn get_prompt(&self, name: &str) -> Option<Arc<PromptDescriptor>> {
        self.prompts.read().await.get(name)
    }

    /// The first registered template matching `uri`, in insertion order.
    pub async fn match_template(&self, uri: &str) -> Option<Arc<TemplateDescriptor>> {
        self.templates
            .read()
            .await
            .list()
            .into_iter()
            .find(|descriptor| descriptor.template.matches(uri))
    }

    pub async fn has_tool(&self, name: &str) -> bool {
        self.tools.read().await.entries.contains_key(name)
    }

    pub async fn has_resource(&self, uri: &str) -> bool {
        self.resources.read().await.entries.contains_key(uri)
    }

    pub async fn has_prompt(&self, name: &str) -> bool {
        self.prompts.read().await.entries.contains_key(name)
    }

    /// Tools in insertion order.
    pub async fn list_tools(&self) -> Vec<Arc<ToolDescriptor>> {
        self.tools.read().await.list()
    }

    pub async fn list_resources(&self) -> Vec<Arc<ResourceDescriptor>> {
        self.resources.read().await.list()
    }

    pub async fn list_templates(&self) -> Vec<Arc<TemplateDescriptor>> {
        self.templates.read().await.list()
    }

    pub async fn list_prompts(&self) -> Vec<Arc<PromptDescriptor>> {
        self.prompts.read().await.list()
    }

    pub async fn counts(&self) -> (usize, usize, usize) {
        (
            self.tools.read().await.len(),
            self.resources.read().await.len(),
            self.prompts.read().await.len(),
        )
    }

    /// Open a registration group applying shared attributes to everything
    /// registered through it.
    pub fn group(&self, attrs: GroupAttributes) -> RegistrationGroup<'_> {
        RegistrationGroup {
            registry: self,
            attrs,
        }
    }
}

/// Shared attributes applied by a registration group.
#[derive(Debug, Clone, Default)]
pub struct GroupAttributes {
    pub name_prefix: String,
    pub middleware: Vec<String>,
    pub metadata: HashMap<String, Value>,
}

impl GroupAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    pub fn with_middleware(mut self, tag: impl Into<String>) -> Self {
        self.middleware.push(tag.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Compose with a nested group's attributes: prefixes concatenate,
    /// middleware accumulates, metadata merges with the inner group winning.
    fn compose(&self, inner: &GroupAttributes) -> GroupAttributes {
        let mut middleware = self.middleware.clone();
        middleware.extend(inner.middleware.iter().cloned());
        let mut metadata = self.metadata.clone();
        metadata.extend(inner.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        GroupAttributes {
            name_prefix: format!("{}{}", self.name_prefix, inner.name_prefix),
            middleware,
            metadata,
        }
    }
}

/// A scope of registrations sharing [`GroupAttributes`]. Groups nest via
/// [`RegistrationGroup::child`].
pub struct RegistrationGroup<'a> {
    registry: &'a ComponentRegistry,
    attrs: GroupAttributes,
}

impl<'a> RegistrationGroup<'a> {
    pub fn child(&self, attrs: GroupAttributes) -> RegistrationGroup<'a> {
        RegistrationGroup {
            registry: self.registry,
            attrs: self.attrs.compose(&attrs),
        }
    }

    pub fn attributes(&self) -> &GroupAttributes {
        &self.attrs
    }

    fn apply_common(&self, middleware: &mut Vec<String>, metadata: &mut HashMap<String, Value>) {
        let mut combined = self.attrs.middleware.clone();
        combined.append(middleware);
        *middleware = combined;
        for (key, value) in &self.attrs.metadata {
            metadata.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    pub async fn register_tool(&self, mut descriptor: ToolDescriptor) -> Result<(), RegistryError> {
        descriptor.tool.name = format!("{}{}", self.attrs.name_prefix, descriptor.tool.name);
        self.apply_common(&mut descriptor.middleware, &mut descriptor.metadata);
        self.registry.register_tool(descriptor).await
    }

    pub async fn register_resource(
        &self,
        mut descriptor: ResourceDescriptor,
    ) -> Result<(), RegistryError> {
        descriptor.resource.name =
            format!("{}{}", self.attrs.name_prefix, descriptor.resource.name);
        self.apply_common(&mut descriptor.middleware, &mut descriptor.metadata);
        self.registry.register_resource(descriptor).await
    }

    pub async fn register_prompt(
        &self,
        mut descriptor: PromptDescriptor,
    ) -> Result<(), RegistryError> {
        descriptor.prompt.name = format!("{}{}", self.attrs.name_prefix, descriptor.prompt.name);
        self.apply_common(&mut descriptor.middleware, &mut descriptor.metadata);
        self.registry.register_prompt(descriptor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestContext;
    use crate::handlers::ToolFn;
    use async_trait::async_trait;
    use conduit_mcp_core::error::McpResult;
    use conduit_mcp_core::types::resources::ReadResourceResponse;
    use conduit_mcp_core::types::tools::ToolCallResponse;
    use serde_json::json;

    fn noop_tool(name: &str) -> ToolDescriptor {
        ToolDescriptor::new(
            Tool::new(name, "test tool", json!({"type": "object"})),
            Arc::new(ToolFn(
                |_args: serde_json::Value, _ctx: RequestContext| async {
                    Ok(ToolCallResponse::text("ok"))
                },
            )),
        )
    }

    struct StaticResource;

    #[async_trait]
    impl crate::handlers::ResourceHandler for StaticResource {
        async fn read(&self, uri: &str, _ctx: RequestContext) -> McpResult<ReadResourceResponse> {
            Ok(ReadResourceResponse {
                contents: vec![conduit_mcp_core::types::resources::ResourceContents::text(
                    uri, "data",
                )],
            })
        }
    }

    #[tokio::test]
    async fn duplicate_registration_fails_and_preserves_state() {
        let registry = ComponentRegistry::new();
        registry.register_tool(noop_tool("echo")).await.unwrap();

        let err = registry.register_tool(noop_tool("echo")).await.unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered { .. }));

        // State equals that after only the first registration.
        let tools = registry.list_tools().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].tool.name, "echo");
    }

    #[tokio::test]
    async fn listing_preserves_insertion_order() {
        let registry = ComponentRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry.register_tool(noop_tool(name)).await.unwrap();
        }
        let names: Vec<String> = registry
            .list_tools()
            .await
            .iter()
            .map(|d| d.tool.name.clone())
            .collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[tokio::test]
    async fn unregister_then_reregister_succeeds() {
        let registry = ComponentRegistry::new();
        registry.register_tool(noop_tool("echo")).await.unwrap();
        registry.unregister_tool("echo").await.unwrap();
        assert!(!registry.has_tool("echo").await);
        registry.register_tool(noop_tool("echo")).await.unwrap();
    }

    #[tokio::test]
    async fn groups_compose_prefixes_middleware_and_metadata() {
        let registry = ComponentRegistry::new();
        let outer = registry.group(
            GroupAttributes::new()
                .with_prefix("math/")
                .with_middleware("auth")
                .with_metadata("team", json!("core")),
        );
        let inner = outer.child(
            GroupAttributes::new()
                .with_prefix("int/")
                .with_middleware("rate-limit"),
        );

        inner.register_tool(noop_tool("add")).await.unwrap();

        let descriptor = registry.get_tool("math/int/add").await.unwrap();
        assert_eq!(descriptor.middleware, vec!["auth", "rate-limit"]);
        assert_eq!(descriptor.metadata["team"], json!("core"));
    }

    #[tokio::test]
    async fn template_matching_falls_back_in_insertion_order() {
        let registry = ComponentRegistry::new();
        registry
            .register_template(TemplateDescriptor::new(
                ResourceTemplate::new("file:///logs/{date}.log", "daily-log"),
                Arc::new(StaticResource),
            ))
            .await
            .unwrap();

        assert!(registry.match_template("file:///logs/2024-01-01.log").await.is_some());
        assert!(registry.match_template("file:///other/x").await.is_none());
    }
}
