//! Filesystem discovery of component manifests.
//!
//! Discovery scans configured roots (`Mcp/Tools`, `Mcp/Resources`,
//! `Mcp/Prompts` by default) for JSON manifests. The kind is inferred from
//! the root a file lives under; the manifest declares the component's name
//! (defaulting to the file stem), description, schema, and the name of an
//! in-process handler binding. Compiled code cannot be loaded from disk, so
//! manifests bind declared metadata to handlers registered in a
//! [`HandlerBindings`] map.
//!
//! Scan results are cached keyed by the set of (path, mtime) pairs plus a
//! TTL; `clear_cache` invalidates explicitly. Malformed manifests and
//! unknown bindings are logged and skipped, never fatal. A duplicate name
//! across roots surfaces the registry's `AlreadyRegistered` error.

use crate::config::DiscoveryConfig;
use crate::handlers::{PromptHandler, ResourceHandler, Subscribable, ToolHandler};
use crate::registry::{
    ComponentKind, ComponentRegistry, PromptDescriptor, ResourceDescriptor, TemplateDescriptor,
    ToolDescriptor,
};
use conduit_mcp_core::error::{McpError, McpResult};
use conduit_mcp_core::types::prompts::{Prompt, PromptArgument};
use conduit_mcp_core::types::resources::{Resource, ResourceTemplate};
use conduit_mcp_core::types::tools::Tool;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Instant, SystemTime};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// One manifest file's declarations.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComponentManifest {
    /// Defaults to the file stem when absent.
    name: Option<String>,
    description: Option<String>,
    /// Name of the in-process handler binding.
    handler: String,
    input_schema: Option<Value>,
    uri: Option<String>,
    uri_template: Option<String>,
    mime_type: Option<String>,
    #[serde(default)]
    supports_subscription: bool,
    #[serde(default)]
    arguments: Vec<PromptArgument>,
    #[serde(default)]
    metadata: HashMap<String, Value>,
}

/// A parsed candidate prior to registration.
#[derive(Debug, Clone)]
pub struct DiscoveredComponent {
    pub kind: ComponentKind,
    pub path: PathBuf,
    pub name: String,
    manifest: ComponentManifest,
}

/// In-process handler implementations that manifests may bind to.
#[derive(Default)]
pub struct HandlerBindings {
    tools: HashMap<String, Arc<dyn ToolHandler>>,
    resources: HashMap<String, Arc<dyn ResourceHandler>>,
    subscribables: HashMap<String, Arc<dyn Subscribable>>,
    prompts: HashMap<String, Arc<dyn PromptHandler>>,
}

impl HandlerBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_tool(mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) -> Self {
        self.tools.insert(name.into(), handler);
        self
    }

    pub fn bind_resource(
        mut self,
        name: impl Into<String>,
        handler: Arc<dyn ResourceHandler>,
    ) -> Self {
        self.resources.insert(name.into(), handler);
        self
    }

    pub fn bind_subscribable(
        mut self,
        name: impl Into<String>,
        subscribable: Arc<dyn Subscribable>,
    ) -> Self {
        self.subscribables.insert(name.into(), subscribable);
        self
    }

    pub fn bind_prompt(mut self, name: impl Into<String>, handler: Arc<dyn PromptHandler>) -> Self {
        self.prompts.insert(name.into(), handler);
        self
    }
}

/// Outcome of a populate pass.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub registered: usize,
    /// Files skipped with the reason, for operator logs.
    pub skipped: Vec<(PathBuf, String)>,
}

struct ScanCache {
    fingerprint: Vec<(PathBuf, SystemTime)>,
    components: Vec<Arc<DiscoveredComponent>>,
    scanned_at: Instant,
}

pub struct DiscoveryScanner {
    config: DiscoveryConfig,
    exclusions: GlobSet,
    cache: StdMutex<Option<ScanCache>>,
}

impl DiscoveryScanner {
    pub fn new(config: DiscoveryConfig) -> McpResult<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.exclude_patterns {
            let glob = Glob::new(pattern)
                .map_err(|e| McpError::invalid_request(format!("bad exclude pattern {pattern:?}: {e}")))?;
            builder.add(glob);
        }
        let exclusions = builder
            .build()
            .map_err(|e| McpError::invalid_request(format!("bad exclude patterns: {e}")))?;
        Ok(Self {
            config,
            exclusions,
            cache: StdMutex::new(None),
        })
    }

    /// Kind for a configured root, taken from its trailing path component.
    fn kind_for_root(root: &Path) -> Option<ComponentKind> {
        match root.file_name()?.to_str()? {
            "Tools" => Some(ComponentKind::Tool),
            "Resources" => Some(ComponentKind::Resource),
            "Prompts" => Some(ComponentKind::Prompt),
            _ => None,
        }
    }

    fn excluded(&self, path: &Path) -> bool {
        path.file_name()
            .map(|name| self.exclusions.is_match(name))
            .unwrap_or(false)
    }

    fn candidate_files(&self) -> Vec<(ComponentKind, PathBuf)> {
        let mut files = Vec::new();
        for root in &self.config.paths {
            let Some(kind) = Self::kind_for_root(root) else {
                warn!(root = %root.display(), "discovery root has no recognized kind, skipping");
                continue;
            };
            if !root.is_dir() {
                continue;
            }
            let max_depth = if self.config.recursive { usize::MAX } else { 1 };
            for entry in WalkDir::new(root)
                .max_depth(max_depth)
                .into_iter()
                .filter_map(|entry| entry.ok())
            {
                let path = entry.path();
                if !entry.file_type().is_file() {
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                if self.excluded(path) {
                    debug!(path = %path.display(), "excluded by pattern");
                    continue;
                }
                files.push((kind, path.to_path_buf()));
            }
        }
        files.sort_by(|a, b| a.1.cmp(&b.1));
        files
    }

    fn fingerprint(files: &[(ComponentKind, PathBuf)]) -> Vec<(PathBuf, SystemTime)> {
        files
            .iter()
            .map(|(_, path)| {
                let mtime = std::fs::metadata(path)
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (path.clone(), mtime)
            })
            .collect()
    }

    /// Scan the roots, reusing the cache while (root, mtimes) are unchanged
    /// and the TTL has not lapsed.
    pub fn scan(&self) -> Vec<Arc<DiscoveredComponent>> {
        if !self.config.enabled {
            return Vec::new();
        }
        let files = self.candidate_files();
        let fingerprint = Self::fingerprint(&files);

        {
            let cache = self.cache.lock().expect("cache lock poisoned");
            if let Some(cached) = cache.as_ref() {
                if cached.fingerprint == fingerprint
                    && cached.scanned_at.elapsed() < self.config.cache_ttl()
                {
                    return cached.components.clone();
                }
            }
        }

        let mut components = Vec::new();
        for (kind, path) in files {
            match Self::parse_manifest(kind, &path) {
                Ok(component) => components.push(Arc::new(component)),
                Err(reason) => {
                    warn!(path = %path.display(), %reason, "skipping malformed manifest");
                }
            }
        }

        let mut cache = self.cache.lock().expect("cache lock poisoned");
        *cache = Some(ScanCache {
            fingerprint,
            components: components.clone(),
            scanned_at: Instant::now(),
        });
        components
    }

    pub fn clear_cache(&self) {
        *self.cache.lock().expect("cache lock poisoned") = None;
    }

    fn parse_manifest(kind: ComponentKind, path: &Path) -> Result<DiscoveredComponent, String> {
        let raw = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let manifest: ComponentManifest = serde_json::from_str(&raw).map_err(|e| e.to_string())?;
        let name = manifest
            .name
            .clone()
            .or_else(|| {
                path.file_stem()
                    .and_then(|stem| stem.to_str())
                    .map(str::to_string)
            })
            .ok_or_else(|| "cannot derive component name".to_string())?;
        Ok(DiscoveredComponent {
            kind,
            path: path.to_path_buf(),
            name,
            manifest,
        })
    }

    /// Scan and register everything into `registry`, resolving handler
    /// bindings. Unknown bindings and shape problems are skipped; duplicate
    /// names propagate `AlreadyRegistered`.
    pub async fn populate(
        &self,
        registry: &ComponentRegistry,
        bindings: &HandlerBindings,
    ) -> McpResult<DiscoveryReport> {
        let mut report = DiscoveryReport::default();
        for component in self.scan() {
            match self.register_one(&component, registry, bindings).await {
                Ok(()) => report.registered += 1,
                Err(RegisterOutcome::Skip(reason)) => {
                    warn!(path = %component.path.display(), %reason, "skipping component");
                    report.skipped.push((component.path.clone(), reason));
                }
                Err(RegisterOutcome::Fatal(error)) => return Err(error),
            }
        }
        info!(
            registered = report.registered,
            skipped = report.skipped.len(),
            "discovery populate finished"
        );
        Ok(report)
    }

    async fn register_one(
        &self,
        component: &DiscoveredComponent,
        registry: &ComponentRegistry,
        bindings: &HandlerBindings,
    ) -> Result<(), RegisterOutcome> {
        let manifest = &component.manifest;
        let description = manifest.description.clone().unwrap_or_default();
        match component.kind {
            ComponentKind::Tool => {
                let handler = bindings
                    .tools
                    .get(&manifest.handler)
                    .cloned()
                    .ok_or_else(|| {
                        RegisterOutcome::Skip(format!("unknown tool binding {:?}", manifest.handler))
                    })?;
                let schema = manifest
                    .input_schema
                    .clone()
                    .unwrap_or_else(|| serde_json::json!({"type": "object"}));
                let mut descriptor = ToolDescriptor::new(
                    Tool::new(component.name.clone(), description, schema),
                    handler,
                );
                descriptor.metadata = manifest.metadata.clone();
                registry
                    .register_tool(descriptor)
                    .await
                    .map_err(|e| RegisterOutcome::Fatal(McpError::Other(anyhow::anyhow!(e))))?;
            }
            ComponentKind::Resource => {
                let handler = bindings
                    .resources
                    .get(&manifest.handler)
                    .cloned()
                    .ok_or_else(|| {
                        RegisterOutcome::Skip(format!(
                            "unknown resource binding {:?}",
                            manifest.handler
                        ))
                    })?;
                if let Some(uri_template) = &manifest.uri_template {
                    let mut template =
                        ResourceTemplate::new(uri_template.clone(), component.name.clone());
                    template.description = manifest.description.clone();
                    template.mime_type = manifest.mime_type.clone();
                    let mut descriptor = TemplateDescriptor::new(template, handler);
                    descriptor.metadata = manifest.metadata.clone();
                    registry
                        .register_template(descriptor)
                        .await
                        .map_err(|e| RegisterOutcome::Fatal(McpError::Other(anyhow::anyhow!(e))))?;
                } else {
                    let uri = manifest.uri.clone().ok_or_else(|| {
                        RegisterOutcome::Skip("resource manifest lacks a uri".to_string())
                    })?;
                    let mut resource = Resource::new(uri, component.name.clone());
                    resource.description = manifest.description.clone();
                    resource.mime_type = manifest.mime_type.clone();
                    let mut descriptor = ResourceDescriptor::new(resource, handler);
                    descriptor.metadata = manifest.metadata.clone();
                    if manifest.supports_subscription {
                        let subscribable = bindings
                            .subscribables
                            .get(&manifest.handler)
                            .cloned()
                            .ok_or_else(|| {
                                RegisterOutcome::Skip(format!(
                                    "resource declares subscriptions but binding {:?} is not subscribable",
                                    manifest.handler
                                ))
                            })?;
                        descriptor = descriptor.subscribable(subscribable);
                    }
                    registry
                        .register_resource(descriptor)
                        .await
                        .map_err(|e| RegisterOutcome::Fatal(McpError::Other(anyhow::anyhow!(e))))?;
                }
            }
            ComponentKind::Prompt => {
                let handler = bindings
                    .prompts
                    .get(&manifest.handler)
                    .cloned()
                    .ok_or_else(|| {
                        RegisterOutcome::Skip(format!(
                            "unknown prompt binding {:?}",
                            manifest.handler
                        ))
                    })?;
                let mut prompt = Prompt::new(component.name.clone());
                prompt.description = manifest.description.clone();
                prompt.arguments = manifest.arguments.clone();
                let mut descriptor = PromptDescriptor::new(prompt, handler);
                descriptor.metadata = manifest.metadata.clone();
                registry
                    .register_prompt(descriptor)
                    .await
                    .map_err(|e| RegisterOutcome::Fatal(McpError::Other(anyhow::anyhow!(e))))?;
            }
        }
        Ok(())
    }
}

enum RegisterOutcome {
    Skip(String),
    Fatal(McpError),
}
