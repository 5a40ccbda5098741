//! Typed server configuration.
//!
//! These structs are the recognized configuration surface; parsing a config
//! file into them is left to the embedding application. Every section
//! carries spec defaults, and `ServerConfig::validate` is the gate a process
//! must pass before serving (failures map to exit code 2).

use crate::broker::{BrokerConfig, OverflowPolicy};
use crate::jobs::JobQueueConfig;
use conduit_mcp_core::protocol::capabilities::{
    PromptsCapability, ResourcesCapability, ServerCapabilities, ToolsCapability,
};
use conduit_mcp_core::protocol::framing::{Framing, DEFAULT_MAX_MESSAGE_SIZE};
use conduit_mcp_transport::http::{AuthConfig, CorsConfig, HttpTransportConfig};
use conduit_mcp_transport::stdio::StdioTransportConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub transports: TransportsConfig,
    pub discovery: DiscoveryConfig,
    pub capabilities: CapabilitiesConfig,
    pub notifications: NotificationsConfig,
    #[serde(rename = "async")]
    pub async_jobs: AsyncJobsConfig,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let stdio = &self.transports.stdio;
        if stdio.buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "transports.stdio.buffer_size must be positive".into(),
            ));
        }
        if stdio.max_message_size == 0 {
            return Err(ConfigError::Invalid(
                "transports.stdio.max_message_size must be positive".into(),
            ));
        }
        let http = &self.transports.http;
        if http.host.is_empty() {
            return Err(ConfigError::Invalid(
                "transports.http.host must not be empty".into(),
            ));
        }
        if http.auth.enabled && http.auth.token.is_none() {
            return Err(ConfigError::Invalid(
                "transports.http.auth.token is required when auth is enabled".into(),
            ));
        }
        if http.batching.enabled && http.batching.size == 0 {
            return Err(ConfigError::Invalid(
                "transports.http.batching.size must be positive".into(),
            ));
        }
        if self.discovery.enabled {
            if self.discovery.paths.is_empty() {
                return Err(ConfigError::Invalid(
                    "discovery.paths must not be empty when discovery is enabled".into(),
                ));
            }
            for pattern in &self.discovery.exclude_patterns {
                globset::Glob::new(pattern).map_err(|e| {
                    ConfigError::Invalid(format!(
                        "discovery.exclude_patterns entry {pattern:?} is invalid: {e}"
                    ))
                })?;
            }
        }
        if self.notifications.queue_size == 0 {
            return Err(ConfigError::Invalid(
                "notifications.queue_size must be positive".into(),
            ));
        }
        if self.async_jobs.workers == 0 {
            return Err(ConfigError::Invalid(
                "async.workers must be positive".into(),
            ));
        }
        if self.async_jobs.queue_size == 0 {
            return Err(ConfigError::Invalid(
                "async.queue_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportSelection {
    #[default]
    Stdio,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TransportsConfig {
    pub default: TransportSelection,
    pub stdio: StdioSettings,
    pub http: HttpSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StdioSettings {
    pub buffer_size: usize,
    pub max_message_size: usize,
    /// Select `Content-Length`-prefixed framing instead of newline-delimited.
    pub use_content_length: bool,
    /// Heartbeat interval in seconds; absent disables keepalive.
    pub keepalive_interval: Option<u64>,
    /// Shutdown flush timeout in seconds.
    pub timeout: u64,
}

impl Default for StdioSettings {
    fn default() -> Self {
        Self {
            buffer_size: 8192,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            use_content_length: false,
            keepalive_interval: None,
            timeout: 5,
        }
    }
}

impl StdioSettings {
    pub fn to_transport_config(&self) -> StdioTransportConfig {
        StdioTransportConfig {
            framing: if self.use_content_length {
                Framing::ContentLength
            } else {
                Framing::NewlineDelimited
            },
            buffer_size: self.buffer_size,
            max_message_size: self.max_message_size,
            keepalive_interval: self.keepalive_interval.map(Duration::from_secs),
            shutdown_timeout: Duration::from_secs(self.timeout),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub host: String,
    pub port: u16,
    pub cors: CorsSettings,
    pub auth: AuthSettings,
    pub batching: BatchingSettings,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            cors: CorsSettings::default(),
            auth: AuthSettings::default(),
            batching: BatchingSettings::default(),
        }
    }
}

impl HttpSettings {
    pub fn to_transport_config(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            host: self.host.clone(),
            port: self.port,
            cors: CorsConfig {
                origins: self.cors.origins.clone(),
                methods: self.cors.methods.clone(),
                headers: self.cors.headers.clone(),
                max_age: Duration::from_secs(self.cors.max_age),
            },
            auth: AuthConfig {
                enabled: self.auth.enabled,
                token: self.auth.token.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsSettings {
    pub origins: Vec<String>,
    pub methods: Vec<String>,
    pub headers: Vec<String>,
    /// Preflight cache lifetime in seconds.
    pub max_age: u64,
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            origins: vec!["*".to_string()],
            methods: vec!["GET".to_string(), "POST".to_string(), "OPTIONS".to_string()],
            headers: vec![
                "content-type".to_string(),
                "authorization".to_string(),
                "mcp-session-id".to_string(),
            ],
            max_age: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub enabled: bool,
    #[serde(rename = "type")]
    pub auth_type: String,
    pub token: Option<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            auth_type: "bearer".to_string(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingSettings {
    pub enabled: bool,
    pub size: usize,
    /// Batch flush window in milliseconds.
    pub timeout: u64,
}

impl Default for BatchingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            size: 16,
            timeout: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    pub paths: Vec<PathBuf>,
    pub recursive: bool,
    pub exclude_patterns: Vec<String>,
    /// Scan cache lifetime in seconds.
    pub cache_ttl: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            paths: vec![
                PathBuf::from("Mcp/Tools"),
                PathBuf::from("Mcp/Resources"),
                PathBuf::from("Mcp/Prompts"),
            ],
            recursive: true,
            exclude_patterns: vec!["*Test.*".to_string()],
            cache_ttl: 300,
        }
    }
}

impl DiscoveryConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CapabilitiesConfig {
    pub tools: CapabilityEntry,
    pub resources: CapabilityEntry,
    pub prompts: CapabilityEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CapabilityEntry {
    pub list_changed: bool,
    pub supports: Vec<String>,
}

impl Default for CapabilityEntry {
    fn default() -> Self {
        Self {
            list_changed: true,
            supports: Vec::new(),
        }
    }
}

impl CapabilitiesConfig {
    pub fn to_server_capabilities(&self) -> ServerCapabilities {
        let subscribe = self.resources.supports.is_empty()
            || self.resources.supports.iter().any(|s| s == "subscribe");
        ServerCapabilities {
            tools: Some(ToolsCapability {
                list_changed: Some(self.tools.list_changed),
            }),
            resources: Some(ResourcesCapability {
                subscribe: Some(subscribe),
                list_changed: Some(self.resources.list_changed),
            }),
            prompts: Some(PromptsCapability {
                list_changed: Some(self.prompts.list_changed),
            }),
            logging: Some(Default::default()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub overflow_policy: OverflowPolicy,
    pub queue_size: usize,
    /// Delivery-status retention in seconds.
    pub retention_window: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            overflow_policy: OverflowPolicy::DropOldest,
            queue_size: 256,
            retention_window: 300,
        }
    }
}

impl NotificationsConfig {
    pub fn to_broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            queue_size: self.queue_size,
            overflow_policy: self.overflow_policy,
            retention_window: Duration::from_secs(self.retention_window),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncJobsConfig {
    pub workers: usize,
    pub queue_size: usize,
    /// Finished-record retention in seconds.
    pub retention_window: u64,
    /// Per-request and per-job deadline in seconds.
    pub default_timeout: u64,
}

impl Default for AsyncJobsConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_size: 64,
            retention_window: 300,
            default_timeout: 30,
        }
    }
}

impl AsyncJobsConfig {
    pub fn to_queue_config(&self) -> JobQueueConfig {
        JobQueueConfig {
            workers: self.workers,
            queue_size: self.queue_size,
            retention_window: Duration::from_secs(self.retention_window),
            default_timeout: Duration::from_secs(self.default_timeout),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout)
    }
}
