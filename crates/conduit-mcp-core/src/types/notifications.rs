//! Notification payload types and the MCP log level scale.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Log level for `logging/setLevel` and `notifications/message`.
///
/// Variant order defines severity; `Ord` makes the per-session minimum-level
/// filter a plain comparison.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// Parameters of `logging/setLevel`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetLevelRequest {
    pub level: LogLevel,
}

/// Payload of `notifications/message`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingMessageNotification {
    pub level: LogLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,
    pub data: Value,
}

impl LoggingMessageNotification {
    pub fn new(level: LogLevel, data: Value) -> Self {
        Self {
            level,
            logger: None,
            data,
        }
    }

    pub fn with_logger(mut self, logger: impl Into<String>) -> Self {
        self.logger = Some(logger.into());
        self
    }
}

/// Payload of `notifications/progress`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressNotification {
    /// Token correlating to the originating request or job.
    #[serde(rename = "progressToken")]
    pub progress_token: Value,
    /// Fraction complete, 0.0 through 1.0.
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressNotification {
    pub fn new(progress_token: Value, progress: f64) -> Self {
        Self {
            progress_token,
            progress,
            total: None,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Payload of `notifications/cancelled`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancelledNotification {
    #[serde(rename = "requestId")]
    pub request_id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CancelledNotification {
    pub fn new(request_id: Value) -> Self {
        Self {
            request_id,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Payload of `notifications/resources/updated`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceUpdatedNotification {
    pub uri: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn log_levels_order_by_severity() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Warning < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Critical);
    }

    #[test]
    fn log_level_wire_names_are_lowercase() {
        assert_eq!(serde_json::to_value(LogLevel::Warning).unwrap(), json!("warning"));
        let parsed: LogLevel = serde_json::from_value(json!("critical")).unwrap();
        assert_eq!(parsed, LogLevel::Critical);
    }

    #[test]
    fn progress_notification_wire_shape() {
        let value = serde_json::to_value(
            ProgressNotification::new(json!("job-1"), 0.5).with_message("halfway"),
        )
        .unwrap();
        assert_eq!(value["progressToken"], json!("job-1"));
        assert_eq!(value["progress"], json!(0.5));
    }
}
