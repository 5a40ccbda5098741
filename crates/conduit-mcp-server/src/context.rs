//! Per-request context handed to every handler invocation.

use crate::broker::NotificationBroker;
use conduit_mcp_core::protocol::constants::notifications;
use conduit_mcp_core::protocol::jsonrpc::RequestId;
use conduit_mcp_core::types::notifications::ProgressNotification;
use conduit_mcp_core::utils::CancellationToken;
use serde_json::Value;
use std::sync::Arc;

/// Context carried into tool, resource, prompt, and method handlers: the
/// originating session, the request id, a cooperative cancellation token,
/// and a progress reporter wired to the notification broker.
#[derive(Clone)]
pub struct RequestContext {
    pub session_id: String,
    pub request_id: Option<RequestId>,
    pub cancellation: CancellationToken,
    progress: Option<ProgressReporter>,
}

impl RequestContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            request_id: None,
            cancellation: CancellationToken::never(),
            progress: None,
        }
    }

    pub fn with_request_id(mut self, id: RequestId) -> Self {
        self.request_id = Some(id);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_progress(mut self, reporter: ProgressReporter) -> Self {
        self.progress = Some(reporter);
        self
    }

    /// Report progress in `0.0..=1.0`; a no-op when no reporter is wired.
    pub async fn report_progress(&self, progress: f64, message: Option<String>) {
        if let Some(reporter) = &self.progress {
            reporter.report(progress, message).await;
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("session_id", &self.session_id)
            .field("request_id", &self.request_id)
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}

type ProgressHook = Arc<dyn Fn(f64) + Send + Sync>;

/// Publishes `notifications/progress` referencing a request or job token.
#[derive(Clone)]
pub struct ProgressReporter {
    broker: Arc<NotificationBroker>,
    token: Value,
    hook: Option<ProgressHook>,
}

impl ProgressReporter {
    pub fn new(broker: Arc<NotificationBroker>, token: Value) -> Self {
        Self {
            broker,
            token,
            hook: None,
        }
    }

    /// Attach an observer invoked with each reported fraction; the job queue
    /// uses this to keep its records current.
    pub fn with_hook(mut self, hook: ProgressHook) -> Self {
        self.hook = Some(hook);
        self
    }

    pub async fn report(&self, progress: f64, message: Option<String>) {
        let progress = progress.clamp(0.0, 1.0);
        if let Some(hook) = &self.hook {
            hook(progress);
        }
        let mut notification = ProgressNotification::new(self.token.clone(), progress);
        notification.message = message;
        let payload = match serde_json::to_value(&notification) {
            Ok(payload) => payload,
            Err(_) => return,
        };
        self.broker
            .publish(notifications::PROGRESS, payload)
            .await;
    }
}
