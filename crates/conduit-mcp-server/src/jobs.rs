//! Async job queue: out-of-band execution of long-running invocations.
//!
//! `enqueue` assigns an id and returns immediately; a pool of workers drains
//! the queue, each executing one job at a time through the normal dispatch
//! path. Records move `Queued → Processing → (Completed | Failed)` and stay
//! readable for a retention window after finishing.

use crate::broker::NotificationBroker;
use crate::context::{ProgressReporter, RequestContext};
use chrono::{DateTime, Utc};
use conduit_mcp_core::error::{McpError, McpResult};
use conduit_mcp_core::protocol::jsonrpc::JsonRpcError;
use conduit_mcp_core::utils::{generate_job_id, CancellationManager};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    pub workers: usize,
    pub queue_size: usize,
    /// How long finished records stay readable.
    pub retention_window: Duration,
    /// Hard deadline for a single job execution.
    pub default_timeout: Duration,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_size: 64,
            retention_window: Duration::from_secs(300),
            default_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One job record, owned by the queue and mutated only by the worker
/// executing it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    pub method: String,
    pub params: Option<Value>,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Executes a job through the normal dispatch path. Implemented by the
/// protocol engine.
#[async_trait::async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(
        &self,
        method: &str,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> Result<Value, JsonRpcError>;
}

struct JobEntry {
    record: RwLock<JobRecord>,
}

pub struct JobQueue {
    config: JobQueueConfig,
    /// Weak self-reference handed to worker tasks.
    self_ref: Weak<JobQueue>,
    executor: Weak<dyn JobExecutor>,
    broker: Arc<NotificationBroker>,
    jobs: Arc<RwLock<HashMap<String, Arc<JobEntry>>>>,
    /// Session that submitted each job, for the worker's request context.
    sessions: RwLock<HashMap<String, String>>,
    sender: mpsc::Sender<String>,
    receiver: Mutex<Option<mpsc::Receiver<String>>>,
    cancellations: CancellationManager,
    workers_started: AtomicBool,
}

impl JobQueue {
    pub fn new(
        config: JobQueueConfig,
        executor: Weak<dyn JobExecutor>,
        broker: Arc<NotificationBroker>,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(config.queue_size.max(1));
        Arc::new_cyclic(|self_ref| Self {
            config,
            self_ref: self_ref.clone(),
            executor,
            broker,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            sessions: RwLock::new(HashMap::new()),
            sender,
            receiver: Mutex::new(Some(receiver)),
            cancellations: CancellationManager::new(),
            workers_started: AtomicBool::new(false),
        })
    }

    /// Queue a job; returns its id immediately. Fails when the queue is
    /// full.
    pub async fn enqueue(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        session_id: impl Into<String>,
    ) -> McpResult<String> {
        self.ensure_workers().await;
        self.prune_expired().await;

        let method = method.into();
        let session_id = session_id.into();
        let id = generate_job_id();
        let now = Utc::now();
        let entry = Arc::new(JobEntry {
            record: RwLock::new(JobRecord {
                id: id.clone(),
                method,
                params,
                status: JobStatus::Queued,
                progress: None,
                result: None,
                error: None,
                started_at: now,
                updated_at: now,
            }),
        });
        self.jobs.write().await.insert(id.clone(), entry);
        self.sessions.write().await.insert(id.clone(), session_id);

        if self.sender.try_send(id.clone()).is_err() {
            self.jobs.write().await.remove(&id);
            self.sessions.write().await.remove(&id);
            return Err(McpError::internal_error("job queue is full"));
        }
        debug!(job_id = %id, "job enqueued");
        Ok(id)
    }

    /// Current record for a job id, if within retention.
    pub async fn status(&self, id: &str) -> Option<JobRecord> {
        let jobs = self.jobs.read().await;
        let entry = jobs.get(id)?;
        let record = entry.record.read().await.clone();
        Some(record)
    }

    /// Cancel a job. Queued jobs fail immediately with a cancelled error;
    /// in-flight jobs receive a cooperative cancellation signal.
    pub async fn cancel(&self, id: &str, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let jobs = self.jobs.read().await;
        let Some(entry) = jobs.get(id) else {
            return false;
        };
        let mut record = entry.record.write().await;
        match record.status {
            JobStatus::Queued => {
                record.status = JobStatus::Failed;
                record.error = Some(format!("cancelled: {reason}"));
                record.updated_at = Utc::now();
                true
            }
            JobStatus::Processing => {
                drop(record);
                self.cancellations.cancel(id, reason).await
            }
            _ => false,
        }
    }

    pub async fn pending(&self) -> usize {
        let jobs = self.jobs.read().await;
        let mut count = 0;
        for entry in jobs.values() {
            if !entry.record.read().await.status.is_terminal() {
                count += 1;
            }
        }
        count
    }

    async fn prune_expired(&self) {
        let retention = chrono::Duration::from_std(self.config.retention_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let cutoff = Utc::now() - retention;
        let mut jobs = self.jobs.write().await;
        let mut expired = Vec::new();
        for (id, entry) in jobs.iter() {
            let record = entry.record.read().await;
            if record.status.is_terminal() && record.updated_at < cutoff {
                expired.push(id.clone());
            }
        }
        for id in expired {
            jobs.remove(&id);
            self.sessions.write().await.remove(&id);
        }
    }

    async fn ensure_workers(&self) {
        if self
            .workers_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let receiver = self
            .receiver
            .lock()
            .await
            .take()
            .expect("worker receiver taken twice");
        let receiver = Arc::new(Mutex::new(receiver));
        for worker in 0..self.config.workers.max(1) {
            let queue = self.self_ref.clone();
            let receiver = Arc::clone(&receiver);
            tokio::spawn(async move {
                loop {
                    let job_id = {
                        let mut receiver = receiver.lock().await;
                        receiver.recv().await
                    };
                    let Some(job_id) = job_id else { break };
                    let Some(queue) = queue.upgrade() else { break };
                    queue.run_job(&job_id).await;
                }
                debug!(worker, "job worker exited");
            });
        }
    }

    async fn run_job(&self, job_id: &str) {
        let Some(entry) = self.jobs.read().await.get(job_id).cloned() else {
            return;
        };

        // Queued → Processing; a job cancelled while queued is skipped.
        {
            let mut record = entry.record.write().await;
            if record.status != JobStatus::Queued {
                return;
            }
            record.status = JobStatus::Processing;
            record.updated_at = Utc::now();
        }

        let Some(executor) = self.executor.upgrade() else {
            let mut record = entry.record.write().await;
            record.status = JobStatus::Failed;
            record.error = Some("server shut down".to_string());
            record.updated_at = Utc::now();
            return;
        };

        let (method, params) = {
            let record = entry.record.read().await;
            (record.method.clone(), record.params.clone())
        };
        let session_id = self
            .sessions
            .read()
            .await
            .get(job_id)
            .cloned()
            .unwrap_or_else(|| "jobs".to_string());

        let token = self.cancellations.register(job_id).await;
        let progress_entry = Arc::clone(&entry);
        let reporter = ProgressReporter::new(
            Arc::clone(&self.broker),
            Value::String(job_id.to_string()),
        )
        .with_hook(Arc::new(move |fraction| {
            // Keep the record's progress current without blocking the
            // reporter; last write wins.
            let entry = Arc::clone(&progress_entry);
            tokio::spawn(async move {
                let mut record = entry.record.write().await;
                record.progress = Some(fraction);
                record.updated_at = Utc::now();
            });
        }));

        let ctx = RequestContext::new(session_id)
            .with_cancellation(token.clone())
            .with_progress(reporter);

        let outcome = tokio::select! {
            outcome = tokio::time::timeout(
                self.config.default_timeout,
                executor.execute(&method, params, ctx),
            ) => match outcome {
                Ok(result) => result,
                Err(_) => Err(JsonRpcError::internal_error("job deadline exceeded")),
            },
            _ = token.cancelled() => {
                Err(JsonRpcError::new(-32000, format!(
                    "cancelled: {}",
                    token.reason().unwrap_or_else(|| "no reason given".to_string())
                )))
            }
        };
        self.cancellations.complete(job_id).await;

        let mut record = entry.record.write().await;
        record.updated_at = Utc::now();
        match outcome {
            Ok(result) => {
                record.status = JobStatus::Completed;
                record.progress = Some(1.0);
                record.result = Some(result);
            }
            Err(error) => {
                warn!(job_id, code = error.code, "job failed: {}", error.message);
                record.status = JobStatus::Failed;
                record.error = Some(error.message);
            }
        }
    }
}
