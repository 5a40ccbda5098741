//! Cooperative cancellation for in-flight requests and jobs.
//!
//! Every inbound request is registered with a [`CancellationManager`] and
//! handed a [`CancellationToken`]. Handlers poll the token at I/O
//! boundaries; `notifications/cancelled` and job cancellation trip it.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// A cheaply clonable cancellation signal.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    receiver: watch::Receiver<Option<String>>,
}

impl CancellationToken {
    /// A token that can never fire; for contexts without a cancelable parent.
    pub fn never() -> Self {
        // The sender is dropped immediately; `cancelled` treats a closed,
        // never-fired channel as pending forever.
        let (_, receiver) = watch::channel(None);
        Self { receiver }
    }

    pub fn is_cancelled(&self) -> bool {
        self.receiver.borrow().is_some()
    }

    pub fn reason(&self) -> Option<String> {
        self.receiver.borrow().clone()
    }

    /// Resolve when the token fires. Pending forever on a token that is
    /// never cancelled.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if receiver.borrow().is_some() {
                return;
            }
            if receiver.changed().await.is_err() {
                // Sender dropped without firing: treat as never-cancelled.
                std::future::pending::<()>().await;
            }
        }
    }
}

#[derive(Debug)]
struct CancellationHandle {
    sender: watch::Sender<Option<String>>,
}

/// Registry of cancellation signals keyed by request/job id.
#[derive(Debug, Clone, Default)]
pub struct CancellationManager {
    entries: Arc<RwLock<HashMap<String, CancellationHandle>>>,
}

impl CancellationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an id and obtain its token. Re-registering an id replaces
    /// the previous signal.
    pub async fn register(&self, id: impl Into<String>) -> CancellationToken {
        let (sender, receiver) = watch::channel(None);
        self.entries
            .write()
            .await
            .insert(id.into(), CancellationHandle { sender });
        CancellationToken { receiver }
    }

    /// Fire the signal for `id`. Returns false when the id is unknown
    /// (already completed or never registered).
    pub async fn cancel(&self, id: &str, reason: impl Into<String>) -> bool {
        let entries = self.entries.read().await;
        match entries.get(id) {
            Some(handle) => {
                tracing::debug!(id, "cancellation signalled");
                handle.sender.send(Some(reason.into())).is_ok()
            }
            None => false,
        }
    }

    /// Drop the signal once the request finishes.
    pub async fn complete(&self, id: &str) {
        self.entries.write().await.remove(id);
    }

    pub async fn pending(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_fires_on_cancel() {
        let manager = CancellationManager::new();
        let token = manager.register("req-1").await;
        assert!(!token.is_cancelled());

        assert!(manager.cancel("req-1", "client went away").await);
        assert!(token.is_cancelled());
        assert_eq!(token.reason().as_deref(), Some("client went away"));
        token.cancelled().await;
    }

    #[tokio::test]
    async fn cancel_unknown_id_is_a_no_op() {
        let manager = CancellationManager::new();
        assert!(!manager.cancel("ghost", "reason").await);
    }

    #[tokio::test]
    async fn completed_entries_are_dropped() {
        let manager = CancellationManager::new();
        let _token = manager.register("req-2").await;
        assert_eq!(manager.pending().await, 1);
        manager.complete("req-2").await;
        assert_eq!(manager.pending().await, 0);
        assert!(!manager.cancel("req-2", "late").await);
    }

    #[tokio::test]
    async fn never_token_does_not_fire() {
        let token = CancellationToken::never();
        assert!(!token.is_cancelled());
        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            token.cancelled(),
        )
        .await;
        assert!(outcome.is_err());
    }
}
