//! Notification delivery contract between transports and the broker.
//!
//! The broker lives above the transport layer; transports only need a way
//! to open a filtered event stream for a connected peer (an SSE connection,
//! or the stdio peer's outbound pump). [`SubscriberHub`] is that seam.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use std::collections::HashMap;

/// One published notification as delivered to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEnvelope {
    /// Server-assigned notification id.
    pub id: String,
    /// Notification method, e.g. `notifications/resources/updated`.
    pub event_type: String,
    /// Notification params.
    pub payload: Value,
}

/// An open subscription: its id plus the envelope stream. Dropping the
/// stream does not close the subscription; call [`SubscriberHub::close`].
pub struct SubscriberStream {
    pub subscription_id: String,
    pub stream: BoxStream<'static, NotificationEnvelope>,
}

/// Broker-side contract for opening and closing per-peer event streams.
#[async_trait]
pub trait SubscriberHub: Send + Sync {
    /// Open a subscription for `client_id`. An empty `types` set matches
    /// every event type; `filter` entries must all match the event payload.
    async fn open(
        &self,
        client_id: String,
        types: Vec<String>,
        filter: HashMap<String, Value>,
    ) -> SubscriberStream;

    /// Tear down a subscription (peer disconnect, unsubscribe, shutdown).
    async fn close(&self, subscription_id: &str);
}
