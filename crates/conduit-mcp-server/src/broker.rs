//! Notification broker: subscription bookkeeping and fanout.
//!
//! A publish snapshots the subscription set (copy-on-read), matches each
//! subscription's type set and payload filter, and enqueues onto that
//! subscription's bounded queue under the configured overflow policy.
//! Per-subscription delivery order equals publish order; no order is
//! guaranteed across subscriptions.
//!
//! The per-subscription queue is explicit (`VecDeque` + `Notify`) rather
//! than a broadcast channel: drop-newest and block overflow semantics are
//! not expressible with broadcast lagging.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_mcp_transport::events::{NotificationEnvelope, SubscriberHub, SubscriberStream};
use conduit_mcp_core::utils::{generate_notification_id, generate_subscription_id};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, trace};

/// What to do when a subscriber's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    #[default]
    DropOldest,
    DropNewest,
    Block,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub queue_size: usize,
    pub overflow_policy: OverflowPolicy,
    /// How long delivery-status records stay queryable.
    pub retention_window: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue_size: 256,
            overflow_policy: OverflowPolicy::DropOldest,
            retention_window: Duration::from_secs(300),
        }
    }
}

/// Aggregate delivery state of one published notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStatus {
    pub queued: u64,
    pub sent: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct DeliveryCounters {
    queued: AtomicU64,
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl DeliveryCounters {
    fn snapshot(&self) -> DeliveryStatus {
        DeliveryStatus {
            queued: self.queued.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

struct QueueItem {
    envelope: NotificationEnvelope,
    counters: Arc<DeliveryCounters>,
}

/// Bounded FIFO with explicit overflow semantics.
struct SubscriptionQueue {
    items: Mutex<VecDeque<QueueItem>>,
    capacity: usize,
    policy: OverflowPolicy,
    /// Wakes consumers on push or close.
    readable: Notify,
    /// Wakes blocked producers on pop.
    writable: Notify,
    closed: AtomicBool,
    dropped_total: AtomicU64,
}

impl SubscriptionQueue {
    fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            policy,
            readable: Notify::new(),
            writable: Notify::new(),
            closed: AtomicBool::new(false),
            dropped_total: AtomicU64::new(0),
        }
    }

    async fn push(&self, item: QueueItem) {
        loop {
            if self.closed.load(Ordering::Acquire) {
                item.counters.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            {
                let mut items = self.items.lock().expect("queue lock poisoned");
                if items.len() < self.capacity {
                    item.counters.queued.fetch_add(1, Ordering::Relaxed);
                    items.push_back(item);
                    drop(items);
                    self.readable.notify_one();
                    return;
                }
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        if let Some(evicted) = items.pop_front() {
                            evicted.counters.dropped.fetch_add(1, Ordering::Relaxed);
                            self.dropped_total.fetch_add(1, Ordering::Relaxed);
                        }
                        item.counters.queued.fetch_add(1, Ordering::Relaxed);
                        items.push_back(item);
                        drop(items);
                        self.readable.notify_one();
                        return;
                    }
                    OverflowPolicy::DropNewest => {
                        item.counters.dropped.fetch_add(1, Ordering::Relaxed);
                        self.dropped_total.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    OverflowPolicy::Block => {}
                }
            }
            // Block policy: wait for a consumer to free a slot.
            self.writable.notified().await;
        }
    }

    async fn pop(&self) -> Option<NotificationEnvelope> {
        loop {
            {
                let mut items = self.items.lock().expect("queue lock poisoned");
                if let Some(item) = items.pop_front() {
                    item.counters.sent.fetch_add(1, Ordering::Relaxed);
                    drop(items);
                    self.writable.notify_one();
                    return Some(item.envelope);
                }
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.readable.notified().await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // notify_waiters wakes current waiters; the extra notify_one leaves
        // a permit for a consumer racing between its closed-check and await.
        self.readable.notify_waiters();
        self.readable.notify_one();
        self.writable.notify_waiters();
        self.writable.notify_one();
    }

    fn dropped(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }
}

/// One standing subscription.
pub struct Subscription {
    pub id: String,
    pub client_id: String,
    /// Empty set matches every event type.
    pub types: HashSet<String>,
    /// Every key/value pair must match the event payload.
    pub filter: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    active: AtomicBool,
    queue: Arc<SubscriptionQueue>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Notifications this subscription has dropped under overflow.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    fn matches(&self, event_type: &str, payload: &Value) -> bool {
        if !self.types.is_empty() && !self.types.contains(event_type) {
            return false;
        }
        self.filter
            .iter()
            .all(|(key, expected)| payload.get(key) == Some(expected))
    }
}

struct DeliveryEntry {
    counters: Arc<DeliveryCounters>,
    published_at: Instant,
}

/// The broker. Owns subscriptions and delivery-status records.
pub struct NotificationBroker {
    config: BrokerConfig,
    subscriptions: RwLock<Vec<Arc<Subscription>>>,
    deliveries: RwLock<HashMap<String, DeliveryEntry>>,
}

impl NotificationBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            subscriptions: RwLock::new(Vec::new()),
            deliveries: RwLock::new(HashMap::new()),
        }
    }

    /// Register a subscription and obtain its envelope stream.
    pub async fn subscribe(
        &self,
        client_id: impl Into<String>,
        types: impl IntoIterator<Item = String>,
        filter: HashMap<String, Value>,
    ) -> (Arc<Subscription>, SubscriberStream) {
        let subscription = Arc::new(Subscription {
            id: generate_subscription_id(),
            client_id: client_id.into(),
            types: types.into_iter().collect(),
            filter,
            created_at: Utc::now(),
            active: AtomicBool::new(true),
            queue: Arc::new(SubscriptionQueue::new(
                self.config.queue_size,
                self.config.overflow_policy,
            )),
        });
        self.subscriptions
            .write()
            .await
            .push(Arc::clone(&subscription));
        debug!(subscription_id = %subscription.id, client_id = %subscription.client_id, "subscription opened");

        let queue = Arc::clone(&subscription.queue);
        let stream = futures::stream::unfold(queue, |queue| async move {
            queue.pop().await.map(|envelope| (envelope, queue))
        })
        .boxed();

        (
            Arc::clone(&subscription),
            SubscriberStream {
                subscription_id: subscription.id.clone(),
                stream,
            },
        )
    }

    /// Tear down a subscription. Returns false for unknown ids.
    pub async fn unsubscribe(&self, subscription_id: &str) -> bool {
        let mut subscriptions = self.subscriptions.write().await;
        let before = subscriptions.len();
        subscriptions.retain(|subscription| {
            if subscription.id == subscription_id {
                subscription.active.store(false, Ordering::Release);
                subscription.queue.close();
                false
            } else {
                true
            }
        });
        before != subscriptions.len()
    }

    /// Publish an event to every matching subscription. Returns the
    /// notification id for delivery-status queries.
    pub async fn publish(&self, event_type: &str, payload: Value) -> String {
        let notification_id = generate_notification_id();
        let counters = Arc::new(DeliveryCounters::default());

        // Copy-on-read snapshot: fanout never holds the table lock.
        let snapshot: Vec<Arc<Subscription>> = self.subscriptions.read().await.clone();
        let mut matched = 0usize;
        for subscription in snapshot {
            if !subscription.matches(event_type, &payload) {
                continue;
            }
            matched += 1;
            subscription
                .queue
                .push(QueueItem {
                    envelope: NotificationEnvelope {
                        id: notification_id.clone(),
                        event_type: event_type.to_string(),
                        payload: payload.clone(),
                    },
                    counters: Arc::clone(&counters),
                })
                .await;
        }
        trace!(%notification_id, event_type, matched, "published");

        let mut deliveries = self.deliveries.write().await;
        let retention = self.config.retention_window;
        deliveries.retain(|_, entry| entry.published_at.elapsed() < retention);
        deliveries.insert(
            notification_id.clone(),
            DeliveryEntry {
                counters,
                published_at: Instant::now(),
            },
        );
        notification_id
    }

    /// Delivery status for a notification id, O(1) within the retention
    /// window.
    pub async fn delivery_status(&self, notification_id: &str) -> Option<DeliveryStatus> {
        let deliveries = self.deliveries.read().await;
        let entry = deliveries.get(notification_id)?;
        if entry.published_at.elapsed() >= self.config.retention_window {
            return None;
        }
        Some(entry.counters.snapshot())
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// Close every subscription (server shutdown).
    pub async fn close_all(&self) {
        let mut subscriptions = self.subscriptions.write().await;
        for subscription in subscriptions.drain(..) {
            subscription.active.store(false, Ordering::Release);
            subscription.queue.close();
        }
    }
}

#[async_trait]
impl SubscriberHub for NotificationBroker {
    async fn open(
        &self,
        client_id: String,
        types: Vec<String>,
        filter: HashMap<String, Value>,
    ) -> SubscriberStream {
        let (_, stream) = self.subscribe(client_id, types, filter).await;
        stream
    }

    async fn close(&self, subscription_id: &str) {
        self.unsubscribe(subscription_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn broker() -> NotificationBroker {
        NotificationBroker::new(BrokerConfig::default())
    }

    #[tokio::test]
    async fn fanout_reaches_exactly_the_matching_subscriptions() {
        let broker = broker();
        let (_s1, mut all) = broker.subscribe("c1", Vec::new(), HashMap::new()).await;
        let (_s2, mut typed) = broker
            .subscribe(
                "c2",
                vec!["notifications/resources/updated".to_string()],
                HashMap::new(),
            )
            .await;
        let (_s3, mut filtered) = broker
            .subscribe(
                "c3",
                Vec::new(),
                HashMap::from([("uri".to_string(), json!("file:///x"))]),
            )
            .await;

        let id = broker
            .publish("notifications/resources/updated", json!({"uri": "file:///x"}))
            .await;

        for stream in [&mut all, &mut typed, &mut filtered] {
            let envelope = stream.stream.next().await.unwrap();
            assert_eq!(envelope.id, id);
            assert_eq!(envelope.event_type, "notifications/resources/updated");
        }

        let status = broker.delivery_status(&id).await.unwrap();
        assert_eq!(status.queued, 3);
        assert_eq!(status.sent, 3);
        assert_eq!(status.dropped, 0);
    }

    #[tokio::test]
    async fn non_matching_subscriptions_receive_nothing() {
        let broker = broker();
        let (_sub, mut stream) = broker
            .subscribe(
                "c1",
                vec!["notifications/progress".to_string()],
                HashMap::new(),
            )
            .await;

        let id = broker
            .publish("notifications/tools/list_changed", json!({}))
            .await;

        let status = broker.delivery_status(&id).await.unwrap();
        assert_eq!(status.queued, 0);

        // The stream stays empty.
        let nothing =
            tokio::time::timeout(Duration::from_millis(20), stream.stream.next()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn filter_mismatch_excludes_subscription() {
        let broker = broker();
        let (_sub, _stream) = broker
            .subscribe(
                "c1",
                Vec::new(),
                HashMap::from([("uri".to_string(), json!("file:///a"))]),
            )
            .await;

        let id = broker
            .publish("notifications/resources/updated", json!({"uri": "file:///b"}))
            .await;
        assert_eq!(broker.delivery_status(&id).await.unwrap().queued, 0);
    }

    #[tokio::test]
    async fn per_subscription_delivery_preserves_publish_order() {
        let broker = broker();
        let (_sub, mut stream) = broker.subscribe("c1", Vec::new(), HashMap::new()).await;

        for i in 0..10 {
            broker
                .publish("notifications/progress", json!({"seq": i}))
                .await;
        }
        for i in 0..10 {
            let envelope = stream.stream.next().await.unwrap();
            assert_eq!(envelope.payload["seq"], json!(i));
        }
    }

    #[tokio::test]
    async fn drop_oldest_overflow_keeps_newest() {
        let broker = NotificationBroker::new(BrokerConfig {
            queue_size: 2,
            overflow_policy: OverflowPolicy::DropOldest,
            ..Default::default()
        });
        let (subscription, mut stream) = broker.subscribe("c1", Vec::new(), HashMap::new()).await;

        for i in 0..4 {
            broker.publish("notifications/progress", json!({"seq": i})).await;
        }

        assert_eq!(subscription.dropped(), 2);
        assert_eq!(stream.stream.next().await.unwrap().payload["seq"], json!(2));
        assert_eq!(stream.stream.next().await.unwrap().payload["seq"], json!(3));
    }

    #[tokio::test]
    async fn drop_newest_overflow_keeps_oldest() {
        let broker = NotificationBroker::new(BrokerConfig {
            queue_size: 2,
            overflow_policy: OverflowPolicy::DropNewest,
            ..Default::default()
        });
        let (subscription, mut stream) = broker.subscribe("c1", Vec::new(), HashMap::new()).await;

        for i in 0..4 {
            broker.publish("notifications/progress", json!({"seq": i})).await;
        }

        assert_eq!(subscription.dropped(), 2);
        assert_eq!(stream.stream.next().await.unwrap().payload["seq"], json!(0));
        assert_eq!(stream.stream.next().await.unwrap().payload["seq"], json!(1));
    }

    #[tokio::test]
    async fn block_overflow_waits_for_a_consumer() {
        let broker = Arc::new(NotificationBroker::new(BrokerConfig {
            queue_size: 1,
            overflow_policy: OverflowPolicy::Block,
            ..Default::default()
        }));
        let (_sub, mut stream) = broker.subscribe("c1", Vec::new(), HashMap::new()).await;

        broker.publish("notifications/progress", json!({"seq": 0})).await;

        // Second publish blocks until the consumer pops.
        let publisher = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move {
                broker.publish("notifications/progress", json!({"seq": 1})).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!publisher.is_finished());

        assert_eq!(stream.stream.next().await.unwrap().payload["seq"], json!(0));
        publisher.await.unwrap();
        assert_eq!(stream.stream.next().await.unwrap().payload["seq"], json!(1));
    }

    #[tokio::test]
    async fn unsubscribe_ends_the_stream() {
        let broker = broker();
        let (subscription, mut stream) = broker.subscribe("c1", Vec::new(), HashMap::new()).await;
        assert!(broker.unsubscribe(&subscription.id).await);
        assert!(!subscription.is_active());
        assert!(stream.stream.next().await.is_none());
        assert_eq!(broker.subscription_count().await, 0);
        assert!(!broker.unsubscribe(&subscription.id).await);
    }
}
