//! The in-process data bus.
//!
//! Plugins publish their readings here; consumers subscribe with bounded
//! queues. Each topic keeps a replay ring of the last publishes. The bus
//! optionally records every event through the store hook and forwards it to
//! an attached bridge; neither collaborator can fail local delivery.

use crate::store::EventStore;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::error;
use tracing::warn;

pub const DEFAULT_REPLAY_LIMIT: usize = 50;
const SUBSCRIBER_QUEUE_CAPACITY: usize = 64;

/// An event as kept in the replay ring.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusEvent {
    pub timestamp: f64,
    pub data: Value,
}

/// Per-topic counters, as reported by [`DataBus::stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicStats {
    pub published: u64,
    pub subscribers: usize,
    pub replay_depth: usize,
}

/// The outbound side of the bridge, as seen from the bus.
#[async_trait]
pub trait BridgeSink: Send + Sync {
    async fn forward(&self, topic: &str, data: &Value) -> anyhow::Result<()>;
}

/// A registered subscriber queue.
pub struct BusSubscription {
    receiver: mpsc::Receiver<Value>,
}

impl BusSubscription {
    /// The next payload published on the subscribed topic, `None` once the
    /// bus is gone.
    pub async fn recv(&mut self) -> Option<Value> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Value> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Default)]
struct TopicState {
    subscribers: Vec<mpsc::Sender<Value>>,
    replay: VecDeque<BusEvent>,
    published: u64,
}

pub struct DataBus {
    topics: Mutex<HashMap<String, TopicState>>,
    store: Option<Arc<dyn EventStore>>,
    bridge: Mutex<Option<Arc<dyn BridgeSink>>>,
    replay_limit: usize,
}

impl DataBus {
    pub fn new(store: Option<Arc<dyn EventStore>>) -> Self {
        DataBus::with_replay_limit(store, DEFAULT_REPLAY_LIMIT)
    }

    pub fn with_replay_limit(store: Option<Arc<dyn EventStore>>, replay_limit: usize) -> Self {
        DataBus {
            topics: Mutex::new(HashMap::new()),
            store,
            bridge: Mutex::new(None),
            replay_limit,
        }
    }

    /// Publish an event to all subscribers of the topic.
    ///
    /// The event is appended to the topic's replay ring, recorded through
    /// the store hook and forwarded to the attached bridge, if any. Hook
    /// failures are logged and swallowed. A full subscriber queue suspends
    /// this call until the subscriber catches up.
    pub async fn publish(&self, topic: &str, data: Value) {
        let timestamp = unix_now();
        let subscribers = {
            let mut topics = self.topics.lock().unwrap();
            let state = topics.entry(topic.to_string()).or_default();
            if state.replay.len() >= self.replay_limit {
                state.replay.pop_front();
            }
            state.replay.push_back(BusEvent {
                timestamp,
                data: data.clone(),
            });
            state.published += 1;
            state.subscribers.retain(|queue| !queue.is_closed());
            state.subscribers.clone()
        };

        if let Some(store) = &self.store {
            if let Err(err) = store.insert_event(topic, &data) {
                error!("[Bus] store insert error for {topic}: {err}");
            }
        }

        for queue in &subscribers {
            // A send error means the subscriber is gone; it will be pruned
            // on the next publish.
            let _ = queue.send(data.clone()).await;
        }
        debug!("[Bus] Published {topic} -> {} subs", subscribers.len());

        let bridge = self.bridge.lock().unwrap().clone();
        if let Some(bridge) = bridge {
            if let Err(err) = bridge.forward(topic, &data).await {
                warn!("[Bus] bridge publish failed for {topic}: {err}");
            }
        }
    }

    /// Register a new subscriber queue for this topic.
    pub fn subscribe(&self, topic: &str) -> BusSubscription {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let mut topics = self.topics.lock().unwrap();
        let state = topics.entry(topic.to_string()).or_default();
        state.subscribers.push(sender);
        debug!(
            "[Bus] Subscribed -> {topic} (total {})",
            state.subscribers.len()
        );
        BusSubscription { receiver }
    }

    /// The last `limit` events of a topic, in publish order.
    pub fn replay(&self, topic: &str, limit: usize) -> Vec<BusEvent> {
        let topics = self.topics.lock().unwrap();
        match topics.get(topic) {
            Some(state) => {
                let skip = state.replay.len().saturating_sub(limit);
                state.replay.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Per-topic counters and replay depths.
    pub fn stats(&self) -> HashMap<String, TopicStats> {
        let mut topics = self.topics.lock().unwrap();
        topics
            .iter_mut()
            .map(|(topic, state)| {
                state.subscribers.retain(|queue| !queue.is_closed());
                (
                    topic.clone(),
                    TopicStats {
                        published: state.published,
                        subscribers: state.subscribers.len(),
                        replay_depth: state.replay.len(),
                    },
                )
            })
            .collect()
    }

    /// Attach the outbound bridge. Idempotent; replaces any previous one.
    pub fn attach_bridge(&self, bridge: Arc<dyn BridgeSink>) {
        *self.bridge.lock().unwrap() = Some(bridge);
        debug!("[Bus] External bridge attached");
    }

    pub fn detach_bridge(&self) {
        *self.bridge.lock().unwrap() = None;
        debug!("[Bus] External bridge detached");
    }
}

fn unix_now() -> f64 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1e9
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn subscriber_receives_publishes_in_order() {
        let bus = DataBus::new(None);
        let mut subscription = bus.subscribe("network/metrics");

        for latency in [50, 100, 150] {
            bus.publish("network/metrics", json!({ "network_latency": latency }))
                .await;
        }

        for latency in [50, 100, 150] {
            assert_eq!(
                subscription.recv().await,
                Some(json!({ "network_latency": latency }))
            );
        }
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_publishes() {
        let bus = DataBus::new(None);
        bus.publish("t", json!({"n": 1})).await;

        let mut subscription = bus.subscribe("t");
        bus.publish("t", json!({"n": 2})).await;

        assert_eq!(subscription.recv().await, Some(json!({"n": 2})));
        assert_eq!(subscription.try_recv(), None);
    }

    #[tokio::test]
    async fn replay_keeps_the_last_n_publishes() {
        let bus = DataBus::new(None);
        for n in 1..=60 {
            bus.publish("t", json!({ "n": n })).await;
        }

        let events = bus.replay("t", 100);
        assert_eq!(events.len(), DEFAULT_REPLAY_LIMIT);
        assert_eq!(events.first().unwrap().data, json!({"n": 11}));
        assert_eq!(events.last().unwrap().data, json!({"n": 60}));

        let tail = bus.replay("t", 5);
        assert_eq!(tail.len(), 5);
        assert_eq!(tail.first().unwrap().data, json!({"n": 56}));
    }

    #[tokio::test]
    async fn replay_of_unknown_topic_is_empty() {
        let bus = DataBus::new(None);
        assert!(bus.replay("nothing", 10).is_empty());
    }

    #[tokio::test]
    async fn stats_reports_counters() {
        let bus = DataBus::new(None);
        let _subscription = bus.subscribe("t");
        bus.publish("t", json!({"n": 1})).await;
        bus.publish("t", json!({"n": 2})).await;

        let stats = bus.stats();
        let t = stats.get("t").unwrap();
        assert_eq!(t.published, 2);
        assert_eq!(t.subscribers, 1);
        assert_eq!(t.replay_depth, 2);
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let bus = DataBus::new(None);
        let subscription = bus.subscribe("t");
        drop(subscription);

        bus.publish("t", json!({"n": 1})).await;
        let stats = bus.stats();
        assert_eq!(stats.get("t").unwrap().subscribers, 0);
    }

    struct FailingBridge;

    #[async_trait]
    impl BridgeSink for FailingBridge {
        async fn forward(&self, _topic: &str, _data: &Value) -> anyhow::Result<()> {
            anyhow::bail!("broker unreachable")
        }
    }

    #[tokio::test]
    async fn bridge_failure_does_not_fail_local_delivery() {
        let bus = DataBus::new(None);
        bus.attach_bridge(Arc::new(FailingBridge));
        let mut subscription = bus.subscribe("t");

        bus.publish("t", json!({"n": 1})).await;
        assert_eq!(subscription.recv().await, Some(json!({"n": 1})));
    }

    struct CountingBridge(AtomicUsize);

    #[async_trait]
    impl BridgeSink for CountingBridge {
        async fn forward(&self, _topic: &str, _data: &Value) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn detached_bridge_no_longer_sees_publishes() {
        let bus = DataBus::new(None);
        let bridge = Arc::new(CountingBridge(AtomicUsize::new(0)));
        bus.attach_bridge(bridge.clone());

        bus.publish("t", json!({"n": 1})).await;
        bus.detach_bridge();
        bus.publish("t", json!({"n": 2})).await;

        assert_eq!(bridge.0.load(Ordering::SeqCst), 1);
    }
}
