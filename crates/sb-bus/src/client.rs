//! Bus client: broker connection, subscription registry, dispatch
//!
//! The client keeps its own registry of topic-filter subscriptions so that
//! every (re)connect can replay them against the broker, together with a
//! catch-all `#` subscription used purely for topic discovery. Incoming
//! messages are captured in the message ring buffer and fanned out to every
//! matching handler, each invocation spawned as an independent task so a
//! slow handler never blocks the receive loop.
//!
//! There is deliberately no ordering guarantee between dispatched
//! invocations; see DESIGN.md for the concurrency contract.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use sb_core::MessageBuffer;
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::topic::topic_matches;

/// Maximum reconnect backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// A message delivered to a subscription handler.
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// Topic the message arrived on.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

impl BusMessage {
    /// The payload as text, with invalid UTF-8 replaced.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Future returned by a message handler.
pub type HandlerFuture = BoxFuture<'static, ()>;

/// A registered message handler.
pub type MessageHandler = Arc<dyn Fn(BusMessage) -> HandlerFuture + Send + Sync>;

/// Identifies one registered handler, for targeted removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: u64,
    handler: MessageHandler,
}

/// The shared bus client.
///
/// Cheap to share via `Arc`; all methods take `&self`.
pub struct BusClient {
    /// Handlers grouped by topic filter.
    subscriptions: DashMap<String, Vec<Subscription>>,
    /// Reverse index: subscription id to its filter.
    pattern_by_id: DashMap<u64, String>,
    /// Every topic ever observed on the bus.
    discovered: RwLock<BTreeSet<String>>,
    /// Ring buffer of captured traffic.
    messages: Arc<MessageBuffer>,
    /// Live broker handle, absent in loopback mode.
    mqtt: RwLock<Option<AsyncClient>>,
    next_id: AtomicU64,
    loopback: bool,
    handle: tokio::runtime::Handle,
}

impl BusClient {
    /// Create a broker-less client where `publish` loops messages straight
    /// back through dispatch, emulating a broker echo.
    ///
    /// Must be called from within a tokio runtime.
    pub fn in_memory(messages: Arc<MessageBuffer>) -> Arc<Self> {
        Arc::new(Self {
            subscriptions: DashMap::new(),
            pattern_by_id: DashMap::new(),
            discovered: RwLock::new(BTreeSet::new()),
            messages,
            mqtt: RwLock::new(None),
            next_id: AtomicU64::new(1),
            loopback: true,
            handle: tokio::runtime::Handle::current(),
        })
    }

    /// Connect to the broker and spawn the receive loop.
    ///
    /// The connection retries forever with capped exponential backoff; on
    /// every successful (re)connect all registered filters plus the `#`
    /// discovery subscription are replayed.
    pub fn connect(config: &BrokerConfig, messages: Arc<MessageBuffer>) -> Arc<Self> {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(u64::from(config.keep_alive_secs)));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }
        let (client, event_loop) = AsyncClient::new(options, 64);

        let bus = Arc::new(Self {
            subscriptions: DashMap::new(),
            pattern_by_id: DashMap::new(),
            discovered: RwLock::new(BTreeSet::new()),
            messages,
            mqtt: RwLock::new(Some(client)),
            next_id: AtomicU64::new(1),
            loopback: false,
            handle: tokio::runtime::Handle::current(),
        });

        let runner = Arc::clone(&bus);
        bus.handle.spawn(async move {
            runner.run_event_loop(event_loop).await;
        });

        info!(host = %config.host, port = config.port, "bus client connecting");
        bus
    }

    async fn run_event_loop(self: Arc<Self>, mut event_loop: EventLoop) {
        let mut backoff = Duration::from_secs(1);
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("broker connected");
                    backoff = Duration::from_secs(1);
                    self.resubscribe_all().await;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.handle_incoming(&publish.topic, &publish.payload);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(%err, retry_in = ?backoff, "broker connection lost");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    /// Replay the discovery subscription and every registered filter.
    async fn resubscribe_all(&self) {
        let client = match self.mqtt.read() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        };
        let Some(client) = client else { return };

        if let Err(err) = client.subscribe("#", QoS::AtMostOnce).await {
            warn!(%err, "discovery subscription failed");
        }
        let patterns: Vec<String> = self.subscriptions.iter().map(|e| e.key().clone()).collect();
        for pattern in patterns {
            if let Err(err) = client.subscribe(&pattern, QoS::AtLeastOnce).await {
                warn!(pattern, %err, "resubscribe failed");
            }
        }
    }

    /// Register a handler for a topic filter.
    ///
    /// Idempotent per filter at the broker level: the MQTT subscription is
    /// established once, no matter how many handlers share the filter.
    pub fn subscribe(&self, pattern: &str, handler: MessageHandler) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let first = !self.subscriptions.contains_key(pattern);
        self.subscriptions
            .entry(pattern.to_string())
            .or_default()
            .push(Subscription { id, handler });
        self.pattern_by_id.insert(id, pattern.to_string());

        if first {
            self.broker_subscribe(pattern);
        }
        debug!(pattern, id, "handler subscribed");
        SubscriptionId(id)
    }

    /// Remove a single handler. The broker-level subscription is dropped
    /// when the filter's last handler goes away.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Some((_, pattern)) = self.pattern_by_id.remove(&id.0) else {
            return false;
        };
        let mut now_empty = false;
        if let Some(mut subs) = self.subscriptions.get_mut(&pattern) {
            subs.retain(|s| s.id != id.0);
            now_empty = subs.is_empty();
        }
        if now_empty {
            self.subscriptions.remove(&pattern);
            self.broker_unsubscribe(&pattern);
        }
        debug!(pattern, id = id.0, "handler unsubscribed");
        true
    }

    /// Remove every handler registered for a filter.
    pub fn unsubscribe_pattern(&self, pattern: &str) -> bool {
        let Some((_, subs)) = self.subscriptions.remove(pattern) else {
            return false;
        };
        for sub in &subs {
            self.pattern_by_id.remove(&sub.id);
        }
        self.broker_unsubscribe(pattern);
        debug!(pattern, removed = subs.len(), "pattern unsubscribed");
        true
    }

    /// Publish a message. Returns `false` on failure; never fatal.
    pub fn publish(&self, topic: &str, payload: &[u8]) -> bool {
        if self.loopback {
            self.handle_incoming(topic, payload);
            return true;
        }
        let client = match self.mqtt.read() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        };
        let Some(client) = client else {
            warn!(topic, "publish dropped: not connected");
            return false;
        };
        match client.try_publish(topic, QoS::AtLeastOnce, false, payload.to_vec()) {
            Ok(()) => true,
            Err(err) => {
                warn!(topic, %err, "publish failed");
                false
            }
        }
    }

    /// Every topic observed on the bus so far, sorted.
    pub fn discovered_topics(&self) -> Vec<String> {
        self.discovered
            .read()
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The captured-traffic ring buffer.
    pub fn messages(&self) -> Arc<MessageBuffer> {
        Arc::clone(&self.messages)
    }

    /// Number of distinct filters with at least one handler.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Record, discover, and dispatch one inbound message.
    fn handle_incoming(&self, topic: &str, payload: &[u8]) {
        self.messages.record(topic, payload);
        if let Ok(mut discovered) = self.discovered.write() {
            discovered.insert(topic.to_string());
        }

        // Collect matching handlers first so no map guard is held while
        // spawning.
        let mut matched = Vec::new();
        for entry in self.subscriptions.iter() {
            if topic_matches(entry.key(), topic) {
                for sub in entry.value() {
                    matched.push(Arc::clone(&sub.handler));
                }
            }
        }
        for handler in matched {
            let message = BusMessage {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            };
            self.handle.spawn(handler(message));
        }
    }

    fn broker_subscribe(&self, pattern: &str) {
        let client = match self.mqtt.read() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        };
        if let Some(client) = client {
            if let Err(err) = client.try_subscribe(pattern, QoS::AtLeastOnce) {
                warn!(pattern, %err, "broker subscribe failed");
            }
        }
    }

    fn broker_unsubscribe(&self, pattern: &str) {
        let client = match self.mqtt.read() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        };
        if let Some(client) = client {
            if let Err(err) = client.try_unsubscribe(pattern) {
                warn!(pattern, %err, "broker unsubscribe failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::time::{timeout, Duration};

    fn channel_handler(tx: mpsc::UnboundedSender<BusMessage>) -> MessageHandler {
        Arc::new(move |msg| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(msg);
            })
        })
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<BusMessage>) -> BusMessage {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_loopback_publish_reaches_subscriber() {
        let bus = BusClient::in_memory(Arc::new(MessageBuffer::new(16)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe("home/+/light", channel_handler(tx));

        assert!(bus.publish("home/kitchen/light", b"on"));

        let msg = recv(&mut rx).await;
        assert_eq!(msg.topic, "home/kitchen/light");
        assert_eq!(msg.payload_text(), "on");
    }

    #[tokio::test]
    async fn test_non_matching_topic_not_delivered() {
        let bus = BusClient::in_memory(Arc::new(MessageBuffer::new(16)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe("home/kitchen/light", channel_handler(tx));

        bus.publish("home/hall/light", b"on");
        bus.publish("home/kitchen/light", b"off");

        // Only the matching message arrives.
        let msg = recv(&mut rx).await;
        assert_eq!(msg.topic, "home/kitchen/light");
    }

    #[tokio::test]
    async fn test_multiple_handlers_share_a_pattern() {
        let bus = BusClient::in_memory(Arc::new(MessageBuffer::new(16)));
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        bus.subscribe("sensors/#", channel_handler(tx1));
        bus.subscribe("sensors/#", channel_handler(tx2));

        bus.publish("sensors/temp", b"21");

        assert_eq!(recv(&mut rx1).await.payload_text(), "21");
        assert_eq!(recv(&mut rx2).await.payload_text(), "21");
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_one_handler() {
        let bus = BusClient::in_memory(Arc::new(MessageBuffer::new(16)));
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let id1 = bus.subscribe("sensors/#", channel_handler(tx1));
        bus.subscribe("sensors/#", channel_handler(tx2));

        assert!(bus.unsubscribe(id1));
        assert!(!bus.unsubscribe(id1));

        bus.publish("sensors/temp", b"21");
        assert_eq!(recv(&mut rx2).await.payload_text(), "21");
        // Handler 1 was removed; its channel stays silent.
        assert!(
            timeout(Duration::from_millis(100), rx1.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_pattern_removes_all() {
        let bus = BusClient::in_memory(Arc::new(MessageBuffer::new(16)));
        let (tx, _rx) = mpsc::unbounded_channel();
        bus.subscribe("a/b", channel_handler(tx.clone()));
        bus.subscribe("a/b", channel_handler(tx));

        assert_eq!(bus.subscription_count(), 1);
        assert!(bus.unsubscribe_pattern("a/b"));
        assert_eq!(bus.subscription_count(), 0);
        assert!(!bus.unsubscribe_pattern("a/b"));
    }

    #[tokio::test]
    async fn test_discovery_and_capture() {
        let bus = BusClient::in_memory(Arc::new(MessageBuffer::new(16)));
        bus.publish("home/temp", b"21");
        bus.publish("home/hum", b"40");
        bus.publish("home/temp", b"22");

        assert_eq!(bus.discovered_topics(), vec!["home/hum", "home/temp"]);
        assert_eq!(bus.messages().count(), 3);
        // Newest first.
        assert_eq!(bus.messages().get_all()[0].topic, "home/temp");
    }
}
