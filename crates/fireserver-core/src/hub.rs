//! Broadcast hub for realtime dashboard updates.
//!
//! # Delivery model
//!
//! The hub keeps a registry of subscribers keyed by [`Topic`]. Each
//! subscriber gets its own bounded tokio channel, so publishing never waits
//! on a slow dashboard:
//!
//! - **Buffer size**: `subscriber_buffer` events per subscriber (default: 32)
//! - **Overflow**: with [`OverflowPolicy::DropOldest`] the subscriber lags
//!   behind a `broadcast` channel and skips the oldest events; with
//!   [`OverflowPolicy::Disconnect`] a full `mpsc` channel closes the
//!   subscriber, and its dashboard catches up on reconnect.
//! - **Ordering**: events arrive in publish order, so a subscriber sees the
//!   events of one device in the order they were published.
//! - **No backlog**: a subscriber only sees events published after it
//!   registered, preceded by whatever initial events it was created with.
//!   Initial events are held by the subscription itself and do not take
//!   room in the buffer.
//!
//! Dropping a [`Subscription`] unregisters it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use fireserver_types::FlameUpdate;

/// Default per-subscriber buffer length.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 32;

/// What happens when a subscriber's buffer is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    #[default]
    DropOldest,
    Disconnect,
}

/// Hub settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub subscriber_buffer: usize,
    pub overflow: OverflowPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

/// Which events a subscriber receives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Events of one device.
    Device(String),
    /// Events of every device.
    All,
}

impl Topic {
    fn matches(&self, device_id: &str) -> bool {
        match self {
            Topic::Device(id) => id == device_id,
            Topic::All => true,
        }
    }
}

/// Delivery counters since start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Currently registered subscribers.
    pub subscribers: usize,
    /// Events handed to `publish`.
    pub published: u64,
    /// Events queued for a subscriber.
    pub delivered: u64,
    /// Events a lagging drop-oldest subscriber skipped.
    pub dropped: u64,
    /// Subscribers closed on overflow.
    pub disconnected: u64,
}

/// Sending half of one subscriber's channel.
enum Sender {
    Lossy(broadcast::Sender<FlameUpdate>),
    Bounded(mpsc::Sender<FlameUpdate>),
}

/// Receiving half of one subscriber's channel.
enum Receiver {
    Lossy(broadcast::Receiver<FlameUpdate>),
    Bounded(mpsc::Receiver<FlameUpdate>),
}

fn channel(policy: OverflowPolicy, buffer: usize) -> (Sender, Receiver) {
    // Both channel constructors panic on zero capacity.
    let buffer = buffer.max(1);
    match policy {
        OverflowPolicy::DropOldest => {
            let (tx, rx) = broadcast::channel(buffer);
            (Sender::Lossy(tx), Receiver::Lossy(rx))
        }
        OverflowPolicy::Disconnect => {
            let (tx, rx) = mpsc::channel(buffer);
            (Sender::Bounded(tx), Receiver::Bounded(rx))
        }
    }
}

enum Delivery {
    Queued,
    Full,
    Gone,
}

impl Sender {
    fn deliver(&self, event: FlameUpdate) -> Delivery {
        match self {
            // A broadcast send only fails once the receiver is gone; a full
            // buffer overwrites the oldest slot and the receiver sees `Lagged`.
            Sender::Lossy(tx) => match tx.send(event) {
                Ok(_) => Delivery::Queued,
                Err(_) => Delivery::Gone,
            },
            Sender::Bounded(tx) => match tx.try_send(event) {
                Ok(()) => Delivery::Queued,
                Err(TrySendError::Full(_)) => Delivery::Full,
                Err(TrySendError::Closed(_)) => Delivery::Gone,
            },
        }
    }
}

struct Slot {
    id: u64,
    tx: Sender,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    disconnected: AtomicU64,
}

struct Shared {
    registry: Mutex<HashMap<Topic, Vec<Slot>>>,
    config: HubConfig,
    next_id: AtomicU64,
    counters: Counters,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, HashMap<Topic, Vec<Slot>>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, topic: &Topic, id: u64) {
        let mut registry = self.registry();
        if let Some(slots) = registry.get_mut(topic) {
            slots.retain(|slot| slot.id != id);
            if slots.is_empty() {
                registry.remove(topic);
            }
        }
    }
}

/// Publish/subscribe broker with one bounded channel per subscriber.
///
/// Dropping the last handle drops every sender, which ends every
/// subscription once its buffered events are read.
#[derive(Clone)]
pub struct BroadcastHub {
    shared: Arc<Shared>,
}

impl BroadcastHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(HashMap::new()),
                config,
                next_id: AtomicU64::new(1),
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.shared.config
    }

    /// Register a subscriber that first yields `initial`.
    ///
    /// Events published after this call returns follow the initial events;
    /// nothing published earlier is replayed. The initial events never count
    /// against the subscriber's buffer.
    pub fn subscribe(&self, topic: Topic, initial: Vec<FlameUpdate>) -> Subscription {
        let config = &self.shared.config;
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = channel(config.overflow, config.subscriber_buffer);

        self.shared
            .registry()
            .entry(topic.clone())
            .or_default()
            .push(Slot { id, tx });

        debug!(subscriber = id, ?topic, initial = initial.len(), "Subscriber registered");

        Subscription {
            id,
            topic,
            initial: initial.into_iter(),
            rx,
            closed: false,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Queue an event for every subscriber of its device and every
    /// all-devices subscriber. Returns how many subscribers got it.
    ///
    /// Never blocks on a subscriber; having no subscribers is not an error.
    pub fn publish(&self, event: FlameUpdate) -> usize {
        let shared = &self.shared;
        let counters = &shared.counters;
        counters.published.fetch_add(1, Ordering::Relaxed);

        let mut delivered = 0;
        let mut registry = shared.registry();

        for (topic, slots) in registry.iter_mut() {
            if !topic.matches(&event.device_id) {
                continue;
            }
            slots.retain(|slot| match slot.tx.deliver(event.clone()) {
                Delivery::Queued => {
                    delivered += 1;
                    true
                }
                Delivery::Full => {
                    counters.disconnected.fetch_add(1, Ordering::Relaxed);
                    warn!(subscriber = slot.id, ?topic, "Subscriber buffer full, disconnecting");
                    false
                }
                Delivery::Gone => false,
            });
        }
        registry.retain(|_, slots| !slots.is_empty());

        counters
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.shared.registry().values().map(Vec::len).sum()
    }

    pub fn stats(&self) -> HubStats {
        let counters = &self.shared.counters;
        HubStats {
            subscribers: self.subscriber_count(),
            published: counters.published.load(Ordering::Relaxed),
            delivered: counters.delivered.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            disconnected: counters.disconnected.load(Ordering::Relaxed),
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

/// A registered subscriber session.
pub struct Subscription {
    id: u64,
    topic: Topic,
    initial: std::vec::IntoIter<FlameUpdate>,
    rx: Receiver,
    closed: bool,
    shared: Weak<Shared>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    fn record_lag(shared: &Weak<Shared>, id: u64, skipped: u64) {
        if let Some(shared) = shared.upgrade() {
            shared.counters.dropped.fetch_add(skipped, Ordering::Relaxed);
        }
        debug!(subscriber = id, skipped, "Subscriber lagging, skipped oldest events");
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the hub closed this subscriber (overflow with
    /// [`OverflowPolicy::Disconnect`], or the hub was dropped) and the
    /// buffered events are drained.
    pub async fn recv(&mut self) -> Option<FlameUpdate> {
        if let Some(event) = self.initial.next() {
            return Some(event);
        }
        let event = match &mut self.rx {
            Receiver::Bounded(rx) => rx.recv().await,
            Receiver::Lossy(rx) => loop {
                match rx.recv().await {
                    Ok(event) => break Some(event),
                    Err(RecvError::Lagged(skipped)) => {
                        Self::record_lag(&self.shared, self.id, skipped);
                    }
                    Err(RecvError::Closed) => break None,
                }
            },
        };
        if event.is_none() {
            self.closed = true;
        }
        event
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<FlameUpdate> {
        if let Some(event) = self.initial.next() {
            return Some(event);
        }
        match &mut self.rx {
            Receiver::Bounded(rx) => match rx.try_recv() {
                Ok(event) => Some(event),
                Err(mpsc::error::TryRecvError::Empty) => None,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.closed = true;
                    None
                }
            },
            Receiver::Lossy(rx) => loop {
                match rx.try_recv() {
                    Ok(event) => break Some(event),
                    Err(TryRecvError::Lagged(skipped)) => {
                        Self::record_lag(&self.shared, self.id, skipped);
                    }
                    Err(TryRecvError::Empty) => break None,
                    Err(TryRecvError::Closed) => {
                        self.closed = true;
                        break None;
                    }
                }
            },
        }
    }

    /// Whether a receive has observed the end of the stream.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.remove(&self.topic, self.id);
            debug!(subscriber = self.id, "Subscriber removed");
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use fireserver_types::{CommandState, FireState, LiveState, SensorReading};

    fn event(device: &str, flags: [u8; 3]) -> FlameUpdate {
        let mut live = LiveState::default_safe(device);
        live.reading = SensorReading::from_flags(device, flags);
        FlameUpdate::new(&live, CommandState::default())
    }

    fn hub(buffer: usize, overflow: OverflowPolicy) -> BroadcastHub {
        BroadcastHub::new(HubConfig {
            subscriber_buffer: buffer,
            overflow,
        })
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let hub = BroadcastHub::default();
        assert_eq!(hub.publish(event("a", [1, 1, 1])), 0);
        assert_eq!(hub.stats().published, 1);
        assert_eq!(hub.stats().delivered, 0);
    }

    #[tokio::test]
    async fn test_initial_events_come_first() {
        let hub = BroadcastHub::default();
        hub.publish(event("a", [0, 0, 0]));

        let mut sub = hub.subscribe(Topic::Device("a".into()), vec![event("a", [0, 1, 1])]);
        hub.publish(event("a", [1, 1, 1]));

        assert_eq!(sub.recv().await.unwrap().sensor_1, 0);
        assert_eq!(sub.recv().await.unwrap().sensor_1, 1);
        // The event published before subscribing is not replayed.
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_device_topic_filters() {
        let hub = BroadcastHub::default();
        let mut a = hub.subscribe(Topic::Device("a".into()), Vec::new());
        let mut all = hub.subscribe(Topic::All, Vec::new());

        assert_eq!(hub.publish(event("b", [1, 1, 1])), 1);
        assert_eq!(hub.publish(event("a", [1, 1, 1])), 2);

        assert_eq!(a.recv().await.unwrap().device_id, "a");
        assert!(a.try_recv().is_none());
        assert_eq!(all.recv().await.unwrap().device_id, "b");
        assert_eq!(all.recv().await.unwrap().device_id, "a");
    }

    #[tokio::test]
    async fn test_order_preserved() {
        let hub = BroadcastHub::default();
        let mut sub = hub.subscribe(Topic::Device("a".into()), Vec::new());
        for i in 0..10u16 {
            let mut e = event("a", [1, 1, 1]);
            e.raw_1 = Some(i);
            hub.publish(e);
        }
        for i in 0..10u16 {
            assert_eq!(sub.recv().await.unwrap().raw_1, Some(i));
        }
    }

    #[tokio::test]
    async fn test_drop_oldest_keeps_newest() {
        let hub = hub(2, OverflowPolicy::DropOldest);
        let mut slow = hub.subscribe(Topic::All, Vec::new());
        for i in 0..5u16 {
            let mut e = event("a", [1, 1, 1]);
            e.raw_1 = Some(i);
            hub.publish(e);
        }
        assert_eq!(slow.recv().await.unwrap().raw_1, Some(3));
        assert_eq!(slow.recv().await.unwrap().raw_1, Some(4));
        assert_eq!(hub.stats().dropped, 3);
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_on_overflow_isolates_slow_subscriber() {
        let hub = hub(2, OverflowPolicy::Disconnect);
        let mut slow = hub.subscribe(Topic::All, Vec::new());
        let mut fast = hub.subscribe(Topic::All, Vec::new());

        for _ in 0..2 {
            hub.publish(event("a", [1, 1, 1]));
            fast.recv().await.unwrap();
        }
        // Slow channel is full now; the next publish disconnects it.
        assert_eq!(hub.publish(event("a", [0, 0, 0])), 1);
        assert_eq!(fast.recv().await.unwrap().sensor_1, 0);

        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_some());
        assert!(!slow.is_closed());
        assert!(slow.recv().await.is_none());
        assert!(slow.is_closed());
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(hub.stats().disconnected, 1);
    }

    #[tokio::test]
    async fn test_initial_events_do_not_fill_bounded_buffer() {
        let hub = hub(2, OverflowPolicy::Disconnect);
        let initial = ["a", "b", "c", "d", "e"]
            .into_iter()
            .map(|device| event(device, [1, 1, 1]))
            .collect();
        let mut sub = hub.subscribe(Topic::All, initial);

        assert_eq!(hub.publish(event("f", [0, 1, 1])), 1);
        assert_eq!(hub.publish(event("g", [0, 1, 1])), 1);
        assert_eq!(hub.stats().disconnected, 0);

        let mut seen = Vec::new();
        while let Some(update) = sub.try_recv() {
            seen.push(update.device_id);
        }
        assert_eq!(seen, ["a", "b", "c", "d", "e", "f", "g"]);
        assert!(!sub.is_closed());
    }

    #[tokio::test]
    async fn test_initial_events_survive_drop_oldest() {
        let hub = hub(2, OverflowPolicy::DropOldest);
        let initial = ["a", "b", "c", "d"]
            .into_iter()
            .map(|device| event(device, [1, 1, 1]))
            .collect();
        let mut sub = hub.subscribe(Topic::All, initial);
        hub.publish(event("e", [0, 1, 1]));

        for expected in ["a", "b", "c", "d", "e"] {
            assert_eq!(sub.recv().await.unwrap().device_id, expected);
        }
        assert_eq!(hub.stats().dropped, 0);
    }

    #[tokio::test]
    async fn test_drop_unregisters() {
        let hub = BroadcastHub::default();
        let sub = hub.subscribe(Topic::Device("a".into()), Vec::new());
        let _other = hub.subscribe(Topic::All, Vec::new());
        assert_eq!(hub.subscriber_count(), 2);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_recv_wakes_on_publish() {
        let hub = BroadcastHub::default();
        let mut sub = hub.subscribe(Topic::All, Vec::new());

        let publisher = hub.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(event("late", [0, 0, 0]));
        });

        let received = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.device_id, "late");
        assert_eq!(received.status, FireState::Safe);
    }

    #[tokio::test]
    async fn test_hub_drop_closes_subscribers() {
        let hub = BroadcastHub::default();
        let mut sub = hub.subscribe(Topic::All, Vec::new());
        drop(hub);
        assert!(sub.recv().await.is_none());
    }
}
