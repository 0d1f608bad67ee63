//! In-process broker implementing MessageBroker.
//!
//! Keeps one append-only log per topic and fans each published message out to
//! every subscription in publish order. Used for single-process rooms, tests,
//! and as the backing store of the simulation broker.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};

use crate::broker::{MessageBroker, Subscription, TableView};
use crate::error::BrokerError;
use crate::types::{
    BrokerMessage, ConsumerId, MessageId, OutboundMessage, StartPosition, SubscribeOptions,
    SubscriptionMode,
};

type Outbox = mpsc::UnboundedSender<BrokerMessage>;

/// A named subscription and its attached consumers.
#[derive(Debug)]
struct SubscriptionState {
    mode: SubscriptionMode,
    consumers: Vec<(ConsumerId, Outbox)>,
    /// Round-robin cursor for shared mode
    next: usize,
}

impl SubscriptionState {
    fn prune(&mut self) {
        self.consumers.retain(|(_, tx)| !tx.is_closed());
    }

    fn deliver(&mut self, msg: &BrokerMessage) {
        self.prune();
        if self.consumers.is_empty() {
            return;
        }
        let idx = match self.mode {
            SubscriptionMode::Exclusive => 0,
            SubscriptionMode::Shared => {
                let idx = self.next % self.consumers.len();
                self.next = self.next.wrapping_add(1);
                idx
            }
        };
        // A consumer that vanished between prune and send just misses it
        let _ = self.consumers[idx].1.send(msg.clone());
    }
}

/// All state belonging to one topic.
#[derive(Debug, Default)]
struct TopicState {
    log: Vec<BrokerMessage>,
    subscriptions: HashMap<String, SubscriptionState>,
    readers: Vec<Outbox>,
    table: Option<watch::Sender<BTreeMap<String, String>>>,
}

impl TopicState {
    fn backlog(&self, start: StartPosition) -> &[BrokerMessage] {
        match start {
            StartPosition::Earliest => &self.log,
            StartPosition::Latest => &[],
            StartPosition::LatestInclusive => {
                let from = self.log.len().saturating_sub(1);
                &self.log[from..]
            }
        }
    }

    fn compacted(&self) -> BTreeMap<String, String> {
        let mut table = BTreeMap::new();
        for msg in &self.log {
            if let Some(key) = &msg.key {
                table.insert(key.clone(), String::from_utf8_lossy(&msg.payload).into_owned());
            }
        }
        table
    }
}

/// In-process broker with ordered topics, exclusive/shared subscriptions,
/// readers and table views.
///
/// Cloning yields another handle to the same broker.
#[derive(Debug, Clone, Default)]
pub struct LocalBroker {
    topics: Arc<Mutex<HashMap<String, TopicState>>>,
}

impl LocalBroker {
    /// Creates an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an Arc-wrapped broker for sharing across clients.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TopicState>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the number of messages stored on a topic.
    pub fn topic_len(&self, topic: &str) -> usize {
        self.lock().get(topic).map(|t| t.log.len()).unwrap_or(0)
    }

    /// Returns the number of live consumers on a subscription.
    pub fn consumer_count(&self, topic: &str, subscription: &str) -> usize {
        let mut topics = self.lock();
        topics
            .get_mut(topic)
            .and_then(|t| t.subscriptions.get_mut(subscription))
            .map(|s| {
                s.prune();
                s.consumers.len()
            })
            .unwrap_or(0)
    }

    fn append(&self, topic: &str, message: OutboundMessage) -> MessageId {
        let mut topics = self.lock();
        let state = topics.entry(topic.to_string()).or_default();

        let id = MessageId(state.log.len() as u64);
        let msg = BrokerMessage {
            id,
            topic: topic.to_string(),
            key: message.key,
            payload: message.payload,
        };

        for sub in state.subscriptions.values_mut() {
            sub.deliver(&msg);
        }
        state.readers.retain(|tx| tx.send(msg.clone()).is_ok());
        if let (Some(table), Some(key)) = (&state.table, &msg.key) {
            let value = String::from_utf8_lossy(&msg.payload).into_owned();
            table.send_modify(|t| {
                t.insert(key.clone(), value);
            });
        }

        state.log.push(msg);
        id
    }

    fn attach(&self, options: SubscribeOptions) -> Result<Subscription, BrokerError> {
        let mut topics = self.lock();
        let state = topics.entry(options.topic.clone()).or_default();

        let (tx, rx) = mpsc::unbounded_channel();
        for msg in state.backlog(options.start) {
            let _ = tx.send(msg.clone());
        }

        let sub = state
            .subscriptions
            .entry(options.subscription.clone())
            .or_insert_with(|| SubscriptionState {
                mode: options.mode,
                consumers: Vec::new(),
                next: 0,
            });
        sub.prune();

        if sub.mode != options.mode {
            if sub.consumers.is_empty() {
                sub.mode = options.mode;
            } else {
                return Err(BrokerError::ModeMismatch {
                    subscription: options.subscription,
                    existing: sub.mode.to_string(),
                });
            }
        }
        if sub.mode == SubscriptionMode::Exclusive && !sub.consumers.is_empty() {
            return Err(BrokerError::busy(options.topic, options.subscription));
        }

        let consumer_id = ConsumerId::new();
        sub.consumers.push((consumer_id, tx));
        Ok(Subscription::new(consumer_id, options.topic, options.subscription, rx))
    }
}

#[async_trait]
impl MessageBroker for LocalBroker {
    async fn publish(&self, topic: &str, message: OutboundMessage) -> Result<MessageId, BrokerError> {
        Ok(self.append(topic, message))
    }

    async fn subscribe(&self, options: SubscribeOptions) -> Result<Subscription, BrokerError> {
        self.attach(options)
    }

    async fn create_reader(&self, topic: &str, start: StartPosition) -> Result<Subscription, BrokerError> {
        let mut topics = self.lock();
        let state = topics.entry(topic.to_string()).or_default();

        let (tx, rx) = mpsc::unbounded_channel();
        for msg in state.backlog(start) {
            let _ = tx.send(msg.clone());
        }
        state.readers.push(tx);

        Ok(Subscription::new(ConsumerId::new(), topic, "reader", rx))
    }

    async fn table_view(&self, topic: &str) -> Result<TableView, BrokerError> {
        let mut topics = self.lock();
        let state = topics.entry(topic.to_string()).or_default();

        let rx = match &state.table {
            Some(table) => table.subscribe(),
            None => {
                let (table, rx) = watch::channel(state.compacted());
                state.table = Some(table);
                rx
            }
        };
        Ok(TableView::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(s: &str) -> OutboundMessage {
        OutboundMessage::new(s.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_every_subscription_sees_same_order() {
        let broker = LocalBroker::new();
        let mut a = broker.subscribe(SubscribeOptions::exclusive("t", "a")).await.unwrap();
        let mut b = broker.subscribe(SubscribeOptions::exclusive("t", "b")).await.unwrap();

        for s in ["one", "two", "three"] {
            broker.publish("t", payload(s)).await.unwrap();
        }

        for sub in [&mut a, &mut b] {
            let ids: Vec<u64> = (0..3).filter_map(|_| sub.try_recv()).map(|m| m.id.0).collect();
            assert_eq!(ids, vec![0, 1, 2]);
        }
    }

    #[tokio::test]
    async fn test_exclusive_subscription_single_holder() {
        let broker = LocalBroker::new();
        let first = broker.subscribe(SubscribeOptions::exclusive("map", "room-map-sub")).await;
        let second = broker.subscribe(SubscribeOptions::exclusive("map", "room-map-sub")).await;

        assert!(first.is_ok());
        assert!(matches!(second, Err(ref e) if e.is_busy()));
        assert_eq!(broker.consumer_count("map", "room-map-sub"), 1);

        // Holder disconnects, next attempt wins
        drop(first);
        let third = broker.subscribe(SubscribeOptions::exclusive("map", "room-map-sub")).await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn test_shared_subscription_round_robin() {
        let broker = LocalBroker::new();
        let mut a = broker.subscribe(SubscribeOptions::shared("t", "workers")).await.unwrap();
        let mut b = broker.subscribe(SubscribeOptions::shared("t", "workers")).await.unwrap();

        for s in ["1", "2", "3", "4"] {
            broker.publish("t", payload(s)).await.unwrap();
        }

        let mut got_a = 0;
        while a.try_recv().is_some() {
            got_a += 1;
        }
        let mut got_b = 0;
        while b.try_recv().is_some() {
            got_b += 1;
        }
        assert_eq!(got_a, 2);
        assert_eq!(got_b, 2);
    }

    #[tokio::test]
    async fn test_mode_mismatch_rejected() {
        let broker = LocalBroker::new();
        let _held = broker.subscribe(SubscribeOptions::shared("t", "s")).await.unwrap();
        let result = broker.subscribe(SubscribeOptions::exclusive("t", "s")).await;
        assert!(matches!(result, Err(BrokerError::ModeMismatch { .. })));
    }

    #[tokio::test]
    async fn test_reader_start_positions() {
        let broker = LocalBroker::new();
        broker.publish("t", payload("a")).await.unwrap();
        broker.publish("t", payload("b")).await.unwrap();

        let mut earliest = broker.create_reader("t", StartPosition::Earliest).await.unwrap();
        let mut latest = broker.create_reader("t", StartPosition::Latest).await.unwrap();
        let mut inclusive = broker.create_reader("t", StartPosition::LatestInclusive).await.unwrap();

        assert_eq!(earliest.try_recv().map(|m| m.payload), Some(b"a".to_vec()));
        assert!(latest.try_recv().is_none());
        assert_eq!(inclusive.try_recv().map(|m| m.payload), Some(b"b".to_vec()));
        assert!(inclusive.try_recv().is_none());

        broker.publish("t", payload("c")).await.unwrap();
        assert_eq!(latest.try_recv().map(|m| m.payload), Some(b"c".to_vec()));
    }

    #[tokio::test]
    async fn test_table_view_compacts_by_key() {
        let broker = LocalBroker::new();
        broker
            .publish("scores", OutboundMessage::keyed("alice", b"1".to_vec()))
            .await
            .unwrap();

        let view = broker.table_view("scores").await.unwrap();
        assert_eq!(view.get("alice").as_deref(), Some("1"));

        broker
            .publish("scores", OutboundMessage::keyed("alice", b"2".to_vec()))
            .await
            .unwrap();
        broker
            .publish("scores", OutboundMessage::keyed("bob", b"1".to_vec()))
            .await
            .unwrap();

        assert_eq!(view.get("alice").as_deref(), Some("2"));
        assert_eq!(view.snapshot().len(), 2);
        assert_eq!(broker.topic_len("scores"), 3);
    }
}
