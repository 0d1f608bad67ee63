//! Message broker abstraction for BlastGrid clients.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::{mpsc, watch};

use crate::error::BrokerError;
use crate::types::{BrokerMessage, ConsumerId, MessageId, OutboundMessage, StartPosition, SubscribeOptions};

/// Abstraction over an ordered, at-least-once pub/sub broker.
///
/// # Implementations
///
/// - **Simulation**: `SimBroker` - in-process topic logs with fault injection
/// - **Production**: any broker offering ordered topics, exclusive
///   subscriptions and compacted table views
///
/// # Guarantees relied upon
///
/// ```text
/// publisher ── publish(topic) ──► [ topic log: m0, m1, m2 ... ] ──► every subscription
///                                                                  (same order, >= once)
/// ```
///
/// Messages on one topic reach every subscription in publish order. There is
/// no ordering between different topics.
#[async_trait]
pub trait MessageBroker: Send + Sync + 'static {
    /// Appends a message to a topic.
    ///
    /// # Returns
    /// * `Ok(id)` - Position the message was written at
    /// * `Err(BrokerError::Connection)` - Broker unreachable
    async fn publish(&self, topic: &str, message: OutboundMessage) -> Result<MessageId, BrokerError>;

    /// Attaches a consumer to a named subscription.
    ///
    /// For [`crate::SubscriptionMode::Exclusive`] the broker grants the
    /// subscription to at most one live consumer; a second attempt fails with
    /// [`BrokerError::SubscriptionBusy`] until the holder's [`Subscription`]
    /// is dropped or closed.
    async fn subscribe(&self, options: SubscribeOptions) -> Result<Subscription, BrokerError>;

    /// Creates a non-durable reader that tails a topic from `start`.
    async fn create_reader(&self, topic: &str, start: StartPosition) -> Result<Subscription, BrokerError>;

    /// Opens a read-only, key-compacted view of a topic.
    async fn table_view(&self, topic: &str) -> Result<TableView, BrokerError>;
}

/// A live consumer handle.
///
/// Dropping it detaches the consumer, which is how an exclusive subscription
/// becomes available to the next client.
#[derive(Debug)]
pub struct Subscription {
    consumer_id: ConsumerId,
    topic: String,
    name: String,
    rx: mpsc::UnboundedReceiver<BrokerMessage>,
}

impl Subscription {
    /// Wraps a delivery channel created by a broker implementation.
    pub fn new(
        consumer_id: ConsumerId,
        topic: impl Into<String>,
        name: impl Into<String>,
        rx: mpsc::UnboundedReceiver<BrokerMessage>,
    ) -> Self {
        Self {
            consumer_id,
            topic: topic.into(),
            name: name.into(),
            rx,
        }
    }

    pub fn consumer_id(&self) -> ConsumerId {
        self.consumer_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits for the next message. `None` once the broker side is gone.
    pub async fn recv(&mut self) -> Option<BrokerMessage> {
        self.rx.recv().await
    }

    /// Returns the next message if one is already queued.
    pub fn try_recv(&mut self) -> Option<BrokerMessage> {
        self.rx.try_recv().ok()
    }

    /// Detaches the consumer.
    pub fn close(mut self) {
        self.rx.close();
    }
}

/// Read-only, key-compacted view of a topic (last value per key).
#[derive(Debug, Clone)]
pub struct TableView {
    rx: watch::Receiver<BTreeMap<String, String>>,
}

impl TableView {
    pub fn new(rx: watch::Receiver<BTreeMap<String, String>>) -> Self {
        Self { rx }
    }

    /// Returns the current value for a key.
    pub fn get(&self, key: &str) -> Option<String> {
        self.rx.borrow().get(key).cloned()
    }

    /// Returns a copy of the whole table.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.rx.borrow().clone()
    }

    /// Waits until the table changes.
    pub async fn changed(&mut self) -> Result<(), BrokerError> {
        self.rx
            .changed()
            .await
            .map_err(|_| BrokerError::TopicClosed("table view".to_string()))
    }
}
