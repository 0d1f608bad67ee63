//! Simulated broker with fault injection.
//!
//! [`SimBroker`] forwards to a [`LocalBroker`] and lets a
//! [`SimBrokerController`] inject two faults:
//! - an outage, during which every call fails with a connection error
//! - redelivery, where a published message is appended a second time

use async_trait::async_trait;
use blastgrid_env::{
    BrokerError, LocalBroker, MessageBroker, MessageId, OutboundMessage, StartPosition,
    SubscribeOptions, Subscription, TableView,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

#[derive(Debug)]
struct Faults {
    outage: AtomicBool,
    redelivery_rate: Mutex<f64>,
    redelivered: AtomicU64,
    rng: Mutex<ChaCha8Rng>,
}

/// In-process broker used by the simulation.
#[derive(Debug, Clone)]
pub struct SimBroker {
    inner: LocalBroker,
    faults: Arc<Faults>,
}

impl SimBroker {
    /// Creates a broker whose redelivery draws come from `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            inner: LocalBroker::new(),
            faults: Arc::new(Faults {
                outage: AtomicBool::new(false),
                redelivery_rate: Mutex::new(0.0),
                redelivered: AtomicU64::new(0),
                rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            }),
        }
    }

    /// Creates an Arc-wrapped broker for sharing across clients.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Returns a controller for this broker's faults.
    pub fn controller(&self) -> SimBrokerController {
        SimBrokerController {
            faults: Arc::clone(&self.faults),
        }
    }

    /// Returns the number of messages stored on a topic.
    pub fn topic_len(&self, topic: &str) -> usize {
        self.inner.topic_len(topic)
    }

    /// Returns the number of live consumers on a subscription.
    pub fn consumer_count(&self, topic: &str, subscription: &str) -> usize {
        self.inner.consumer_count(topic, subscription)
    }

    fn check_reachable(&self) -> Result<(), BrokerError> {
        if self.faults.outage.load(Ordering::Acquire) {
            return Err(BrokerError::connection("simulated outage"));
        }
        Ok(())
    }

    fn should_redeliver(&self) -> bool {
        let rate = *self
            .faults
            .redelivery_rate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if rate <= 0.0 {
            return false;
        }
        let mut rng = self.faults.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.gen_bool(rate)
    }
}

#[async_trait]
impl MessageBroker for SimBroker {
    async fn publish(&self, topic: &str, message: OutboundMessage) -> Result<MessageId, BrokerError> {
        self.check_reachable()?;
        let duplicate = self.should_redeliver().then(|| message.clone());
        let id = self.inner.publish(topic, message).await?;
        if let Some(duplicate) = duplicate {
            let again = self.inner.publish(topic, duplicate).await?;
            self.faults.redelivered.fetch_add(1, Ordering::Relaxed);
            debug!(topic = %topic, original = %id, duplicate = %again, "Injected redelivery");
        }
        Ok(id)
    }

    async fn subscribe(&self, options: SubscribeOptions) -> Result<Subscription, BrokerError> {
        self.check_reachable()?;
        self.inner.subscribe(options).await
    }

    async fn create_reader(&self, topic: &str, start: StartPosition) -> Result<Subscription, BrokerError> {
        self.check_reachable()?;
        self.inner.create_reader(topic, start).await
    }

    async fn table_view(&self, topic: &str) -> Result<TableView, BrokerError> {
        self.check_reachable()?;
        self.inner.table_view(topic).await
    }
}

/// Fault injection handle for a [`SimBroker`].
#[derive(Debug, Clone)]
pub struct SimBrokerController {
    faults: Arc<Faults>,
}

impl SimBrokerController {
    /// Starts or ends a broker outage.
    pub fn set_outage(&self, down: bool) {
        self.faults.outage.store(down, Ordering::Release);
    }

    pub fn is_down(&self) -> bool {
        self.faults.outage.load(Ordering::Acquire)
    }

    /// Sets the probability that a publish is appended twice.
    pub fn set_redelivery(&self, rate: f64) {
        let mut current = self
            .faults
            .redelivery_rate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *current = rate.clamp(0.0, 1.0);
    }

    /// Number of duplicate messages injected so far.
    pub fn redelivered(&self) -> u64 {
        self.faults.redelivered.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(s: &str) -> OutboundMessage {
        OutboundMessage::new(s.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_outage_fails_every_call() {
        let broker = SimBroker::new(1);
        let controller = broker.controller();

        controller.set_outage(true);
        assert!(controller.is_down());
        assert!(matches!(
            broker.publish("t", payload("a")).await,
            Err(BrokerError::Connection(_))
        ));
        assert!(broker
            .subscribe(SubscribeOptions::shared("t", "s"))
            .await
            .is_err());
        assert!(broker.table_view("t").await.is_err());
        assert_eq!(broker.topic_len("t"), 0);

        controller.set_outage(false);
        assert!(broker.publish("t", payload("a")).await.is_ok());
        assert_eq!(broker.topic_len("t"), 1);
    }

    #[tokio::test]
    async fn test_full_redelivery_duplicates_in_order() {
        let broker = SimBroker::new(1);
        let controller = broker.controller();
        let mut sub = broker
            .subscribe(SubscribeOptions::exclusive("t", "p-event-sub"))
            .await
            .unwrap();

        controller.set_redelivery(1.0);
        broker.publish("t", payload("a")).await.unwrap();
        broker.publish("t", payload("b")).await.unwrap();

        let got: Vec<Vec<u8>> = (0..4).filter_map(|_| sub.try_recv()).map(|m| m.payload).collect();
        assert_eq!(got, vec![b"a".to_vec(), b"a".to_vec(), b"b".to_vec(), b"b".to_vec()]);
        assert_eq!(controller.redelivered(), 2);
    }

    #[tokio::test]
    async fn test_redelivery_rate_is_seeded() {
        async fn duplicates(seed: u64) -> usize {
            let broker = SimBroker::new(seed);
            broker.controller().set_redelivery(0.5);
            for i in 0..50 {
                broker.publish("t", payload(&i.to_string())).await.unwrap();
            }
            broker.topic_len("t")
        }

        let first = duplicates(9).await;
        assert_eq!(first, duplicates(9).await);
        assert!(first > 50 && first < 100);
    }

    #[tokio::test]
    async fn test_exclusive_semantics_pass_through() {
        let broker = SimBroker::new(1);
        let _held = broker
            .subscribe(SubscribeOptions::exclusive("t", "r-map-sub"))
            .await
            .unwrap();
        let err = broker
            .subscribe(SubscribeOptions::exclusive("t", "r-map-sub"))
            .await
            .unwrap_err();
        assert!(err.is_busy());
        assert_eq!(broker.consumer_count("t", "r-map-sub"), 1);
    }
}
