//! Error types for the BlastGrid environment abstraction.

use thiserror::Error;

/// Errors surfaced by a [`crate::MessageBroker`] implementation.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker could not be reached (connection refused, outage, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// An exclusive subscription already has a live consumer
    #[error("Subscription '{subscription}' on '{topic}' is held by another consumer")]
    SubscriptionBusy { topic: String, subscription: String },

    /// The subscription exists with a different mode
    #[error("Subscription '{subscription}' already exists with mode {existing}")]
    ModeMismatch { subscription: String, existing: String },

    /// The topic or consumer was closed underneath the caller
    #[error("Topic closed: {0}")]
    TopicClosed(String),
}

impl BrokerError {
    /// Creates a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a busy error for an exclusive subscription.
    pub fn busy(topic: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self::SubscriptionBusy {
            topic: topic.into(),
            subscription: subscription.into(),
        }
    }

    /// Returns true if this is the expected "someone else holds it" outcome.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::SubscriptionBusy { .. })
    }
}
