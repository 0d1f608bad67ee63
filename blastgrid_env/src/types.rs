//! Common types for the BlastGrid broker abstraction.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for one consumer attached to a subscription.
///
/// Uses UUID v4 for global uniqueness without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsumerId(pub Uuid);

impl ConsumerId {
    /// Creates a new random ConsumerId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic ConsumerId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for ConsumerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Position of a message inside its topic's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A message as delivered by the broker.
///
/// The payload is opaque bytes; decoding is the transport adapter's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerMessage {
    /// Position in the topic log
    pub id: MessageId,

    /// Topic the message was published on
    pub topic: String,

    /// Optional compaction key (used by table views)
    pub key: Option<String>,

    /// Raw payload bytes
    pub payload: Vec<u8>,
}

/// A message handed to the broker for publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

impl OutboundMessage {
    /// Creates an unkeyed message.
    pub fn new(payload: Vec<u8>) -> Self {
        Self { key: None, payload }
    }

    /// Creates a keyed message (last value per key wins in table views).
    pub fn keyed(key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            key: Some(key.into()),
            payload,
        }
    }
}

/// How a named subscription distributes messages among its consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionMode {
    /// At most one live consumer; further attach attempts fail with
    /// [`crate::BrokerError::SubscriptionBusy`] until it disconnects.
    Exclusive,

    /// Any number of consumers; each message goes to one of them.
    Shared,
}

impl std::fmt::Display for SubscriptionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionMode::Exclusive => write!(f, "exclusive"),
            SubscriptionMode::Shared => write!(f, "shared"),
        }
    }
}

/// Where a new subscription or reader starts in the topic log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StartPosition {
    /// Replay the whole log, then follow live messages
    Earliest,

    /// Only messages published after attaching
    Latest,

    /// The last message already in the log (if any), then live messages
    LatestInclusive,
}

impl std::str::FromStr for StartPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "earliest" => Ok(StartPosition::Earliest),
            "latest" => Ok(StartPosition::Latest),
            "latest_inclusive" | "latest-inclusive" => Ok(StartPosition::LatestInclusive),
            _ => Err(format!("Unknown start position: {}", s)),
        }
    }
}

/// Options for attaching a consumer to a named subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub topic: String,
    pub subscription: String,
    pub mode: SubscriptionMode,
    pub start: StartPosition,
}

impl SubscribeOptions {
    /// Exclusive subscription starting at the latest message.
    pub fn exclusive(topic: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            subscription: subscription.into(),
            mode: SubscriptionMode::Exclusive,
            start: StartPosition::Latest,
        }
    }

    /// Shared subscription starting at the latest message.
    pub fn shared(topic: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self {
            mode: SubscriptionMode::Shared,
            ..Self::exclusive(topic, subscription)
        }
    }

    /// Overrides the start position.
    pub fn starting_at(mut self, start: StartPosition) -> Self {
        self.start = start;
        self
    }
}
