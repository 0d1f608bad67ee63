//! Transport adapter: game events over a [`MessageBroker`].
//!
//! # Architecture
//!
//! ```text
//!   intents ──► EventPublisher ──[bounded]──► outbound pump ──► <room>-event-topic
//!                                                                     │
//!   GameState ◄──[inbound]◄── inbound pump ◄── <player>-event-sub ◄───┘
//!                                   ▲
//!              latest layout ───────┘ (<room>-map-topic, read once at connect)
//! ```
//!
//! Nothing is applied locally on publish. A client sees its own events only
//! when the broker echoes them back, so every replica shares one order.

use blastgrid_env::{
    GameContext, MessageBroker, OutboundMessage, StartPosition, SubscribeOptions, Subscription,
    TableView,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::GameConfig;
use crate::error::GameError;
use crate::event::GameEvent;
use crate::wire::WireCodec;

/// Topic and subscription names for one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomTopics {
    pub room: String,
    pub event_topic: String,
    pub map_topic: String,
    pub score_topic: String,
    /// Exclusive subscription whose holder is the map authority
    pub authority_subscription: String,
}

impl RoomTopics {
    pub fn new(room: &str) -> Self {
        Self {
            room: room.to_string(),
            event_topic: format!("{}-event-topic", room),
            map_topic: format!("{}-map-topic", room),
            score_topic: format!("{}-score-topic", room),
            authority_subscription: format!("{}-map-sub", room),
        }
    }

    /// Per-player exclusive subscription on the event topic.
    pub fn player_subscription(&self, player: &str) -> String {
        format!("{}-event-sub", player)
    }
}

/// Non-blocking handle for submitting events to the broker.
///
/// Cloned into every producer (input, fuse/decay timers, push animator).
/// When the outbound queue is full the event is dropped with a warning.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<GameEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventPublisher {
    /// Creates a publisher and the receiving end of its queue.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<GameEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Queues an event. Returns false if it was dropped.
    pub fn publish(&self, event: GameEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(kind = event.kind(), "Outbound queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(kind = event.kind(), "Transport closed, dropping event");
                false
            }
        }
    }

    /// Events dropped so far, across all clones.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A connected player's view of a room.
pub struct Transport {
    topics: RoomTopics,
    player: String,
    publisher: EventPublisher,
    inbound: mpsc::Receiver<GameEvent>,
    scores: TableView,
    pumps: Vec<JoinHandle<()>>,
}

impl Transport {
    /// Connects `player` to `room`.
    ///
    /// Fails with [`GameError::AlreadyConnected`] if another client holds the
    /// player's event subscription.
    pub async fn connect<Ctx, B>(
        ctx: &Ctx,
        broker: Arc<B>,
        config: &GameConfig,
        room: &str,
        player: &str,
    ) -> Result<Self, GameError>
    where
        Ctx: GameContext,
        B: MessageBroker,
    {
        let topics = RoomTopics::new(room);
        let codec = WireCodec::new(config.board);

        let events = broker
            .subscribe(
                SubscribeOptions::exclusive(&topics.event_topic, topics.player_subscription(player))
                    .starting_at(StartPosition::Latest),
            )
            .await
            .map_err(|e| {
                if e.is_busy() {
                    GameError::AlreadyConnected(player.to_string())
                } else {
                    GameError::from(e)
                }
            })?;

        let scores = broker.table_view(&topics.score_topic).await?;

        let (in_tx, inbound) = mpsc::channel(config.inbound_capacity);

        // Bootstrap with the newest layout so a late joiner sees the board
        // before the next epoch
        let mut latest = broker
            .create_reader(&topics.map_topic, StartPosition::LatestInclusive)
            .await?;
        if let Some(msg) = latest.try_recv() {
            match codec.from_bytes(&msg.payload) {
                Ok(event) => {
                    debug!(topic = %msg.topic, id = msg.id.0, "Bootstrapping latest layout");
                    if let Err(e) = in_tx.try_send(event) {
                        warn!(topic = %msg.topic, id = msg.id.0, error = %e, "Dropping bootstrap layout");
                    }
                }
                Err(e) => warn!(topic = %msg.topic, id = msg.id.0, error = %e, "Skipping malformed layout"),
            }
        }
        latest.close();

        let (publisher, out_rx) = EventPublisher::channel(config.outbound_capacity);

        let inbound_pump = ctx.spawn(
            "transport-inbound",
            inbound_pump(events, codec, in_tx),
        );
        let outbound_pump = ctx.spawn(
            "transport-outbound",
            outbound_pump(broker, topics.event_topic.clone(), codec, out_rx, publisher.dropped.clone()),
        );

        info!(room, player, "Connected to room");

        Ok(Self {
            topics,
            player: player.to_string(),
            publisher,
            inbound,
            scores,
            pumps: vec![inbound_pump, outbound_pump],
        })
    }

    pub fn topics(&self) -> &RoomTopics {
        &self.topics
    }

    pub fn player(&self) -> &str {
        &self.player
    }

    pub fn publisher(&self) -> EventPublisher {
        self.publisher.clone()
    }

    pub fn publish(&self, event: GameEvent) -> bool {
        self.publisher.publish(event)
    }

    /// Next delivered event, if one is waiting.
    pub fn try_recv(&mut self) -> Option<GameEvent> {
        self.inbound.try_recv().ok()
    }

    pub async fn recv(&mut self) -> Option<GameEvent> {
        self.inbound.recv().await
    }

    pub fn scores(&self) -> Vec<(String, u64)> {
        read_scores(&self.scores)
    }

    /// Stops both pumps and releases the player subscription.
    pub fn shutdown(&mut self) {
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
        self.inbound.close();
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Parses the score table into `(player, kills)` sorted by kills, then name.
pub fn read_scores(view: &TableView) -> Vec<(String, u64)> {
    let mut scores: Vec<(String, u64)> = view
        .snapshot()
        .into_iter()
        .filter_map(|(player, value)| value.trim().parse().ok().map(|n| (player, n)))
        .collect();
    scores.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    scores
}

async fn inbound_pump(mut events: Subscription, codec: WireCodec, tx: mpsc::Sender<GameEvent>) {
    while let Some(msg) = events.recv().await {
        let event = match codec.from_bytes(&msg.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(topic = %msg.topic, id = msg.id.0, error = %e, "Skipping malformed message");
                continue;
            }
        };
        if tx.send(event).await.is_err() {
            break;
        }
    }
    debug!(subscription = events.name(), "Inbound pump stopped");
}

async fn outbound_pump<B: MessageBroker>(
    broker: Arc<B>,
    topic: String,
    codec: WireCodec,
    mut rx: mpsc::Receiver<GameEvent>,
    dropped: Arc<AtomicU64>,
) {
    while let Some(event) = rx.recv().await {
        let payload = match codec.to_bytes(&event) {
            Ok(payload) => payload,
            Err(e) => {
                dropped.fetch_add(1, Ordering::Relaxed);
                warn!(kind = event.kind(), error = %e, "Cannot encode event, dropping");
                continue;
            }
        };
        if let Err(e) = broker.publish(&topic, OutboundMessage::new(payload)).await {
            dropped.fetch_add(1, Ordering::Relaxed);
            warn!(kind = event.kind(), error = %e, "Publish failed, dropping event");
        }
    }
    debug!(topic = %topic, "Outbound pump stopped");
}
