//! Kill counter that feeds the room's score table.
//!
//! Runs beside the broker, not inside a client: it consumes the event topic
//! through a shared subscription and writes `killer -> kills` as keyed
//! records on the score topic, which clients read through a table view.

use blastgrid_core::{BoardConfig, GameEvent, RoomTopics, WireCodec};
use blastgrid_env::{
    BrokerError, GameContext, MessageBroker, OutboundMessage, StartPosition, SubscribeOptions,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Shared subscription name used by the scoreboard.
pub const SCOREBOARD_SUBSCRIPTION: &str = "scoreboard";

/// Folds Dead events into per-player kill counts.
#[derive(Debug, Default)]
pub struct ScoreboardFunction {
    alive: HashMap<String, bool>,
    kills: BTreeMap<String, u64>,
}

impl ScoreboardFunction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one event. Returns the killer's new total when it changed.
    ///
    /// A kill only counts when it takes a player from alive to dead, so a
    /// redelivered Dead is not counted twice. Suicides and Dead events
    /// without a killer never score.
    pub fn observe(&mut self, event: &GameEvent) -> Option<(String, u64)> {
        match event {
            GameEvent::Join { player, .. } | GameEvent::Revive { player, .. } => {
                self.alive.insert(player.clone(), true);
                None
            }
            GameEvent::Dead { player, killer, .. } => {
                let was_alive = self.alive.insert(player.clone(), false).unwrap_or(true);
                if !was_alive || killer.is_empty() || killer == player {
                    return None;
                }
                let total = self.kills.entry(killer.clone()).or_insert(0);
                *total += 1;
                Some((killer.clone(), *total))
            }
            _ => None,
        }
    }

    pub fn kills(&self, player: &str) -> u64 {
        self.kills.get(player).copied().unwrap_or(0)
    }

    /// Attaches to `room` and spawns the counting loop.
    ///
    /// Reads the event topic from the beginning so totals cover the whole
    /// game. Fails only if the subscription cannot be created.
    pub async fn start<Ctx, B>(
        mut self,
        ctx: &Arc<Ctx>,
        broker: Arc<B>,
        board: BoardConfig,
        room: &str,
    ) -> Result<JoinHandle<()>, BrokerError>
    where
        Ctx: GameContext,
        B: MessageBroker,
    {
        let topics = RoomTopics::new(room);
        let mut events = broker
            .subscribe(
                SubscribeOptions::shared(&topics.event_topic, SCOREBOARD_SUBSCRIPTION)
                    .starting_at(StartPosition::Earliest),
            )
            .await?;
        let codec = WireCodec::new(board);

        Ok(ctx.spawn("scoreboard", async move {
            while let Some(msg) = events.recv().await {
                let event = match codec.from_bytes(&msg.payload) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(id = msg.id.0, error = %e, "Scoreboard skipping malformed message");
                        continue;
                    }
                };
                let Some((killer, total)) = self.observe(&event) else {
                    continue;
                };
                let record = OutboundMessage::keyed(killer.clone(), total.to_string().into_bytes());
                match broker.publish(&topics.score_topic, record).await {
                    Ok(_) => debug!(killer = %killer, total, "Score updated"),
                    Err(e) => warn!(killer = %killer, error = %e, "Failed to publish score"),
                }
            }
        }))
    }
}
