//! Replay source for watch mode.
//!
//! Tails a room's event topic from its earliest or latest offset and hands
//! the decoded events out at a fixed cadence, so a recorded game plays back
//! at a watchable speed. Nothing is ever published.

use blastgrid_env::{GameContext, MessageBroker, StartPosition, Subscription};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::GameConfig;
use crate::error::GameError;
use crate::event::GameEvent;
use crate::transport::RoomTopics;
use crate::wire::WireCodec;

pub struct ReplayReader {
    rx: mpsc::Receiver<GameEvent>,
    pump: Option<JoinHandle<()>>,
}

impl ReplayReader {
    pub async fn open<Ctx, B>(
        ctx: &Arc<Ctx>,
        broker: &B,
        config: &GameConfig,
        room: &str,
        start: StartPosition,
    ) -> Result<Self, GameError>
    where
        Ctx: GameContext,
        B: MessageBroker,
    {
        let topics = RoomTopics::new(room);
        let reader = broker.create_reader(&topics.event_topic, start).await?;
        let (tx, rx) = mpsc::channel(config.inbound_capacity);

        debug!(topic = %topics.event_topic, ?start, "Opening replay");
        let pump = ctx.spawn(
            "replay",
            playback(
                Arc::clone(ctx),
                reader,
                WireCodec::new(config.board),
                config.replay_cadence(),
                tx,
            ),
        );
        Ok(Self {
            rx,
            pump: Some(pump),
        })
    }

    pub fn try_recv(&mut self) -> Option<GameEvent> {
        self.rx.try_recv().ok()
    }

    pub async fn recv(&mut self) -> Option<GameEvent> {
        self.rx.recv().await
    }

    pub fn shutdown(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.rx.close();
    }
}

impl Drop for ReplayReader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn playback<Ctx: GameContext>(
    ctx: Arc<Ctx>,
    mut reader: Subscription,
    codec: WireCodec,
    cadence: Duration,
    tx: mpsc::Sender<GameEvent>,
) {
    while let Some(msg) = reader.recv().await {
        let event = match codec.from_bytes(&msg.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(id = msg.id.0, error = %e, "Skipping malformed message in replay");
                continue;
            }
        };
        ctx.sleep(cadence).await;
        if tx.send(event).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Position;
    use blastgrid_env::{LocalBroker, OutboundMessage, TokioContext};

    fn place(bomb: &str) -> GameEvent {
        GameEvent::PlaceBomb {
            bomb: bomb.to_string(),
            at: Position::new(1, 1),
        }
    }

    async fn seed(broker: &LocalBroker, codec: &WireCodec, bombs: &[&str]) {
        for bomb in bombs {
            let bytes = codec.to_bytes(&place(bomb)).unwrap();
            broker
                .publish("r-event-topic", OutboundMessage::new(bytes))
                .await
                .unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_replays_from_earliest_at_cadence() {
        let ctx = TokioContext::shared();
        let broker = LocalBroker::new();
        let config = GameConfig::default();
        let codec = WireCodec::new(config.board);
        seed(&broker, &codec, &["a-1", "b-2"]).await;

        let mut replay = ReplayReader::open(&ctx, &broker, &config, "r", StartPosition::Earliest)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(replay.try_recv().is_none());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(replay.try_recv(), Some(place("a-1")));
        assert!(replay.try_recv().is_none());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(replay.try_recv(), Some(place("b-2")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latest_skips_history() {
        let ctx = TokioContext::shared();
        let broker = LocalBroker::new();
        let config = GameConfig::default();
        let codec = WireCodec::new(config.board);
        seed(&broker, &codec, &["old-1"]).await;

        let mut replay = ReplayReader::open(&ctx, &broker, &config, "r", StartPosition::Latest)
            .await
            .unwrap();
        broker
            .publish("r-event-topic", OutboundMessage::new(b"nonsense".to_vec()))
            .await
            .unwrap();
        seed(&broker, &codec, &["new-1"]).await;

        assert_eq!(replay.recv().await, Some(place("new-1")));
    }
}
