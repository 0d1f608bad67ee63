//! Map-authority election.
//!
//! Every client races for one exclusive subscription,
//! `<room>-map-sub` on `<room>-map-topic`. The broker grants it to at most one
//! live consumer; that client is the map authority and is the only one that
//! publishes obstacle layouts. Holding the [`Subscription`] is the lease:
//! dropping it (disconnect, shutdown) lets the next attempt succeed.
//!
//! The authority publishes each layout twice:
//! - on the event topic, so every replica applies it in the shared order
//! - on the map topic, where late joiners read the newest one at connect

use blastgrid_env::{GameContext, MessageBroker, OutboundMessage, StartPosition, SubscribeOptions, Subscription};
use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::GameConfig;
use crate::entity::ObstacleKind;
use crate::error::GameError;
use crate::event::{GameEvent, ObstacleLayout};
use crate::grid::Position;
use crate::transport::RoomTopics;
use crate::wire::WireCodec;

/// Samples a fresh layout.
///
/// Draws `indestructible + destructible` distinct cells; the first
/// `indestructible` become Indestructible, the rest Destructible. Cells in
/// or next to any `players` position are removed afterwards, and the origin
/// is never Destructible.
pub fn generate_layout<R: Rng + ?Sized>(
    rng: &mut R,
    config: &GameConfig,
    players: &[Position],
) -> ObstacleLayout {
    let board = config.board;
    let cells = board.cell_count();
    let hard = config.indestructible_count().min(cells);
    let total = (hard + config.destructible_count()).min(cells);

    let keep_clear: HashSet<Position> = players.iter().flat_map(|p| p.neighbourhood()).collect();

    rand::seq::index::sample(rng, cells, total)
        .into_iter()
        .enumerate()
        .filter_map(|(i, code)| {
            let pos = board.decode(code as i32)?;
            let kind = if i < hard {
                ObstacleKind::Indestructible
            } else {
                ObstacleKind::Destructible
            };
            if kind == ObstacleKind::Destructible && code == 0 {
                return None;
            }
            (!keep_clear.contains(&pos)).then_some((pos, kind))
        })
        .collect()
}

/// One client's stake in the map-authority election.
pub struct MapAuthority<B: MessageBroker> {
    broker: Arc<B>,
    topics: RoomTopics,
    codec: WireCodec,
    config: GameConfig,
    lease: Option<Subscription>,
    is_authority: Arc<AtomicBool>,
}

impl<B: MessageBroker> MapAuthority<B> {
    pub fn new(broker: Arc<B>, topics: RoomTopics, config: GameConfig) -> Self {
        Self {
            broker,
            codec: WireCodec::new(config.board),
            topics,
            config,
            lease: None,
            is_authority: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Tries to take the authority subscription.
    ///
    /// `Ok(false)` means another client holds it, which is the normal case.
    pub async fn try_acquire(&mut self) -> Result<bool, GameError> {
        if self.lease.is_some() {
            return Ok(true);
        }
        let options = SubscribeOptions::exclusive(
            &self.topics.map_topic,
            &self.topics.authority_subscription,
        )
        .starting_at(StartPosition::Latest);

        match self.broker.subscribe(options).await {
            Ok(lease) => {
                info!(room = %self.topics.room, consumer = %lease.consumer_id(), "Acquired map authority");
                self.lease = Some(lease);
                self.is_authority.store(true, Ordering::Release);
                Ok(true)
            }
            Err(e) if e.is_busy() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_authority(&self) -> bool {
        self.is_authority.load(Ordering::Acquire)
    }

    /// Shared flag that tracks authority, for producers that only the
    /// authority should run.
    pub fn authority_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.is_authority)
    }

    /// Gives up authority.
    pub fn release(&mut self) {
        if let Some(lease) = self.lease.take() {
            lease.close();
            self.is_authority.store(false, Ordering::Release);
            info!(room = %self.topics.room, "Released map authority");
        }
    }

    /// Publishes `layout` if this client is the authority.
    pub async fn publish_layout(&mut self, layout: ObstacleLayout) -> Result<bool, GameError> {
        if !self.is_authority() {
            return Ok(false);
        }
        // The lease only marks ownership; drop anything queued on it
        if let Some(lease) = self.lease.as_mut() {
            while lease.try_recv().is_some() {}
        }

        let cells = layout.len();
        let payload = self
            .codec
            .to_bytes(&GameEvent::UpdateObstacleMap { layout })?;
        self.broker
            .publish(&self.topics.event_topic, OutboundMessage::new(payload.clone()))
            .await?;
        self.broker
            .publish(&self.topics.map_topic, OutboundMessage::new(payload))
            .await?;
        debug!(room = %self.topics.room, cells, "Published obstacle layout");
        Ok(true)
    }

    /// One election round: acquire if possible, then publish a layout that
    /// keeps clear of `players`.
    pub async fn step<Ctx: GameContext>(
        &mut self,
        ctx: &Ctx,
        players: &[Position],
    ) -> Result<bool, GameError> {
        if !self.try_acquire().await? {
            return Ok(false);
        }
        let layout = ctx.with_rng(|rng| generate_layout(rng, &self.config, players));
        self.publish_layout(layout).await
    }

    /// Runs an election round every layout period until aborted.
    ///
    /// `players` carries the positions to keep clear of.
    pub fn spawn<Ctx: GameContext>(
        mut self,
        ctx: &Arc<Ctx>,
        players: watch::Receiver<Vec<Position>>,
    ) -> JoinHandle<()> {
        let task_ctx = Arc::clone(ctx);
        ctx.spawn("map-authority", async move {
            let period = self.config.layout_period();
            loop {
                let keep_clear = players.borrow().clone();
                if let Err(e) = self.step(task_ctx.as_ref(), &keep_clear).await {
                    warn!(error = %e, "Map authority round failed");
                    self.release();
                }
                task_ctx.sleep(period).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::BoardConfig;
    use blastgrid_env::{LocalBroker, TokioContext};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn config() -> GameConfig {
        GameConfig {
            board: BoardConfig::new(10, 8),
            ..GameConfig::default()
        }
    }

    #[test]
    fn test_layout_counts_and_kinds() {
        let config = config();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let layout = generate_layout(&mut rng, &config, &[]);

        // 80 cells: 16 indestructible + 20 destructible, minus a possible origin
        assert_eq!(layout.count(ObstacleKind::Indestructible), 16);
        assert!(layout.count(ObstacleKind::Destructible) >= 19);

        let distinct: HashSet<Position> = layout.cells().iter().map(|(p, _)| *p).collect();
        assert_eq!(distinct.len(), layout.len());
        assert!(!layout
            .cells()
            .contains(&(Position::new(0, 0), ObstacleKind::Destructible)));
    }

    #[test]
    fn test_layout_keeps_player_neighbourhood_clear() {
        let config = GameConfig {
            indestructible_obstacles: Some(30),
            destructible_obstacles: Some(50),
            ..config()
        };
        let players = [Position::new(3, 3), Position::new(9, 7)];
        for seed in 0..20 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let layout = generate_layout(&mut rng, &config, &players);
            for (pos, _) in layout.cells() {
                for player in &players {
                    assert!(!player.neighbourhood().contains(pos), "seed {seed}: {pos}");
                }
            }
        }
    }

    #[tokio::test]
    async fn test_exactly_one_authority() {
        let broker = LocalBroker::shared();
        let topics = RoomTopics::new("r");

        let mut contenders: Vec<_> = (0..5)
            .map(|_| MapAuthority::new(broker.clone(), topics.clone(), config()))
            .collect();

        let mut winners = Vec::new();
        for (i, contender) in contenders.iter_mut().enumerate() {
            if contender.try_acquire().await.unwrap() {
                winners.push(i);
            }
        }
        assert_eq!(winners.len(), 1);
        let winner = winners[0];
        assert!(contenders[winner].is_authority());

        // Holder leaves; a survivor takes over
        contenders.remove(winner);
        let mut took_over = 0;
        for contender in contenders.iter_mut() {
            if contender.try_acquire().await.unwrap() {
                took_over += 1;
            }
        }
        assert_eq!(took_over, 1);
    }

    #[tokio::test]
    async fn test_concurrent_acquisition() {
        let broker = LocalBroker::shared();
        let topics = RoomTopics::new("r");

        let attempts = (0..8).map(|_| {
            let mut authority = MapAuthority::new(broker.clone(), topics.clone(), config());
            tokio::spawn(async move {
                let won = authority.try_acquire().await.unwrap();
                (won, authority)
            })
        });
        let results = join_all_handles(attempts).await;
        assert_eq!(results.iter().filter(|(won, _)| *won).count(), 1);
    }

    async fn join_all_handles<T: Send + 'static>(
        handles: impl Iterator<Item = JoinHandle<T>>,
    ) -> Vec<T> {
        let mut out = Vec::new();
        for handle in handles.collect::<Vec<_>>() {
            out.push(handle.await.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_only_authority_publishes() {
        let ctx = TokioContext::new();
        let broker = LocalBroker::shared();
        let topics = RoomTopics::new("r");

        let mut leader = MapAuthority::new(broker.clone(), topics.clone(), config());
        let mut follower = MapAuthority::new(broker.clone(), topics.clone(), config());

        assert!(leader.step(&ctx, &[]).await.unwrap());
        assert!(!follower.step(&ctx, &[]).await.unwrap());
        assert!(!follower
            .publish_layout(ObstacleLayout::default())
            .await
            .unwrap());

        assert_eq!(broker.topic_len("r-event-topic"), 1);
        assert_eq!(broker.topic_len("r-map-topic"), 1);

        leader.release();
        assert!(!leader.is_authority());
        assert!(follower.step(&ctx, &[]).await.unwrap());
        assert_eq!(broker.topic_len("r-map-topic"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_loop_republishes_each_period() {
        let ctx = TokioContext::shared();
        let broker = LocalBroker::shared();
        let config = GameConfig {
            layout_period_ms: 1000,
            ..config()
        };
        let (_tx, players) = watch::channel(vec![Position::new(1, 1)]);

        let authority = MapAuthority::new(broker.clone(), RoomTopics::new("r"), config);
        let handle = authority.spawn(&ctx, players);

        tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
        assert_eq!(broker.topic_len("r-map-topic"), 3);
        handle.abort();
    }
}
