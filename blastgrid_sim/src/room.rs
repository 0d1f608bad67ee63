//! A simulated room: one broker, one seeded context, many clients.
//!
//! All clients run on the caller's runtime and are driven from one loop,
//! one [`SimRoom::tick`] at a time. Bots pick random intents from the
//! shared seeded RNG, so a room replays identically from its seed.

use blastgrid_core::{Direction, GameClient, GameConfig, Intent, RoomTopics, Snapshot};
use blastgrid_env::{GameContext, StartPosition};
use rand::{Rng, RngCore};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::broker::{SimBroker, SimBrokerController};
use crate::context::SimContext;
use crate::error::SimError;
use crate::scoreboard::ScoreboardFunction;

/// Picks a bot's next move.
///
/// Dead bots occasionally revive; live ones mostly walk and sometimes bomb.
pub fn choose_intent(rng: &mut dyn RngCore, alive: bool) -> Option<Intent> {
    if !alive {
        return rng.gen_bool(0.2).then_some(Intent::Revive);
    }
    let roll: f64 = rng.gen();
    if roll < 0.5 {
        Some(Intent::Move(Direction::ALL[rng.gen_range(0..Direction::ALL.len())]))
    } else if roll < 0.56 {
        Some(Intent::PlaceBomb)
    } else {
        None
    }
}

pub struct SimRoom {
    ctx: Arc<SimContext>,
    broker: Arc<SimBroker>,
    controller: SimBrokerController,
    topics: RoomTopics,
    config: GameConfig,
    tick: Duration,
    clients: Vec<GameClient<SimContext>>,
    scoreboard: Option<JoinHandle<()>>,
    intents_sent: u64,
}

impl SimRoom {
    /// Creates the broker and context for `room` and starts its scoreboard.
    ///
    /// Must be called from inside the runtime that will drive the room.
    pub async fn open(seed: u64, room: &str, config: GameConfig, tick: Duration) -> Result<Self, SimError> {
        config.validate()?;
        let ctx = SimContext::shared(seed);
        let broker = SimBroker::shared(seed);
        let controller = broker.controller();
        let scoreboard = ScoreboardFunction::new()
            .start(&ctx, Arc::clone(&broker), config.board, room)
            .await?;

        debug!(room, seed, "Opened simulated room");
        Ok(Self {
            ctx,
            broker,
            controller,
            topics: RoomTopics::new(room),
            config,
            tick,
            clients: Vec::new(),
            scoreboard: Some(scoreboard),
            intents_sent: 0,
        })
    }

    pub fn ctx(&self) -> &Arc<SimContext> {
        &self.ctx
    }

    pub fn broker(&self) -> &Arc<SimBroker> {
        &self.broker
    }

    pub fn controller(&self) -> &SimBrokerController {
        &self.controller
    }

    pub fn topics(&self) -> &RoomTopics {
        &self.topics
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn clients(&self) -> &[GameClient<SimContext>] {
        &self.clients
    }

    pub fn client_mut(&mut self, index: usize) -> Option<&mut GameClient<SimContext>> {
        self.clients.get_mut(index)
    }

    /// Joins a player. Returns its index.
    pub async fn join(&mut self, player: &str) -> Result<usize, SimError> {
        let client = GameClient::join(
            Arc::clone(&self.ctx),
            Arc::clone(&self.broker),
            self.config.clone(),
            &self.topics.room,
            player,
        )
        .await?;
        self.clients.push(client);
        Ok(self.clients.len() - 1)
    }

    /// Joins `count` bots named `bot0`, `bot1`, ...
    pub async fn join_bots(&mut self, count: usize) -> Result<(), SimError> {
        for i in 0..count {
            self.join(&format!("bot{}", i)).await?;
        }
        info!(room = %self.topics.room, bots = count, "Bots joined");
        Ok(())
    }

    /// Opens a spectator on this room's event log.
    pub async fn watch(&self, start: StartPosition) -> Result<GameClient<SimContext>, SimError> {
        let watcher = GameClient::watch(
            Arc::clone(&self.ctx),
            Arc::clone(&self.broker),
            self.config.clone(),
            &self.topics.room,
            start,
        )
        .await?;
        Ok(watcher)
    }

    /// Disconnects the client at `index`, releasing everything it held.
    pub fn leave(&mut self, index: usize) -> Option<String> {
        if index >= self.clients.len() {
            return None;
        }
        let mut client = self.clients.remove(index);
        let name = client.state().local_player_name().map(str::to_string);
        client.shutdown();
        info!(player = ?name, "Client left");
        name
    }

    /// Disconnects every client.
    pub fn leave_all(&mut self) {
        for mut client in self.clients.drain(..) {
            client.shutdown();
        }
    }

    /// Applies every event already delivered to each client.
    ///
    /// Returns the number of events applied across all clients.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        for client in &mut self.clients {
            while client.frame() {
                applied += 1;
            }
        }
        applied
    }

    /// Lets each bot act once.
    pub fn drive_bots(&mut self) {
        for client in &mut self.clients {
            let Some(alive) = client.state().local_player().map(|p| p.alive) else {
                continue;
            };
            let Some(intent) = self.ctx.with_rng(|rng| choose_intent(rng, alive)) else {
                continue;
            };
            if client.handle_intent(intent) {
                self.intents_sent += 1;
            }
        }
    }

    /// One simulation step: apply pending events, optionally act, then let
    /// one tick of time pass.
    pub async fn tick(&mut self, play: bool) {
        self.pump();
        if play {
            self.drive_bots();
        }
        self.ctx.sleep(self.tick).await;
    }

    /// Runs ticks without intents for `duration`, letting timers finish.
    pub async fn settle(&mut self, duration: Duration) {
        let until = self.ctx.now() + duration;
        while self.ctx.now() < until {
            self.tick(false).await;
        }
    }

    /// Describes the first difference between client 0 and any other
    /// client, if there is one.
    pub fn divergence(&self) -> Option<String> {
        let mut snapshots = self.clients.iter().map(|c| {
            (
                c.state().local_player_name().unwrap_or("?").to_string(),
                c.state().snapshot(),
            )
        });
        let (first_name, first) = snapshots.next()?;
        for (name, snapshot) in snapshots {
            if let Some(diff) = describe_difference(&first, &snapshot) {
                return Some(format!("{} vs {}: {}", first_name, name, diff));
            }
        }
        None
    }

    /// Pumps until all replicas agree, trying up to `attempts` ticks.
    pub async fn converge(&mut self, attempts: usize) -> Option<String> {
        let mut last = None;
        for _ in 0..attempts {
            self.ctx.sleep(self.tick).await;
            // Let pumps woken at this instant forward what was just published
            for _ in 0..3 {
                tokio::task::yield_now().await;
            }
            self.pump();
            last = self.divergence();
            if last.is_none() {
                return None;
            }
        }
        last
    }

    /// Names of the clients currently holding map authority.
    pub fn authorities(&self) -> Vec<String> {
        self.clients
            .iter()
            .filter(|c| c.is_authority())
            .filter_map(|c| c.state().local_player_name().map(str::to_string))
            .collect()
    }

    pub fn snapshot(&self) -> Option<Snapshot> {
        self.clients.first().map(|c| c.state().snapshot())
    }

    pub fn scores(&self) -> Vec<(String, u64)> {
        self.clients.first().map(|c| c.scores()).unwrap_or_default()
    }

    pub fn events_published(&self) -> usize {
        self.broker.topic_len(&self.topics.event_topic)
    }

    pub fn layouts_published(&self) -> usize {
        self.broker.topic_len(&self.topics.map_topic)
    }

    pub fn dropped_events(&self) -> u64 {
        self.clients.iter().map(|c| c.dropped_events()).sum()
    }

    pub fn intents_sent(&self) -> u64 {
        self.intents_sent
    }
}

impl Drop for SimRoom {
    fn drop(&mut self) {
        self.leave_all();
        if let Some(scoreboard) = self.scoreboard.take() {
            scoreboard.abort();
        }
    }
}

/// Names the first section where two snapshots differ.
pub fn describe_difference(a: &Snapshot, b: &Snapshot) -> Option<String> {
    if a.players != b.players {
        return Some(format!("players differ ({} vs {})", a.players.len(), b.players.len()));
    }
    if a.bombs != b.bombs {
        return Some(format!("bombs differ ({} vs {})", a.bombs.len(), b.bombs.len()));
    }
    if a.exploding != b.exploding {
        return Some(format!(
            "exploding differ ({} vs {})",
            a.exploding.len(),
            b.exploding.len()
        ));
    }
    if a.obstacles != b.obstacles {
        return Some(format!(
            "obstacles differ ({} vs {})",
            a.obstacles.len(),
            b.obstacles.len()
        ));
    }
    if a.flames != b.flames {
        return Some(format!("flames differ ({} vs {})", a.flames.len(), b.flames.len()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use blastgrid_core::BoardConfig;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn config() -> GameConfig {
        GameConfig {
            board: BoardConfig::new(12, 10),
            layout_period_ms: 1_000,
            ..GameConfig::default()
        }
    }

    #[test]
    fn test_choose_intent_respects_liveness() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        for _ in 0..200 {
            if let Some(intent) = choose_intent(&mut rng, false) {
                assert_eq!(intent, Intent::Revive);
            }
            assert_ne!(choose_intent(&mut rng, true), Some(Intent::Revive));
        }
    }

    #[test]
    fn test_describe_difference() {
        let a = Snapshot::default();
        assert_eq!(describe_difference(&a, &a.clone()), None);

        let mut b = a.clone();
        b.flames.push((blastgrid_core::Position::new(1, 1), "x-aaaaa".to_string()));
        assert!(describe_difference(&a, &b).unwrap().starts_with("flames"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bots_join_and_converge() {
        let mut room = SimRoom::open(3, "r", config(), Duration::from_millis(100))
            .await
            .unwrap();
        room.join_bots(3).await.unwrap();

        for _ in 0..30 {
            room.tick(true).await;
        }
        room.settle(Duration::from_secs(5)).await;

        assert_eq!(room.converge(20).await, None);
        assert_eq!(room.authorities().len(), 1);
        let snapshot = room.snapshot().unwrap();
        assert_eq!(snapshot.players.len(), 3);
        assert!(room.events_published() >= 3);
        assert!(room.layouts_published() >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_login_with_same_name_fails() {
        let mut room = SimRoom::open(3, "r", config(), Duration::from_millis(100))
            .await
            .unwrap();
        room.join("ann").await.unwrap();
        assert!(matches!(
            room.join("ann").await,
            Err(SimError::Game(blastgrid_core::GameError::AlreadyConnected(_)))
        ));

        assert_eq!(room.leave(0).as_deref(), Some("ann"));
        // The old subscription goes away once its aborted pump is dropped
        let mut rejoined = false;
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if room.join("ann").await.is_ok() {
                rejoined = true;
                break;
            }
        }
        assert!(rejoined);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_death_report_does_not_make_player_immortal() {
        let config = GameConfig {
            indestructible_obstacles: Some(0),
            destructible_obstacles: Some(0),
            ..GameConfig::default()
        };
        let tick = Duration::from_millis(100);
        let mut room = SimRoom::open(9, "r", config, tick).await.unwrap();
        room.join("ann").await.unwrap();
        for _ in 0..10 {
            room.tick(false).await;
        }
        assert!(room.client_mut(0).unwrap().handle_intent(Intent::PlaceBomb));

        // Cut the broker off right after the frame that queues the Dead
        let mut caught = false;
        for _ in 0..100 {
            room.ctx().sleep(tick).await;
            let client = room.client_mut(0).unwrap();
            while client.frame() {
                let me = client.state().local_player().unwrap();
                if client.state().flame_at(me.position).is_some() {
                    caught = true;
                    break;
                }
            }
            if caught {
                break;
            }
        }
        assert!(caught);
        room.controller().set_outage(true);
        room.ctx().sleep(tick).await;
        room.controller().set_outage(false);
        assert!(room.dropped_events() >= 1);

        for _ in 0..100 {
            room.tick(false).await;
            if room.clients()[0].state().flames().read().is_empty() {
                break;
            }
        }
        let me = room.clients()[0].state().local_player().unwrap();
        assert!(me.alive);

        // A second blast on the same spot still kills
        assert!(room.client_mut(0).unwrap().handle_intent(Intent::PlaceBomb));
        for _ in 0..100 {
            room.tick(false).await;
            if !room.clients()[0].state().local_player().unwrap().alive {
                break;
            }
        }
        let me = room.clients()[0].state().local_player().unwrap();
        assert!(!me.alive);
        assert_eq!(me.killed_by.as_deref(), Some("ann"));
    }
}
