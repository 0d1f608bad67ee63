//! Per-frame client runtime.
//!
//! A [`GameClient`] owns one replica and drives it one frame at a time:
//!
//! 1. apply at most one delivered event, scheduling its side effects
//! 2. check whether the local player is standing in flame
//! 3. publish occupancy for the map authority and roaming bombs
//!
//! Local input never touches the replica. [`GameClient::handle_intent`] turns
//! it into events and publishes them.

use blastgrid_env::{GameContext, MessageBroker, StartPosition, TableView};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::authority::{generate_layout, MapAuthority};
use crate::config::GameConfig;
use crate::engine::{GameState, SideEffect};
use crate::entity::{fresh_bomb_name, sanitize_player_name};
use crate::error::GameError;
use crate::event::GameEvent;
use crate::grid::{Direction, Position};
use crate::replay::ReplayReader;
use crate::timers::{arm_decay, arm_fuse, PushAnimator, RoamingBombs};
use crate::transport::{read_scores, EventPublisher, RoomTopics, Transport};

/// Something the local player wants to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Move(Direction),
    PlaceBomb,
    Revive,
}

impl std::str::FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "b" | "bomb" | "space" => Ok(Intent::PlaceBomb),
            "r" | "revive" => Ok(Intent::Revive),
            other => other
                .parse()
                .map(Intent::Move)
                .map_err(|_| format!("Unknown intent: {}", s)),
        }
    }
}

enum Feed {
    Live(Transport),
    /// Spectators read the score table directly
    Replay(ReplayReader, TableView),
}

impl Feed {
    fn try_recv(&mut self) -> Option<GameEvent> {
        match self {
            Feed::Live(transport) => transport.try_recv(),
            Feed::Replay(replay, _) => replay.try_recv(),
        }
    }

    fn scores(&self) -> Vec<(String, u64)> {
        match self {
            Feed::Live(transport) => transport.scores(),
            Feed::Replay(_, scores) => read_scores(scores),
        }
    }

    fn shutdown(&mut self) {
        match self {
            Feed::Live(transport) => transport.shutdown(),
            Feed::Replay(replay, _) => replay.shutdown(),
        }
    }
}

/// A player (or spectator) attached to a room.
pub struct GameClient<Ctx: GameContext> {
    ctx: Arc<Ctx>,
    config: GameConfig,
    state: GameState,
    feed: Feed,
    /// `None` in watch mode
    publisher: Option<EventPublisher>,
    is_authority: Arc<AtomicBool>,
    players_tx: watch::Sender<Vec<Position>>,
    occupied_tx: watch::Sender<Vec<Position>>,
    background: Vec<JoinHandle<()>>,
    timers: Vec<JoinHandle<()>>,
    /// Bomb whose flame we already reported dying in
    death_reported: Option<String>,
}

impl<Ctx: GameContext> GameClient<Ctx> {
    /// Joins `room` as `player`.
    ///
    /// Connects the transport, enters the map-authority election and
    /// publishes a Join carrying a random spawn cell and a fresh layout.
    pub async fn join<B: MessageBroker>(
        ctx: Arc<Ctx>,
        broker: Arc<B>,
        config: GameConfig,
        room: &str,
        player: &str,
    ) -> Result<Self, GameError> {
        config.validate()?;
        let player = sanitize_player_name(player);
        if player.is_empty() {
            return Err(GameError::Config("player name must not be empty".to_string()));
        }

        let transport = Transport::connect(ctx.as_ref(), Arc::clone(&broker), &config, room, &player).await?;
        let publisher = transport.publisher();

        let (players_tx, players_rx) = watch::channel(Vec::new());
        let (occupied_tx, occupied_rx) = watch::channel(Vec::new());

        let authority = MapAuthority::new(broker, transport.topics().clone(), config.clone());
        let is_authority = authority.authority_flag();
        let mut background = vec![authority.spawn(&ctx, players_rx)];

        let state = GameState::new(&config, Some(player.clone()));

        if config.random_bombs {
            let roaming = RoamingBombs {
                board: config.board,
                period: config.random_bomb_period(),
                suffix_len: config.bomb_suffix_len,
            };
            background.push(roaming.spawn(
                &ctx,
                publisher.clone(),
                state.obstacles(),
                occupied_rx,
                Arc::clone(&is_authority),
            ));
        }

        let (spawn, layout) = ctx.with_rng(|rng| {
            let spawn = Position::new(
                rng.gen_range(0..config.board.width),
                rng.gen_range(0..config.board.height),
            );
            (spawn, generate_layout(rng, &config, &[spawn]))
        });
        publisher.publish(GameEvent::Join {
            player: player.clone(),
            avatar: avatar_for(&player),
            at: spawn,
            layout,
        });
        info!(room, player = %player, at = %spawn, "Joined room");

        Ok(Self {
            ctx,
            config,
            state,
            feed: Feed::Live(transport),
            publisher: Some(publisher),
            is_authority,
            players_tx,
            occupied_tx,
            background,
            timers: Vec::new(),
            death_reported: None,
        })
    }

    /// Attaches a spectator that replays `room` from `start`.
    pub async fn watch<B: MessageBroker>(
        ctx: Arc<Ctx>,
        broker: Arc<B>,
        config: GameConfig,
        room: &str,
        start: StartPosition,
    ) -> Result<Self, GameError> {
        config.validate()?;
        let topics = RoomTopics::new(room);
        let replay = ReplayReader::open(&ctx, broker.as_ref(), &config, room, start).await?;
        let scores = broker.table_view(&topics.score_topic).await?;
        info!(room, ?start, "Watching room");

        Ok(Self {
            state: GameState::new(&config, None),
            ctx,
            config,
            feed: Feed::Replay(replay, scores),
            publisher: None,
            is_authority: Arc::new(AtomicBool::new(false)),
            players_tx: watch::channel(Vec::new()).0,
            occupied_tx: watch::channel(Vec::new()).0,
            background: Vec::new(),
            timers: Vec::new(),
            death_reported: None,
        })
    }

    /// Runs one frame. Returns true if an event was applied.
    pub fn frame(&mut self) -> bool {
        let applied = match self.feed.try_recv() {
            Some(event) => {
                let effects = self.state.apply(&event);
                self.schedule(effects);
                true
            }
            None => false,
        };

        self.check_local_death();

        if applied {
            self.players_tx.send_replace(self.state.player_positions());
            self.occupied_tx.send_replace(self.state.occupied_positions());
        }
        self.timers.retain(|t| !t.is_finished());
        applied
    }

    fn schedule(&mut self, effects: Vec<SideEffect>) {
        // Spectators never produce events
        let Some(publisher) = &self.publisher else {
            return;
        };
        for effect in effects {
            let handle = match effect {
                SideEffect::ArmFuse { bomb, at } => {
                    arm_fuse(&self.ctx, publisher.clone(), bomb, at, self.config.fuse())
                }
                SideEffect::ArmDecay { bomb, at } => {
                    arm_decay(&self.ctx, publisher.clone(), bomb, at, self.config.flame())
                }
            };
            self.timers.push(handle);
        }
    }

    fn check_local_death(&mut self) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        let Some(me) = self.state.local_player() else {
            return;
        };
        if !me.alive {
            self.death_reported = None;
            return;
        }
        // One report per blast; a lost one is retried by the next blast
        let Some(flame) = self.state.flame_at(me.position) else {
            self.death_reported = None;
            return;
        };
        if self.death_reported.as_deref() == Some(flame.bomb.as_str()) {
            return;
        }
        debug!(player = %me.name, killer = %flame.owner, "Caught in flame");
        let sent = publisher.publish(GameEvent::Dead {
            player: me.name.clone(),
            avatar: me.avatar.clone(),
            at: me.position,
            killer: flame.owner,
        });
        if sent {
            self.death_reported = Some(flame.bomb);
        }
    }

    /// Publishes the events for a local intent.
    ///
    /// Returns false when nothing was sent: watch mode, before the Join has
    /// come back, when dead (except Revive), or when placing a bomb on a bomb.
    pub fn handle_intent(&mut self, intent: Intent) -> bool {
        let Some(publisher) = &self.publisher else {
            return false;
        };
        let Some(me) = self.state.local_player() else {
            return false;
        };
        let (name, avatar, position, alive) =
            (me.name.clone(), me.avatar.clone(), me.position, me.alive);

        match intent {
            Intent::Revive => publisher.publish(GameEvent::Revive {
                player: name,
                avatar,
                at: position,
            }),
            _ if !alive => false,
            Intent::Move(direction) => {
                let to = self.state.board().step(position, direction);
                let sent = publisher.publish(GameEvent::Move {
                    player: name,
                    avatar,
                    to,
                });
                if let Some(bomb) = self.state.bomb_at(to) {
                    let push = PushAnimator::new(
                        bomb,
                        direction,
                        *self.state.board(),
                        self.state.obstacles(),
                        self.config.push_max_ticks,
                    );
                    self.timers
                        .push(push.spawn(&self.ctx, publisher.clone(), self.config.push_tick()));
                }
                sent
            }
            Intent::PlaceBomb => {
                if self.state.bomb_at(position).is_some() {
                    return false;
                }
                let bomb = self
                    .ctx
                    .with_rng(|rng| fresh_bomb_name(rng, &name, self.config.bomb_suffix_len));
                publisher.publish(GameEvent::PlaceBomb { bomb, at: position })
            }
        }
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn is_watching(&self) -> bool {
        self.publisher.is_none()
    }

    pub fn is_authority(&self) -> bool {
        self.is_authority.load(Ordering::Acquire)
    }

    /// Kill counts from the score table, highest first.
    pub fn scores(&self) -> Vec<(String, u64)> {
        self.feed.scores()
    }

    /// Events this client failed to hand to the broker.
    pub fn dropped_events(&self) -> u64 {
        self.publisher.as_ref().map_or(0, EventPublisher::dropped)
    }

    /// Leaves the room: stops every task and releases all subscriptions.
    pub fn shutdown(&mut self) {
        for task in self.background.drain(..).chain(self.timers.drain(..)) {
            task.abort();
        }
        self.feed.shutdown();
        self.is_authority.store(false, Ordering::Release);
    }
}

impl<Ctx: GameContext> Drop for GameClient<Ctx> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Single-letter avatar derived from the player name.
fn avatar_for(player: &str) -> String {
    player
        .chars()
        .next()
        .map(|c| c.to_ascii_uppercase().to_string())
        .unwrap_or_default()
}
