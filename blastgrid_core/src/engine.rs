//! The replicated game state and its event-apply function.
//!
//! Every client holds one [`GameState`] and feeds it the same ordered event
//! stream. `apply` is deterministic given the event and current state, so
//! replicas that consumed the same prefix agree on everything except the
//! side effects they choose to run (which depend on the local player).
//!
//! Delivery is at-least-once. Events that reference unknown entities or
//! off-board cells are silent no-ops, and Move/MoveBomb are idempotent under redelivery.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, trace};

use crate::blast::{compute_flame_map, destroy_in_blast, ExplodingBomb};
use crate::config::GameConfig;
use crate::entity::{
    is_roaming, owner_of, Bomb, FlameMap, FlameSource, Guarded, ObstacleKind, ObstacleMap, Player,
};
use crate::event::{GameEvent, ObstacleLayout};
use crate::grid::{BoardConfig, Position};

/// Work the caller must schedule after an event was applied.
///
/// Only produced for bombs this replica is responsible for: bombs owned by
/// the local player and roaming bombs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    /// Start the fuse timer for a freshly placed bomb
    ArmFuse { bomb: String, at: Position },
    /// Start the flame-decay timer for an exploded bomb
    ArmDecay { bomb: String, at: Position },
}

/// One replica's view of the room.
#[derive(Debug)]
pub struct GameState {
    board: BoardConfig,
    blast_radius: i32,
    local_player: Option<String>,

    players: HashMap<String, Player>,
    players_by_pos: HashMap<Position, String>,

    bombs: HashMap<String, Bomb>,
    bombs_by_pos: HashMap<Position, String>,
    exploding: BTreeMap<String, ExplodingBomb>,
    /// Names of bombs that already went off. Kept for the life of the room
    /// so a late redelivered PlaceBomb cannot resurrect one.
    spent: HashSet<String>,

    obstacles: Guarded<ObstacleMap>,
    flames: Guarded<FlameMap>,
}

impl GameState {
    /// Creates an empty replica. `local_player` is `None` in watch mode.
    pub fn new(config: &GameConfig, local_player: Option<String>) -> Self {
        Self {
            board: config.board,
            blast_radius: config.blast_radius,
            local_player,
            players: HashMap::new(),
            players_by_pos: HashMap::new(),
            bombs: HashMap::new(),
            bombs_by_pos: HashMap::new(),
            exploding: BTreeMap::new(),
            spent: HashSet::new(),
            obstacles: Guarded::new(HashMap::new()),
            flames: Guarded::new(HashMap::new()),
        }
    }

    /// Applies one delivered event.
    pub fn apply(&mut self, event: &GameEvent) -> Vec<SideEffect> {
        trace!(kind = event.kind(), subject = ?event.subject(), "apply");
        match event {
            GameEvent::Move { player, avatar, to } => {
                self.apply_move(player, avatar, *to);
                Vec::new()
            }
            GameEvent::Join {
                player,
                avatar,
                at,
                layout,
            } => {
                self.apply_join(player, avatar, *at, layout);
                Vec::new()
            }
            GameEvent::Dead { player, killer, .. } => {
                self.apply_dead(player, killer);
                Vec::new()
            }
            GameEvent::Revive { player, avatar, at } => {
                self.apply_revive(player, avatar, *at);
                Vec::new()
            }
            GameEvent::PlaceBomb { bomb, at } => self.apply_place_bomb(bomb, *at),
            GameEvent::Explode { bomb, .. } => self.apply_explode(bomb),
            GameEvent::UndoExplode { bomb, at } => {
                self.apply_undo_explode(bomb, *at);
                Vec::new()
            }
            GameEvent::MoveBomb { bomb, to } => {
                self.apply_move_bomb(bomb, *to);
                Vec::new()
            }
            GameEvent::UpdateObstacleMap { layout } => {
                self.apply_update_map(layout);
                Vec::new()
            }
        }
    }

    fn apply_move(&mut self, name: &str, avatar: &str, to: Position) {
        if !self.board.contains(to) || self.obstacles.read().contains_key(&to) {
            return;
        }
        if matches!(self.players.get(name), Some(p) if !p.alive) {
            return;
        }
        self.put_player(name, avatar, to);
    }

    fn apply_join(&mut self, name: &str, avatar: &str, at: Position, layout: &ObstacleLayout) {
        if !self.board.contains(at) {
            debug!(player = name, at = %at, "ignoring off-board join");
            return;
        }
        if !layout.is_empty() {
            *self.obstacles.write() = layout.to_map(|_| true);
            self.recompute_flames();
        }
        self.put_player(name, avatar, at);
        if let Some(player) = self.players.get_mut(name) {
            player.alive = true;
        }
        debug!(player = name, at = %at, "player joined");
    }

    fn apply_dead(&mut self, name: &str, killer: &str) {
        let Some(player) = self.players.get_mut(name) else {
            return;
        };
        player.alive = false;
        player.killed_by = (!killer.is_empty()).then(|| killer.to_string());
        debug!(player = name, killer = %killer, "player died");
    }

    fn apply_revive(&mut self, name: &str, avatar: &str, at: Position) {
        if !self.board.contains(at) {
            return;
        }
        self.put_player(name, avatar, at);
        if let Some(player) = self.players.get_mut(name) {
            player.alive = true;
            player.killed_by = None;
        }
    }

    /// Inserts or relocates a player, keeping the position index in step.
    fn put_player(&mut self, name: &str, avatar: &str, to: Position) {
        let player = self
            .players
            .entry(name.to_string())
            .or_insert_with(|| Player::new(name, avatar, to));

        let from = player.position;
        player.position = to;
        player.avatar = avatar.to_string();

        if from != to && self.players_by_pos.get(&from).map(String::as_str) == Some(name) {
            self.players_by_pos.remove(&from);
        }
        self.players_by_pos.insert(to, name.to_string());
    }

    fn apply_place_bomb(&mut self, name: &str, at: Position) -> Vec<SideEffect> {
        if !self.board.contains(at) || self.obstacles.read().contains_key(&at) {
            return Vec::new();
        }
        // Redelivered placement: the fuse is already armed or burnt
        if self.bombs.contains_key(name) || self.spent.contains(name) {
            return Vec::new();
        }

        self.bombs.insert(name.to_string(), Bomb::new(name, at));
        self.bombs_by_pos.insert(at, name.to_string());

        if self.is_responsible_for(name) {
            vec![SideEffect::ArmFuse {
                bomb: name.to_string(),
                at,
            }]
        } else {
            Vec::new()
        }
    }

    fn apply_explode(&mut self, name: &str) -> Vec<SideEffect> {
        let Some(bomb) = self.bombs.get(name) else {
            return Vec::new();
        };
        let at = bomb.position;
        if !self.bombs_by_pos.contains_key(&at) {
            return Vec::new();
        }

        // Wake the fuse task if the explosion was triggered elsewhere
        bomb.cancel.signal();

        let Some(bomb) = self.bombs.remove(name) else {
            return Vec::new();
        };
        if self.bombs_by_pos.get(&at).map(String::as_str) == Some(name) {
            self.bombs_by_pos.remove(&at);
        }
        self.spent.insert(name.to_string());
        self.exploding.insert(
            name.to_string(),
            ExplodingBomb {
                position: at,
                owner: bomb.owner,
            },
        );

        let destroyed = {
            let mut obstacles = self.obstacles.write();
            destroy_in_blast(&self.board, at, self.blast_radius, &mut obstacles)
        };
        self.recompute_flames();
        debug!(bomb = name, at = %at, destroyed = destroyed.len(), "bomb exploded");

        if self.is_responsible_for(name) {
            vec![SideEffect::ArmDecay {
                bomb: name.to_string(),
                at,
            }]
        } else {
            Vec::new()
        }
    }

    fn apply_undo_explode(&mut self, name: &str, at: Position) {
        let removed = if name.is_empty() {
            let before = self.exploding.len();
            self.exploding.retain(|_, e| e.position != at);
            before != self.exploding.len()
        } else {
            self.exploding.remove(name).is_some()
        };
        if removed {
            self.recompute_flames();
        }
    }

    fn apply_move_bomb(&mut self, name: &str, to: Position) {
        if !self.board.contains(to) {
            return;
        }
        let Some(bomb) = self.bombs.get_mut(name) else {
            return;
        };
        let from = bomb.position;
        if !self.bombs_by_pos.contains_key(&from) {
            return;
        }
        if self.bombs_by_pos.get(&from).map(String::as_str) == Some(name) {
            self.bombs_by_pos.remove(&from);
        }
        bomb.position = to;
        self.bombs_by_pos.insert(to, name.to_string());
    }

    fn apply_update_map(&mut self, layout: &ObstacleLayout) {
        let occupied = self.occupied_positions();
        let map = layout.to_map(|p| !occupied.contains(&p));
        debug!(cells = map.len(), skipped = layout.len() - map.len(), "obstacle map updated");
        *self.obstacles.write() = map;
        self.recompute_flames();
    }

    fn recompute_flames(&mut self) {
        let map = {
            let obstacles = self.obstacles.read();
            compute_flame_map(&self.board, self.blast_radius, &self.exploding, &obstacles)
        };
        *self.flames.write() = map;
    }

    fn is_responsible_for(&self, bomb: &str) -> bool {
        is_roaming(bomb)
            || self
                .local_player
                .as_deref()
                .is_some_and(|local| local == owner_of(bomb))
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn board(&self) -> &BoardConfig {
        &self.board
    }

    pub fn blast_radius(&self) -> i32 {
        self.blast_radius
    }

    pub fn local_player_name(&self) -> Option<&str> {
        self.local_player.as_deref()
    }

    pub fn local_player(&self) -> Option<&Player> {
        self.local_player
            .as_deref()
            .and_then(|name| self.players.get(name))
    }

    pub fn player(&self, name: &str) -> Option<&Player> {
        self.players.get(name)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    /// Player indexed at `pos`. The index may lag for dead players.
    pub fn player_at(&self, pos: Position) -> Option<&Player> {
        self.players_by_pos
            .get(&pos)
            .and_then(|name| self.players.get(name))
    }

    pub fn bomb(&self, name: &str) -> Option<&Bomb> {
        self.bombs.get(name)
    }

    pub fn bombs(&self) -> impl Iterator<Item = &Bomb> {
        self.bombs.values()
    }

    pub fn bomb_at(&self, pos: Position) -> Option<&Bomb> {
        self.bombs_by_pos
            .get(&pos)
            .and_then(|name| self.bombs.get(name))
    }

    pub fn is_exploding(&self, bomb: &str) -> bool {
        self.exploding.contains_key(bomb)
    }

    pub fn exploding(&self) -> impl Iterator<Item = (&String, &ExplodingBomb)> {
        self.exploding.iter()
    }

    /// Shared handle to the obstacle map, for producers that read it
    /// off the apply path (push animator, roaming bombs).
    pub fn obstacles(&self) -> Guarded<ObstacleMap> {
        self.obstacles.clone()
    }

    pub fn obstacle_at(&self, pos: Position) -> Option<ObstacleKind> {
        self.obstacles.read().get(&pos).copied()
    }

    pub fn flames(&self) -> Guarded<FlameMap> {
        self.flames.clone()
    }

    pub fn flame_at(&self, pos: Position) -> Option<FlameSource> {
        self.flames.read().get(&pos).cloned()
    }

    /// Cells holding a player (alive or dead) or a bomb.
    pub fn occupied_positions(&self) -> Vec<Position> {
        let mut cells: Vec<Position> = self
            .players
            .values()
            .map(|p| p.position)
            .chain(self.bombs.values().map(|b| b.position))
            .collect();
        cells.sort();
        cells.dedup();
        cells
    }

    /// Positions of every known player, for layout generation.
    pub fn player_positions(&self) -> Vec<Position> {
        let mut cells: Vec<Position> = self.players.values().map(|p| p.position).collect();
        cells.sort();
        cells
    }

    /// Order-stable copy of the replicated state.
    pub fn snapshot(&self) -> Snapshot {
        let mut players: Vec<PlayerView> = self
            .players
            .values()
            .map(|p| PlayerView {
                name: p.name.clone(),
                avatar: p.avatar.clone(),
                position: p.position,
                alive: p.alive,
                killed_by: p.killed_by.clone(),
            })
            .collect();
        players.sort_by(|a, b| a.name.cmp(&b.name));

        let mut bombs: Vec<BombView> = self
            .bombs
            .values()
            .map(|b| BombView {
                name: b.name.clone(),
                position: b.position,
            })
            .collect();
        bombs.sort_by(|a, b| a.name.cmp(&b.name));

        let exploding = self
            .exploding
            .iter()
            .map(|(name, e)| BombView {
                name: name.clone(),
                position: e.position,
            })
            .collect();

        let obstacles: BTreeMap<Position, ObstacleKind> = self
            .obstacles
            .read()
            .iter()
            .map(|(p, k)| (*p, *k))
            .collect();
        let flames: BTreeMap<Position, String> = self
            .flames
            .read()
            .iter()
            .map(|(p, s)| (*p, s.bomb.clone()))
            .collect();

        Snapshot {
            players,
            bombs,
            exploding,
            obstacles: obstacles.into_iter().collect(),
            flames: flames.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerView {
    pub name: String,
    pub avatar: String,
    pub position: Position,
    pub alive: bool,
    pub killed_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BombView {
    pub name: String,
    pub position: Position,
}

/// Serializable state, sorted so equal replicas compare and print equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub players: Vec<PlayerView>,
    pub bombs: Vec<BombView>,
    pub exploding: Vec<BombView>,
    pub obstacles: Vec<(Position, ObstacleKind)>,
    pub flames: Vec<(Position, String)>,
}
