//! The closed set of game events.
//!
//! Events are the only way game state changes. They are produced as intents
//! (local input, timers, the map authority), round-tripped through the broker,
//! and applied by [`crate::engine::GameState::apply`] in delivery order.

use std::collections::HashMap;

use crate::entity::{ObstacleKind, ObstacleMap};
use crate::grid::Position;

/// A complete obstacle layout, in generation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObstacleLayout {
    cells: Vec<(Position, ObstacleKind)>,
}

impl ObstacleLayout {
    pub fn new(cells: Vec<(Position, ObstacleKind)>) -> Self {
        Self { cells }
    }

    pub fn cells(&self) -> &[(Position, ObstacleKind)] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn count(&self, kind: ObstacleKind) -> usize {
        self.cells.iter().filter(|(_, k)| *k == kind).count()
    }

    /// Builds an obstacle map, skipping cells for which `keep` is false.
    pub fn to_map(&self, mut keep: impl FnMut(Position) -> bool) -> ObstacleMap {
        let mut map = HashMap::with_capacity(self.cells.len());
        for (pos, kind) in &self.cells {
            if keep(*pos) {
                map.insert(*pos, *kind);
            }
        }
        map
    }
}

impl FromIterator<(Position, ObstacleKind)> for ObstacleLayout {
    fn from_iter<I: IntoIterator<Item = (Position, ObstacleKind)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Every state change in the game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    /// A player steps to `to`
    Move {
        player: String,
        avatar: String,
        to: Position,
    },

    /// A player enters the room, optionally bringing a fresh layout
    Join {
        player: String,
        avatar: String,
        at: Position,
        layout: ObstacleLayout,
    },

    /// A player was caught in a flame
    Dead {
        player: String,
        avatar: String,
        at: Position,
        killer: String,
    },

    /// A dead player comes back at `at`
    Revive {
        player: String,
        avatar: String,
        at: Position,
    },

    /// A bomb named `<owner>-<suffix>` is placed
    PlaceBomb { bomb: String, at: Position },

    /// A bomb's fuse ran out
    Explode { bomb: String, at: Position },

    /// A bomb's flames died down
    UndoExplode { bomb: String, at: Position },

    /// A pushed bomb slid one cell
    MoveBomb { bomb: String, to: Position },

    /// The map authority replaced the obstacle layout
    UpdateObstacleMap { layout: ObstacleLayout },
}

impl GameEvent {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GameEvent::Move { .. } => "move",
            GameEvent::Join { .. } => "join",
            GameEvent::Dead { .. } => "dead",
            GameEvent::Revive { .. } => "revive",
            GameEvent::PlaceBomb { .. } => "place_bomb",
            GameEvent::Explode { .. } => "explode",
            GameEvent::UndoExplode { .. } => "undo_explode",
            GameEvent::MoveBomb { .. } => "move_bomb",
            GameEvent::UpdateObstacleMap { .. } => "update_obstacle_map",
        }
    }

    /// The player or bomb this event refers to, if any.
    pub fn subject(&self) -> Option<&str> {
        match self {
            GameEvent::Move { player, .. }
            | GameEvent::Join { player, .. }
            | GameEvent::Dead { player, .. }
            | GameEvent::Revive { player, .. } => Some(player),
            GameEvent::PlaceBomb { bomb, .. }
            | GameEvent::Explode { bomb, .. }
            | GameEvent::UndoExplode { bomb, .. }
            | GameEvent::MoveBomb { bomb, .. } => Some(bomb),
            GameEvent::UpdateObstacleMap { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_to_map_filters() {
        let layout: ObstacleLayout = vec![
            (Position::new(1, 1), ObstacleKind::Indestructible),
            (Position::new(2, 2), ObstacleKind::Destructible),
        ]
        .into_iter()
        .collect();

        let map = layout.to_map(|p| p != Position::new(2, 2));
        assert_eq!(map.len(), 1);
        assert_eq!(layout.count(ObstacleKind::Destructible), 1);
    }

    #[test]
    fn test_event_subject() {
        let e = GameEvent::PlaceBomb {
            bomb: "alice-abcde".to_string(),
            at: Position::new(0, 0),
        };
        assert_eq!(e.subject(), Some("alice-abcde"));
        assert_eq!(e.kind(), "place_bomb");
        let e = GameEvent::UpdateObstacleMap {
            layout: ObstacleLayout::default(),
        };
        assert_eq!(e.subject(), None);
    }
}
