//! Wire format for game events.
//!
//! Every event travels as the same flat JSON record:
//!
//! ```text
//! { "type": "SetBombEvent", "name": "alice-QwErT", "avatar": "", "comment": "",
//!   "x": 4, "y": 7, "alive": false, "list": [] }
//! ```
//!
//! Obstacle layouts go in `list`, one integer per cell: `y * width + x`,
//! negated for Destructible cells. Code 0 cannot carry a sign, so a
//! Destructible obstacle at the origin is unrepresentable and rejected.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::ObstacleKind;
use crate::event::{GameEvent, ObstacleLayout};
use crate::grid::{BoardConfig, Position};

pub const MOVE: &str = "UserMoveEvent";
pub const JOIN: &str = "UserJoinEvent";
pub const DEAD: &str = "UserDeadEvent";
pub const REVIVE: &str = "UserReviveEvent";
pub const PLACE_BOMB: &str = "SetBombEvent";
pub const MOVE_BOMB: &str = "BombMoveEvent";
pub const EXPLODE: &str = "ExplodeEvent";
pub const UNDO_EXPLODE: &str = "UndoExplodeEvent";
pub const UPDATE_MAP: &str = "UpdateMapEvent";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Unknown event type: {0:?}")]
    UnknownKind(String),

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Obstacle code {0} is outside the board")]
    CodeOutOfBoard(i32),

    #[error("Obstacle cell {0} is outside the board")]
    CellOutOfBoard(Position),

    #[error("Destructible obstacle at the origin cannot be encoded")]
    DestructibleAtOrigin,
}

/// The flat record published on the event topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub avatar: String,
    /// Free-form; carries the killer on Dead
    pub comment: String,
    pub x: i32,
    pub y: i32,
    pub alive: bool,
    pub list: Vec<i32>,
}

impl WireRecord {
    fn new(kind: &str, name: &str, at: Position) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            x: at.x,
            y: at.y,
            ..Default::default()
        }
    }

    fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

/// Converts events to and from [`WireRecord`]s for one board size.
#[derive(Debug, Clone, Copy)]
pub struct WireCodec {
    board: BoardConfig,
}

impl WireCodec {
    pub fn new(board: BoardConfig) -> Self {
        Self { board }
    }

    pub fn encode(&self, event: &GameEvent) -> Result<WireRecord, WireError> {
        let record = match event {
            GameEvent::Move { player, avatar, to } => WireRecord {
                avatar: avatar.clone(),
                alive: true,
                ..WireRecord::new(MOVE, player, *to)
            },
            GameEvent::Join {
                player,
                avatar,
                at,
                layout,
            } => WireRecord {
                avatar: avatar.clone(),
                alive: true,
                list: self.encode_layout(layout)?,
                ..WireRecord::new(JOIN, player, *at)
            },
            GameEvent::Dead {
                player,
                avatar,
                at,
                killer,
            } => WireRecord {
                avatar: avatar.clone(),
                comment: killer.clone(),
                ..WireRecord::new(DEAD, player, *at)
            },
            GameEvent::Revive { player, avatar, at } => WireRecord {
                avatar: avatar.clone(),
                alive: true,
                ..WireRecord::new(REVIVE, player, *at)
            },
            GameEvent::PlaceBomb { bomb, at } => WireRecord::new(PLACE_BOMB, bomb, *at),
            GameEvent::Explode { bomb, at } => WireRecord::new(EXPLODE, bomb, *at),
            GameEvent::UndoExplode { bomb, at } => WireRecord::new(UNDO_EXPLODE, bomb, *at),
            GameEvent::MoveBomb { bomb, to } => WireRecord::new(MOVE_BOMB, bomb, *to),
            GameEvent::UpdateObstacleMap { layout } => WireRecord {
                list: self.encode_layout(layout)?,
                ..WireRecord::new(UPDATE_MAP, "", Position::new(0, 0))
            },
        };
        Ok(record)
    }

    pub fn decode(&self, record: WireRecord) -> Result<GameEvent, WireError> {
        let at = record.position();
        let event = match record.kind.as_str() {
            MOVE => GameEvent::Move {
                player: record.name,
                avatar: record.avatar,
                to: at,
            },
            JOIN => GameEvent::Join {
                layout: self.decode_layout(&record.list)?,
                player: record.name,
                avatar: record.avatar,
                at,
            },
            DEAD => GameEvent::Dead {
                player: record.name,
                avatar: record.avatar,
                at,
                killer: record.comment,
            },
            REVIVE => GameEvent::Revive {
                player: record.name,
                avatar: record.avatar,
                at,
            },
            PLACE_BOMB => GameEvent::PlaceBomb {
                bomb: record.name,
                at,
            },
            EXPLODE => GameEvent::Explode {
                bomb: record.name,
                at,
            },
            UNDO_EXPLODE => GameEvent::UndoExplode {
                bomb: record.name,
                at,
            },
            MOVE_BOMB => GameEvent::MoveBomb {
                bomb: record.name,
                to: at,
            },
            UPDATE_MAP => GameEvent::UpdateObstacleMap {
                layout: self.decode_layout(&record.list)?,
            },
            _ => return Err(WireError::UnknownKind(record.kind)),
        };
        Ok(event)
    }

    pub fn to_bytes(&self, event: &GameEvent) -> Result<Vec<u8>, WireError> {
        let record = self.encode(event)?;
        serde_json::to_vec(&record).map_err(|e| WireError::Malformed(e.to_string()))
    }

    pub fn from_bytes(&self, payload: &[u8]) -> Result<GameEvent, WireError> {
        let record: WireRecord =
            serde_json::from_slice(payload).map_err(|e| WireError::Malformed(e.to_string()))?;
        self.decode(record)
    }

    /// Sign-encodes a layout.
    pub fn encode_layout(&self, layout: &ObstacleLayout) -> Result<Vec<i32>, WireError> {
        layout
            .cells()
            .iter()
            .map(|(pos, kind)| {
                if !self.board.contains(*pos) {
                    return Err(WireError::CellOutOfBoard(*pos));
                }
                let code = self.board.encode(*pos);
                match kind {
                    ObstacleKind::Indestructible => Ok(code),
                    ObstacleKind::Destructible if code == 0 => Err(WireError::DestructibleAtOrigin),
                    ObstacleKind::Destructible => Ok(-code),
                }
            })
            .collect()
    }

    pub fn decode_layout(&self, list: &[i32]) -> Result<ObstacleLayout, WireError> {
        list.iter()
            .map(|&code| {
                let kind = if code < 0 {
                    ObstacleKind::Destructible
                } else {
                    ObstacleKind::Indestructible
                };
                let pos = self
                    .board
                    .decode(code.saturating_abs())
                    .ok_or(WireError::CodeOutOfBoard(code))?;
                Ok((pos, kind))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(ObstacleLayout::new)
    }
}
