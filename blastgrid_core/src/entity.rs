//! Entity records and the shared indices the engine keeps over them.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::grid::Position;

/// Name prefix of bombs that belong to no player.
pub const ROAMING_BOMB_PREFIX: &str = "random";

/// The two kinds of obstacle cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObstacleKind {
    /// Destroyed by a blast; does not stop it
    Destructible,
    /// Stops a blast and survives it
    Indestructible,
}

pub type ObstacleMap = HashMap<Position, ObstacleKind>;

/// Which bomb is burning a flame cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlameSource {
    pub bomb: String,
    pub owner: String,
}

pub type FlameMap = HashMap<Position, FlameSource>;

/// A player in the room. Players are never deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub name: String,
    pub avatar: String,
    pub position: Position,
    pub alive: bool,
    /// Who placed the bomb that last killed this player
    pub killed_by: Option<String>,
}

impl Player {
    pub fn new(name: impl Into<String>, avatar: impl Into<String>, position: Position) -> Self {
        Self {
            name: name.into(),
            avatar: avatar.into(),
            position,
            alive: true,
            killed_by: None,
        }
    }
}

/// Single-slot "explode now" notification.
///
/// Signalling is non-blocking and idempotent: a second signal while one is
/// pending is dropped. Listeners poll with [`CancelSignal::try_take`], which
/// tests and clears in one step.
#[derive(Debug, Default)]
pub struct CancelSignal {
    pending: AtomicBool,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal. Returns false if one was already pending (dropped).
    pub fn signal(&self) -> bool {
        !self.pending.swap(true, Ordering::AcqRel)
    }

    /// Consumes a pending signal, if any.
    pub fn try_take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

/// A placed bomb.
#[derive(Debug, Clone)]
pub struct Bomb {
    pub name: String,
    pub owner: String,
    pub position: Position,
    pub cancel: Arc<CancelSignal>,
}

impl Bomb {
    pub fn new(name: impl Into<String>, position: Position) -> Self {
        let name = name.into();
        Self {
            owner: owner_of(&name).to_string(),
            name,
            position,
            cancel: Arc::new(CancelSignal::new()),
        }
    }
}

/// Owner part of a bomb name (`<owner>-<suffix>`).
pub fn owner_of(bomb: &str) -> &str {
    bomb.split('-').next().unwrap_or(bomb)
}

/// True for bombs named `random-<suffix>`.
pub fn is_roaming(bomb: &str) -> bool {
    owner_of(bomb) == ROAMING_BOMB_PREFIX && bomb.len() > ROAMING_BOMB_PREFIX.len()
}

/// Builds `<owner>-<suffix>` with a random ASCII-letter suffix.
pub fn fresh_bomb_name<R: Rng + ?Sized>(rng: &mut R, owner: &str, suffix_len: usize) -> String {
    const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let suffix: String = (0..suffix_len)
        .map(|_| LETTERS[rng.gen_range(0..LETTERS.len())] as char)
        .collect();
    format!("{}-{}", owner, suffix)
}

/// Bomb names must not contain the owner separator inside the owner part.
pub fn sanitize_player_name(name: &str) -> String {
    name.trim().replace('-', "_")
}

/// Reader/writer-locked value shared between the engine and helper tasks.
///
/// Poisoning is ignored: the guarded maps stay structurally valid even if a
/// holder panicked.
#[derive(Debug, Default)]
pub struct Guarded<T>(Arc<RwLock<T>>);

impl<T> Clone for Guarded<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Guarded<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }
}
