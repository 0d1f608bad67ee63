//! BlastGrid Core - Replicated State Machine for a Brokered Grid Game
//!
//! Every client in a room keeps a full replica of the game and mutates it
//! only by applying events delivered by a message broker:
//! 1. **Event model**: a closed set of nine events, the only way state changes
//! 2. **Engine**: deterministic `apply`, blast propagation and flame tracking
//! 3. **Transport**: events over the broker, echoed back to their sender
//! 4. **Map authority**: exclusive-subscription election of the one client
//!    that publishes obstacle layouts
//! 5. **Timers**: fuse, flame decay, bomb push and roaming bombs, all feeding
//!    new events back through the broker

pub mod authority;
pub mod blast;
pub mod client;
pub mod config;
pub mod engine;
pub mod entity;
pub mod error;
pub mod event;
pub mod grid;
pub mod replay;
pub mod timers;
pub mod transport;
pub mod wire;

// Re-export key types for convenience
pub use authority::{generate_layout, MapAuthority};
pub use client::{GameClient, Intent};
pub use config::GameConfig;
pub use engine::{GameState, SideEffect, Snapshot};
pub use entity::{Bomb, FlameSource, ObstacleKind, Player};
pub use error::GameError;
pub use event::{GameEvent, ObstacleLayout};
pub use grid::{BoardConfig, Direction, Position};
pub use replay::ReplayReader;
pub use transport::{EventPublisher, RoomTopics, Transport};
pub use wire::{WireCodec, WireError, WireRecord};
