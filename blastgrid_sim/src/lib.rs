//! BlastGrid simulation harness
//!
//! Runs whole rooms of BlastGrid clients inside one process so the
//! replicated state machine and the map-authority election can be checked
//! end to end.
//!
//! # Core Principle: One Seed, One Game
//!
//! All sources of non-determinism are pinned down:
//! - **Time**: a paused Tokio clock that jumps ahead whenever every task is idle
//! - **Broker**: an in-process broker with injectable outages and redelivery
//! - **Randomness**: bomb names, spawns, layouts and bot moves from one seed
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           SimRoom                            │
//! │                                                              │
//! │  ┌──────────┐   ┌──────────┐   ┌──────────┐                  │
//! │  │GameClient│   │GameClient│   │GameClient│   ...            │
//! │  │  bot0    │   │  bot1    │   │ (watch)  │                  │
//! │  └────┬─────┘   └────┬─────┘   └────┬─────┘                  │
//! │       │ publish/echo │              │ replay                 │
//! │  ┌────▼──────────────▼──────────────▼─────┐                  │
//! │  │  SimBroker (event / map / score topics) │◄── Controller   │
//! │  └────────────────────┬───────────────────┘   (outage, dup)  │
//! │                       │                                      │
//! │              ┌────────▼─────────┐                            │
//! │              │ScoreboardFunction│                            │
//! │              └──────────────────┘                            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use blastgrid_sim::{ScenarioId, ScenarioRunner};
//!
//! let result = ScenarioRunner::new(42, 4)
//!     .with_duration(10.0)
//!     .run(ScenarioId::Failover);
//! assert!(result.passed);
//! ```

pub mod board;
mod broker;
mod context;
mod error;
pub mod exporter;
mod room;
pub mod runner;
pub mod scenarios;
mod scoreboard;
pub mod session;

pub use broker::{SimBroker, SimBrokerController};
pub use context::SimContext;
pub use error::SimError;
pub use exporter::{SimExport, SimFrame};
pub use room::{choose_intent, SimRoom};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scenarios::ScenarioId;
pub use scoreboard::ScoreboardFunction;
pub use session::{run_session, SessionMode, SessionOptions, SessionReport};
