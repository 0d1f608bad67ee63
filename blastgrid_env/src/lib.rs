//! BlastGrid Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" seam that lets the BlastGrid engine run
//! against a real runtime and broker in production, or against an in-process
//! broker and seeded randomness in simulation.
//!
//! # Core Concept: Everything Goes Through the Log
//!
//! A client never mutates shared game state directly. It publishes intents to
//! a [`MessageBroker`] topic and applies whatever the broker delivers back, in
//! delivery order. The two seams a client touches are therefore:
//! - Runtime (`now()`, `sleep()`, `spawn()`, randomness) via [`GameContext`]
//! - Messaging (`publish()`, `subscribe()`, `create_reader()`, `table_view()`)
//!   via [`MessageBroker`]
//!
//! # Example
//!
//! ```ignore
//! use blastgrid_env::{GameContext, MessageBroker, SubscribeOptions};
//!
//! async fn tail<Ctx: GameContext, B: MessageBroker>(ctx: &Ctx, broker: &B) {
//!     let mut sub = broker
//!         .subscribe(SubscribeOptions::exclusive("room-event-topic", "alice-event-sub"))
//!         .await?;
//!     loop {
//!         tokio::select! {
//!             msg = sub.recv() => handle(msg),
//!             _ = ctx.sleep(Duration::from_millis(16)) => frame(),
//!         }
//!     }
//! }
//! ```

mod broker;
mod context;
mod error;
mod memory;
mod tokio_impl;
mod types;

pub use broker::{MessageBroker, Subscription, TableView};
pub use context::GameContext;
pub use error::BrokerError;
pub use memory::LocalBroker;
pub use tokio_impl::TokioContext;
pub use types::{
    BrokerMessage, ConsumerId, MessageId, OutboundMessage, StartPosition, SubscribeOptions,
    SubscriptionMode,
};
