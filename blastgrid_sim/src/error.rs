//! Error types for the simulation harness.

use blastgrid_core::GameError;
use blastgrid_env::BrokerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    /// A client failed to join or watch
    #[error("Game error: {0}")]
    Game(#[from] GameError),

    /// The simulated broker refused a call
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Runtime construction or file output failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Export serialization failed
    #[error("Export error: {0}")]
    Export(#[from] serde_json::Error),
}
