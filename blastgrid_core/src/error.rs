use blastgrid_env::BrokerError;
use thiserror::Error;

use crate::wire::WireError;

#[derive(Error, Debug)]
pub enum GameError {
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Player {0} is already connected to this room")]
    AlreadyConnected(String),
}
