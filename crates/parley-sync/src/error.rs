use thiserror::Error;

use parley_shared::constants::NOT_REACHABLE_HINT;
use parley_shared::error::{IdentityError, TransportError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Messaging client not initialized")]
    NoClient,

    #[error("No conversation selected")]
    NoConversation,

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Please enter an address")]
    MissingAddress,

    #[error("Invalid Ethereum address format: {0}")]
    InvalidAddress(String),

    #[error("{} ({0})", NOT_REACHABLE_HINT)]
    NotReachable(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;
