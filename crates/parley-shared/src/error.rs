use thiserror::Error;

/// Failures reported by the messaging transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Client is closed")]
    Closed,

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Inbox not found for identifier: {0}")]
    InboxNotFound(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Signature error: {0}")]
    Signature(String),

    #[error("Environment mismatch: expected {expected}, got {actual}")]
    EnvironmentMismatch { expected: String, actual: String },

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("No wallet connected")]
    NoWallet,

    #[error("Invalid Ethereum address: {0}")]
    InvalidAddress(String),

    #[error("Wallet refused to sign: {0}")]
    Signing(String),

    #[error("Malformed signature: {0}")]
    MalformedSignature(String),
}

impl From<IdentityError> for TransportError {
    fn from(e: IdentityError) -> Self {
        TransportError::Signature(e.to_string())
    }
}
