// Domain types and the transport contract shared by every Parley crate.

pub mod constants;
pub mod error;
pub mod format;
pub mod identity;
pub mod transport;
pub mod types;

pub use error::{IdentityError, TransportError};
pub use identity::{Identity, MessagingSigner, WalletSigner};
pub use transport::{
    ClientOptions, ClientRef, Connector, Conversation, ConversationRef, ListOptions, MessageQuery,
    MessagingClient, StreamHandle, Subscription,
};
pub use types::*;
