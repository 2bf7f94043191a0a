//! Client-side synchronization for Parley: one messaging client per
//! connected identity, a live conversation list with derived metadata, and
//! the message history of the selected conversation.

pub mod conversations;
pub mod error;
pub mod feed;
pub mod generation;
pub mod lifecycle;
pub mod merge;
pub mod messages;
pub mod metadata;

#[cfg(test)]
pub(crate) mod testkit;

pub use conversations::{ConversationState, ConversationSync};
pub use error::{Result, SyncError};
pub use generation::LoadOutcome;
pub use lifecycle::{ClientManager, ClientObserver, ClientPhase, InitOutcome};
pub use messages::{MessageState, MessageSync};
pub use metadata::{ConversationMeta, MetadataResolver, MetadataState};
