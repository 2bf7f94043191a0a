//! Contract of the secure-messaging transport.
//!
//! The transport owns encryption, network sync, consent and its own store.
//! Everything above it (the synchronizers in `parley-sync`) only talks to
//! these traits, so any backend that implements them can be plugged in.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};

use crate::error::TransportError;
use crate::identity::MessagingSigner;
use crate::types::{
    ConsentState, ConversationId, ConversationKind, Environment, Identifier, InboxId, Member,
    MessageId, MessageRecord,
};

pub type ClientRef = Arc<dyn MessagingClient>;
pub type ConversationRef = Arc<dyn Conversation>;

/// Options fixed at client construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub env: Environment,
    pub app_version: String,
}

/// Filter for bulk conversation listing. An empty allow-list admits everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub consent_states: Vec<ConsentState>,
}

impl ListOptions {
    /// Accepted and undecided conversations; denied ones stay hidden.
    pub fn visible() -> Self {
        Self {
            consent_states: vec![ConsentState::Allowed, ConsentState::Unknown],
        }
    }

    pub fn admits(&self, state: ConsentState) -> bool {
        self.consent_states.is_empty() || self.consent_states.contains(&state)
    }
}

/// Message fetch parameters. Results are always ordered oldest first; a
/// limit keeps the newest `n` records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageQuery {
    pub limit: Option<usize>,
}

impl MessageQuery {
    pub fn all() -> Self {
        Self { limit: None }
    }

    pub fn latest(n: usize) -> Self {
        Self { limit: Some(n) }
    }
}

/// Terminates a live subscription on the transport side.
#[async_trait]
pub trait StreamHandle: Send + Sync {
    async fn end(&self) -> Result<(), TransportError>;
}

/// A long-lived, possibly infinite sequence of newly arrived items.
pub struct Subscription<T> {
    items: BoxStream<'static, Result<T, TransportError>>,
    handle: Arc<dyn StreamHandle>,
}

impl<T> Subscription<T> {
    pub fn new(
        items: BoxStream<'static, Result<T, TransportError>>,
        handle: Arc<dyn StreamHandle>,
    ) -> Self {
        Self { items, handle }
    }

    pub fn handle(&self) -> Arc<dyn StreamHandle> {
        self.handle.clone()
    }

    pub async fn end(&self) -> Result<(), TransportError> {
        self.handle.end().await
    }
}

impl<T> Stream for Subscription<T> {
    type Item = Result<T, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.items.poll_next_unpin(cx)
    }
}

/// Entry point of a transport: builds clients and answers reachability
/// queries without a client.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn create(
        &self,
        signer: MessagingSigner,
        options: ClientOptions,
    ) -> Result<ClientRef, TransportError>;

    async fn can_message(
        &self,
        identifiers: &[Identifier],
        env: Environment,
    ) -> Result<HashMap<String, bool>, TransportError>;
}

/// An authenticated handle bound to one identity.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Stable member identifier of the local user.
    fn inbox_id(&self) -> &InboxId;

    async fn can_message(
        &self,
        identifiers: &[Identifier],
    ) -> Result<HashMap<String, bool>, TransportError>;

    async fn sync_conversations(&self) -> Result<(), TransportError>;

    async fn list_conversations(
        &self,
        options: &ListOptions,
    ) -> Result<Vec<ConversationRef>, TransportError>;

    async fn stream_conversations(&self) -> Result<Subscription<ConversationRef>, TransportError>;

    async fn create_dm(&self, identifier: &Identifier) -> Result<ConversationRef, TransportError>;

    /// Release network resources. Open subscriptions stop delivering.
    async fn close(&self);
}

/// A direct or group conversation.
#[async_trait]
pub trait Conversation: Send + Sync {
    fn id(&self) -> &ConversationId;

    fn kind(&self) -> ConversationKind;

    async fn members(&self) -> Result<Vec<Member>, TransportError>;

    async fn sync(&self) -> Result<(), TransportError>;

    async fn messages(&self, query: MessageQuery) -> Result<Vec<MessageRecord>, TransportError>;

    async fn send_text(&self, text: &str) -> Result<MessageId, TransportError>;

    async fn stream(&self) -> Result<Subscription<MessageRecord>, TransportError>;
}

impl fmt::Debug for dyn Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conversation")
            .field("id", self.id())
            .field("kind", &self.kind())
            .finish()
    }
}

impl fmt::Debug for dyn MessagingClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagingClient")
            .field("inbox_id", self.inbox_id())
            .finish()
    }
}
