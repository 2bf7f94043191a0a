//! Conversation list cache: bulk loads plus a live stream of new
//! conversations, both merged by id.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use parley_shared::error::TransportError;
use parley_shared::transport::{ClientRef, ConversationRef, ListOptions};
use parley_shared::types::{Address, Identifier};

use crate::error::{Result, SyncError};
use crate::feed::LiveFeed;
use crate::generation::{Generation, LoadOutcome};
use crate::lifecycle::ClientObserver;
use crate::merge::{dedupe, merge, Placement};

#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    /// Newest first for streamed arrivals; bulk loads keep transport order.
    pub items: Vec<ConversationRef>,
    pub loading: bool,
    pub error: Option<String>,
}

struct Inner {
    client: Mutex<Option<ClientRef>>,
    /// Bumped on every client bind and unbind.
    epochs: Generation,
    loads: Generation,
    state: watch::Sender<ConversationState>,
    feed: tokio::sync::Mutex<Option<LiveFeed>>,
}

impl Inner {
    fn client(&self) -> Option<ClientRef> {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_client(&self, client: Option<ClientRef>) {
        *self.client.lock().unwrap_or_else(PoisonError::into_inner) = client;
    }

    /// Prepend unless the id is already cached or the epoch moved on.
    fn prepend(&self, epoch: u64, conversation: ConversationRef) -> bool {
        let id = conversation.id().clone();
        let added = self.state.send_if_modified(|state| {
            self.epochs.is_current(epoch) && merge(&mut state.items, conversation, Placement::Front)
        });
        if added {
            debug!(conversation = %id, "Conversation added");
        }
        added
    }
}

/// Keeps the visible conversation list in sync for the current client.
#[derive(Clone)]
pub struct ConversationSync {
    inner: Arc<Inner>,
}

impl Default for ConversationSync {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationSync {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConversationState::default());
        Self {
            inner: Arc::new(Inner {
                client: Mutex::new(None),
                epochs: Generation::new(),
                loads: Generation::new(),
                state,
                feed: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversationState> {
        self.inner.state.subscribe()
    }

    pub fn state(&self) -> ConversationState {
        self.inner.state.borrow().clone()
    }

    pub fn items(&self) -> Vec<ConversationRef> {
        self.inner.state.borrow().items.clone()
    }

    /// Bind to `client`: reset the cache and open the live stream. The
    /// previous stream, if any, is closed first.
    pub async fn attach(&self, client: ClientRef) {
        let mut feed = self.inner.feed.lock().await;
        let epoch = self.inner.epochs.issue();
        if let Some(previous) = feed.take() {
            previous.close().await;
        }
        self.inner.set_client(Some(client.clone()));
        self.inner.state.send_replace(ConversationState::default());

        match client.stream_conversations().await {
            Ok(subscription) => {
                let weak: Weak<Inner> = Arc::downgrade(&self.inner);
                *feed = Some(LiveFeed::spawn(
                    "conversations",
                    subscription,
                    move |conversation| {
                        if let Some(inner) = weak.upgrade() {
                            inner.prepend(epoch, conversation);
                        }
                    },
                ));
                debug!("Conversation stream opened");
            }
            Err(e) => warn!(error = %e, "Could not open conversation stream"),
        }
    }

    /// Unbind: close the live stream and clear the cache.
    pub async fn detach(&self) {
        let mut feed = self.inner.feed.lock().await;
        self.inner.epochs.issue();
        if let Some(previous) = feed.take() {
            previous.close().await;
        }
        self.inner.set_client(None);
        self.inner.state.send_replace(ConversationState::default());
    }

    /// Sync with the network, then replace the cache with the visible list.
    ///
    /// Failures are published in the state, never raised. A response that
    /// completes after a newer load has been applied, or after the client
    /// changed, is dropped.
    pub async fn load(&self) -> LoadOutcome {
        let Some(client) = self.inner.client() else {
            return LoadOutcome::Skipped;
        };
        let epoch = self.inner.epochs.current();
        let ticket = self.inner.loads.issue();
        self.inner.state.send_modify(|state| {
            state.loading = true;
            state.error = None;
        });

        let result = fetch_visible(&client).await;

        let mut outcome = LoadOutcome::Stale;
        let inner = &self.inner;
        inner.state.send_if_modified(|state| {
            if !inner.epochs.is_current(epoch) || !inner.loads.try_commit(ticket) {
                return false;
            }
            match result {
                Ok(items) => {
                    state.items = dedupe(items);
                    state.error = None;
                    outcome = LoadOutcome::Applied;
                }
                Err(e) => {
                    error!(error = %e, "Failed to load conversations");
                    state.error = Some(e.to_string());
                    outcome = LoadOutcome::Failed;
                }
            }
            state.loading = !inner.loads.is_current(ticket);
            true
        });

        match outcome {
            LoadOutcome::Applied => {
                info!(count = self.inner.state.borrow().items.len(), "Conversations loaded")
            }
            LoadOutcome::Stale => debug!(ticket, "Dropped stale conversation list"),
            _ => {}
        }
        outcome
    }

    /// Open (or reuse) a DM with the account typed by the user.
    pub async fn start_conversation(&self, address: &str) -> Result<ConversationRef> {
        if address.trim().is_empty() {
            return Err(SyncError::MissingAddress);
        }
        let address = Address::parse(address)
            .map_err(|_| SyncError::InvalidAddress(address.trim().to_string()))?;
        let client = self.inner.client().ok_or(SyncError::NoClient)?;
        let epoch = self.inner.epochs.current();

        let identifier = Identifier::ethereum(&address);
        let reachable = client
            .can_message(std::slice::from_ref(&identifier))
            .await?;
        if !reachable.get(address.as_str()).copied().unwrap_or(false) {
            warn!(address = %address.short(), "Address is not reachable");
            return Err(SyncError::NotReachable(address.to_string()));
        }

        let conversation = client.create_dm(&identifier).await?;
        info!(
            conversation = %conversation.id(),
            peer = %address.short(),
            "Conversation started"
        );
        self.inner.prepend(epoch, conversation.clone());
        Ok(conversation)
    }
}

async fn fetch_visible(client: &ClientRef) -> std::result::Result<Vec<ConversationRef>, TransportError> {
    client.sync_conversations().await?;
    client.list_conversations(&ListOptions::visible()).await
}

#[async_trait]
impl ClientObserver for ConversationSync {
    async fn client_ready(&self, client: ClientRef) {
        self.attach(client).await;
        let this = self.clone();
        tokio::spawn(async move {
            this.load().await;
        });
    }

    async fn client_lost(&self) {
        self.detach().await;
    }
}
