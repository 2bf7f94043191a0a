//! Message cache for the selected conversation.
//!
//! Bulk loads replace the cache sorted oldest first; the live stream
//! appends in arrival order. Records are deduplicated by id across both
//! sources. Non-application records stay in the cache (so redeliveries are
//! still recognised) but are filtered out for display.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use parley_shared::error::TransportError;
use parley_shared::transport::{ClientRef, ConversationRef, MessageQuery};
use parley_shared::types::{ConversationId, MessageId, MessageRecord};

use crate::error::{Result, SyncError};
use crate::feed::LiveFeed;
use crate::generation::{Generation, LoadOutcome};
use crate::lifecycle::ClientObserver;
use crate::merge::{dedupe, merge, sort_chronological, Placement};

#[derive(Debug, Clone, Default)]
pub struct MessageState {
    pub conversation_id: Option<ConversationId>,
    pub messages: Vec<MessageRecord>,
    pub loading: bool,
    pub sending: bool,
    pub error: Option<String>,
}

impl MessageState {
    /// Records a conversation view should render.
    pub fn visible(&self) -> Vec<MessageRecord> {
        self.messages
            .iter()
            .filter(|m| m.is_displayable())
            .cloned()
            .collect()
    }
}

struct Inner {
    selected: Mutex<Option<ConversationRef>>,
    /// Bumped on every selection change.
    selections: Generation,
    loads: Generation,
    sends: AtomicUsize,
    state: watch::Sender<MessageState>,
    feed: tokio::sync::Mutex<Option<LiveFeed>>,
}

impl Inner {
    fn selected(&self) -> Option<(ConversationRef, u64)> {
        let selected = self.selected.lock().unwrap_or_else(PoisonError::into_inner);
        selected
            .clone()
            .map(|conversation| (conversation, self.selections.current()))
    }

    fn append(&self, epoch: u64, record: MessageRecord) {
        let id = record.id.clone();
        let added = self.state.send_if_modified(|state| {
            self.selections.is_current(epoch)
                && state.conversation_id.as_ref() == Some(&record.conversation_id)
                && merge(&mut state.messages, record, Placement::Back)
        });
        if added {
            debug!(message = %id, "Message received");
        }
    }

    /// Apply a fetched history unless the selection moved on or a newer
    /// fetch was already applied.
    fn commit(
        &self,
        epoch: u64,
        ticket: u64,
        result: std::result::Result<Vec<MessageRecord>, TransportError>,
    ) -> LoadOutcome {
        let mut outcome = LoadOutcome::Stale;
        self.state.send_if_modified(|state| {
            if !self.selections.is_current(epoch) || !self.loads.try_commit(ticket) {
                return false;
            }
            match result {
                Ok(messages) => {
                    state.messages = messages;
                    state.error = None;
                    outcome = LoadOutcome::Applied;
                }
                Err(e) => {
                    error!(error = %e, "Failed to load messages");
                    state.error = Some(e.to_string());
                    outcome = LoadOutcome::Failed;
                }
            }
            state.loading = !self.loads.is_current(ticket);
            true
        });
        outcome
    }
}

/// Clears `sending` when the last in-flight send finishes, however it ends.
struct SendingGuard {
    inner: Arc<Inner>,
    epoch: u64,
}

impl SendingGuard {
    fn engage(inner: &Arc<Inner>, epoch: u64) -> Self {
        inner.sends.fetch_add(1, Ordering::SeqCst);
        inner.state.send_if_modified(|state| {
            let changed = !state.sending;
            state.sending = true;
            changed
        });
        Self {
            inner: inner.clone(),
            epoch,
        }
    }
}

impl Drop for SendingGuard {
    fn drop(&mut self) {
        let remaining = self.inner.sends.fetch_sub(1, Ordering::SeqCst) - 1;
        let inner = &self.inner;
        inner.state.send_if_modified(|state| {
            if remaining > 0 || !inner.selections.is_current(self.epoch) || !state.sending {
                return false;
            }
            state.sending = false;
            true
        });
    }
}

#[derive(Clone)]
pub struct MessageSync {
    inner: Arc<Inner>,
}

impl Default for MessageSync {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageSync {
    pub fn new() -> Self {
        let (state, _) = watch::channel(MessageState::default());
        Self {
            inner: Arc::new(Inner {
                selected: Mutex::new(None),
                selections: Generation::new(),
                loads: Generation::new(),
                sends: AtomicUsize::new(0),
                state,
                feed: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<MessageState> {
        self.inner.state.subscribe()
    }

    pub fn state(&self) -> MessageState {
        self.inner.state.borrow().clone()
    }

    pub fn selected(&self) -> Option<ConversationRef> {
        self.inner.selected().map(|(conversation, _)| conversation)
    }

    pub fn visible_messages(&self) -> Vec<MessageRecord> {
        self.inner.state.borrow().visible()
    }

    /// Switch to `conversation` (or to nothing). The previous live stream
    /// is fully closed before the next one opens; the new history is then
    /// loaded. Selecting the current conversation again does nothing.
    pub async fn select(&self, conversation: Option<ConversationRef>) {
        let epoch = {
            let mut selected = self.inner.selected.lock().unwrap_or_else(PoisonError::into_inner);
            let same = match (selected.as_ref(), conversation.as_ref()) {
                (Some(a), Some(b)) => a.id() == b.id(),
                (None, None) => true,
                _ => false,
            };
            if same {
                return;
            }
            *selected = conversation.clone();
            let epoch = self.inner.selections.issue();
            // Reset under the lock so concurrent selects publish in selection order.
            self.inner.state.send_replace(MessageState {
                conversation_id: conversation.as_ref().map(|c| c.id().clone()),
                loading: conversation.is_some(),
                ..MessageState::default()
            });
            epoch
        };

        debug!(
            conversation = ?conversation.as_ref().map(|c| c.id().to_string()),
            "Conversation selected"
        );

        {
            let mut feed = self.inner.feed.lock().await;
            if let Some(previous) = feed.take() {
                previous.close().await;
            }
            let Some(conversation) = conversation else {
                return;
            };
            if !self.inner.selections.is_current(epoch) {
                return;
            }

            match conversation.stream().await {
                Ok(subscription) => {
                    if !self.inner.selections.is_current(epoch) {
                        if let Err(e) = subscription.handle().end().await {
                            warn!(error = %e, "Failed to end superseded message stream");
                        }
                        return;
                    }
                    let weak: Weak<Inner> = Arc::downgrade(&self.inner);
                    *feed = Some(LiveFeed::spawn("messages", subscription, move |record| {
                        if let Some(inner) = weak.upgrade() {
                            inner.append(epoch, record);
                        }
                    }));
                }
                Err(e) => warn!(conversation = %conversation.id(), error = %e, "Could not open message stream"),
            }
        }

        self.load().await;
    }

    /// Sync the selected conversation and replace the cache with its full
    /// history, sorted oldest first.
    pub async fn load(&self) -> LoadOutcome {
        let Some((conversation, epoch)) = self.inner.selected() else {
            return LoadOutcome::Skipped;
        };
        let ticket = self.inner.loads.issue();
        let inner = &self.inner;
        inner.state.send_if_modified(|state| {
            if !inner.selections.is_current(epoch) {
                return false;
            }
            state.loading = true;
            state.error = None;
            true
        });

        let result = fetch_history(&conversation).await;
        let outcome = self.inner.commit(epoch, ticket, result);
        match outcome {
            LoadOutcome::Applied => debug!(
                conversation = %conversation.id(),
                count = self.inner.state.borrow().messages.len(),
                "Messages loaded"
            ),
            LoadOutcome::Stale => debug!(ticket, "Dropped stale message history"),
            _ => {}
        }
        outcome
    }

    /// Send `text` to the selected conversation, then reconcile the cache
    /// with the transport. Errors are returned to the caller after being
    /// logged; `sending` is cleared in every case.
    pub async fn send(&self, text: &str) -> Result<MessageId> {
        let body = text.trim();
        if body.is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        let (conversation, epoch) = self.inner.selected().ok_or(SyncError::NoConversation)?;
        let _sending = SendingGuard::engage(&self.inner, epoch);

        let id = conversation.send_text(body).await.map_err(|e| {
            error!(conversation = %conversation.id(), error = %e, "Failed to send message");
            SyncError::from(e)
        })?;

        let ticket = self.inner.loads.issue();
        match fetch_history(&conversation).await {
            Ok(messages) => {
                self.inner.commit(epoch, ticket, Ok(messages));
            }
            Err(e) => {
                error!(conversation = %conversation.id(), error = %e, "Failed to refresh after send");
                self.inner.commit(epoch, ticket, Err(e.clone()));
                return Err(e.into());
            }
        }

        info!(conversation = %conversation.id(), message = %id, "Message sent");
        Ok(id)
    }
}

async fn fetch_history(
    conversation: &ConversationRef,
) -> std::result::Result<Vec<MessageRecord>, TransportError> {
    conversation.sync().await?;
    let mut messages = conversation.messages(MessageQuery::all()).await?;
    sort_chronological(&mut messages);
    Ok(dedupe(messages))
}

#[async_trait]
impl ClientObserver for MessageSync {
    async fn client_ready(&self, _client: ClientRef) {}

    async fn client_lost(&self) {
        self.select(None).await;
    }
}
