//! Derived per-conversation display data: peer label, preview text and
//! time of the latest message.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use parley_shared::constants::UNKNOWN_PEER;
use parley_shared::error::TransportError;
use parley_shared::transport::{ConversationRef, MessageQuery};
use parley_shared::types::{ConversationId, InboxId};

use crate::conversations::ConversationState;
use crate::generation::Generation;
use crate::lifecycle::ClientPhase;

#[derive(Clone)]
pub struct ConversationMeta {
    pub conversation: ConversationRef,
    /// Account address of the first other member, or `Unknown`.
    pub peer: String,
    /// Text of the latest message; empty when there is none or it isn't text.
    pub last_message_text: String,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl ConversationMeta {
    /// Placeholder used when resolution fails.
    pub fn unresolved(conversation: ConversationRef) -> Self {
        Self {
            conversation,
            peer: UNKNOWN_PEER.to_string(),
            last_message_text: String::new(),
            last_message_at: None,
        }
    }

    pub fn id(&self) -> &ConversationId {
        self.conversation.id()
    }

    /// Case-insensitive substring match on peer or preview. A blank query
    /// matches everything; otherwise surrounding spaces are significant.
    pub fn matches(&self, query: &str) -> bool {
        if query.trim().is_empty() {
            return true;
        }
        let needle = query.to_lowercase();
        self.peer.to_lowercase().contains(&needle)
            || self.last_message_text.to_lowercase().contains(&needle)
    }
}

impl fmt::Debug for ConversationMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationMeta")
            .field("id", self.id())
            .field("peer", &self.peer)
            .field("last_message_text", &self.last_message_text)
            .field("last_message_at", &self.last_message_at)
            .finish()
    }
}

/// Resolve one conversation. The transport is synced before the latest
/// message is read.
pub async fn resolve_one(
    own_inbox: &InboxId,
    conversation: &ConversationRef,
) -> Result<ConversationMeta, TransportError> {
    let members = conversation.members().await?;
    let peer = members
        .iter()
        .find(|m| &m.inbox_id != own_inbox)
        .and_then(|m| m.account_identifiers.first())
        .map(|i| i.identifier.clone())
        .unwrap_or_else(|| UNKNOWN_PEER.to_string());

    conversation.sync().await?;
    let latest = conversation.messages(MessageQuery::latest(1)).await?;
    let last = latest.last();

    Ok(ConversationMeta {
        conversation: conversation.clone(),
        peer,
        last_message_text: last
            .and_then(|m| m.content.as_text())
            .unwrap_or_default()
            .to_string(),
        last_message_at: last.map(|m| m.sent_at),
    })
}

/// Resolve every conversation concurrently. A failing item falls back to
/// an `Unknown` placeholder instead of failing the batch.
pub async fn resolve_all(own_inbox: &InboxId, conversations: &[ConversationRef]) -> Vec<ConversationMeta> {
    let resolved = join_all(conversations.iter().map(|conversation| async move {
        match resolve_one(own_inbox, conversation).await {
            Ok(meta) => meta,
            Err(e) => {
                warn!(conversation = %conversation.id(), error = %e, "Failed to resolve conversation");
                ConversationMeta::unresolved(conversation.clone())
            }
        }
    }))
    .await;

    let mut metas = resolved;
    sort_by_recency(&mut metas);
    metas
}

/// Newest first. Conversations without messages go last.
pub fn sort_by_recency(metas: &mut [ConversationMeta]) {
    metas.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
}

pub fn filter_metas(metas: &[ConversationMeta], query: &str) -> Vec<ConversationMeta> {
    metas.iter().filter(|m| m.matches(query)).cloned().collect()
}

#[derive(Debug, Clone, Default)]
pub struct MetadataState {
    pub metas: Vec<ConversationMeta>,
    pub resolving: bool,
}

/// Recomputes metadata whenever the conversation list or client changes.
/// Only the newest run may publish.
#[derive(Clone)]
pub struct MetadataResolver {
    runs: Arc<Generation>,
    state: Arc<watch::Sender<MetadataState>>,
}

impl Default for MetadataResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataResolver {
    pub fn new() -> Self {
        let (state, _) = watch::channel(MetadataState::default());
        Self {
            runs: Arc::new(Generation::new()),
            state: Arc::new(state),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<MetadataState> {
        self.state.subscribe()
    }

    pub fn metas(&self) -> Vec<ConversationMeta> {
        self.state.borrow().metas.clone()
    }

    pub fn search(&self, query: &str) -> Vec<ConversationMeta> {
        filter_metas(&self.state.borrow().metas, query)
    }

    /// Run a resolution. Returns false when a newer run started meanwhile
    /// and this one was discarded.
    pub async fn refresh(&self, own_inbox: Option<InboxId>, conversations: Vec<ConversationRef>) -> bool {
        let run = self.runs.issue();
        let Some(own_inbox) = own_inbox else {
            self.state.send_replace(MetadataState::default());
            return true;
        };

        self.state.send_modify(|state| state.resolving = true);
        let metas = resolve_all(&own_inbox, &conversations).await;

        let runs = &self.runs;
        let published = self.state.send_if_modified(|state| {
            if !runs.is_current(run) {
                return false;
            }
            state.metas = metas;
            state.resolving = false;
            true
        });
        if published {
            debug!(run, count = conversations.len(), "Conversation metadata resolved");
        } else {
            debug!(run, "Discarded stale metadata run");
        }
        published
    }

    /// Follow `conversations` and `clients`, starting a fresh run on every
    /// new list or client. Ends when either sender goes away.
    pub fn drive(
        &self,
        mut conversations: watch::Receiver<ConversationState>,
        mut clients: watch::Receiver<ClientPhase>,
    ) -> JoinHandle<()> {
        let resolver = self.clone();
        tokio::spawn(async move {
            let mut last: Option<(Option<InboxId>, Vec<ConversationRef>)> = None;
            loop {
                let items = conversations.borrow_and_update().items.clone();
                let own = clients
                    .borrow_and_update()
                    .client()
                    .map(|c| c.inbox_id().clone());

                let unchanged = last.as_ref().is_some_and(|(prev_own, prev_items)| {
                    prev_own == &own
                        && prev_items.len() == items.len()
                        && prev_items.iter().zip(&items).all(|(a, b)| Arc::ptr_eq(a, b))
                });
                if !unchanged {
                    last = Some((own.clone(), items.clone()));
                    let resolver = resolver.clone();
                    tokio::spawn(async move {
                        resolver.refresh(own, items).await;
                    });
                }

                tokio::select! {
                    changed = conversations.changed() => if changed.is_err() { break },
                    changed = clients.changed() => if changed.is_err() { break },
                }
            }
            debug!("Metadata driver stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use parley_shared::types::ConversationKind;

    use crate::testkit::{at, inbox, membership, text, wait_for, FakeConversation, BOB, CAROL};

    fn me() -> InboxId {
        inbox("me")
    }

    fn peers(metas: &[ConversationMeta]) -> Vec<String> {
        metas.iter().map(|m| m.id().to_string()).collect()
    }

    #[tokio::test]
    async fn test_resolve_peer_and_latest_message() {
        let bob = inbox("bob");
        let c1 = FakeConversation::dm("c1", &me(), &bob, BOB).with_history(vec![
            text("m2", "c1", &bob, "second", 20),
            text("m1", "c1", &me(), "first", 10),
        ]);

        let meta = resolve_one(&me(), &c1.share()).await.unwrap();
        assert_eq!(meta.peer, BOB);
        assert_eq!(meta.last_message_text, "second");
        assert_eq!(meta.last_message_at, Some(at(20)));
        assert_eq!(c1.sync_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_text_latest_gives_empty_preview() {
        let bob = inbox("bob");
        let c1 = FakeConversation::dm("c1", &me(), &bob, BOB)
            .with_history(vec![membership("m1", "c1", &bob, 5)]);

        let meta = resolve_one(&me(), &c1.share()).await.unwrap();
        assert_eq!(meta.last_message_text, "");
        assert_eq!(meta.last_message_at, Some(at(5)));
    }

    #[tokio::test]
    async fn test_self_only_conversation_is_unknown() {
        let lonely = FakeConversation::new("g1", ConversationKind::Group, &me(), vec![]);
        let meta = resolve_one(&me(), &lonely.share()).await.unwrap();
        assert_eq!(meta.peer, UNKNOWN_PEER);
        assert!(meta.last_message_at.is_none());
    }

    #[tokio::test]
    async fn test_sorted_by_recency() {
        let bob = inbox("bob");
        let carol = inbox("carol");
        let c1 = FakeConversation::dm("c1", &me(), &bob, BOB)
            .with_history(vec![text("m1", "c1", &bob, "hi", 10)]);
        let c2 = FakeConversation::dm("c2", &me(), &carol, CAROL)
            .with_history(vec![text("m2", "c2", &carol, "yo", 20)]);
        let empty = FakeConversation::dm("c3", &me(), &carol, CAROL);

        let metas = resolve_all(&me(), &[empty.share(), c1.share(), c2.share()]).await;
        assert_eq!(peers(&metas), vec!["c2", "c1", "c3"]);
        assert!(metas.windows(2).all(|w| w[0].last_message_at >= w[1].last_message_at));
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let bob = inbox("bob");
        let good = FakeConversation::dm("good", &me(), &bob, BOB)
            .with_history(vec![text("m1", "good", &bob, "hi", 10)]);
        let broken = FakeConversation::dm("broken", &me(), &bob, BOB)
            .with_history(vec![text("m2", "broken", &bob, "newer", 50)]);
        broken.fail_members.store(true, Ordering::SeqCst);

        let metas = resolve_all(&me(), &[broken.share(), good.share()]).await;
        assert_eq!(peers(&metas), vec!["good", "broken"]);
        let fallback = &metas[1];
        assert_eq!(fallback.peer, UNKNOWN_PEER);
        assert_eq!(fallback.last_message_text, "");
        assert!(fallback.last_message_at.is_none());
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive() {
        let bob = inbox("bob");
        let carol = inbox("carol");
        let c1 = FakeConversation::dm("c1", &me(), &bob, BOB)
            .with_history(vec![text("m1", "c1", &bob, "Lunch tomorrow?", 10)]);
        let c2 = FakeConversation::dm("c2", &me(), &carol, CAROL)
            .with_history(vec![text("m2", "c2", &carol, "ok", 20)]);
        let metas = resolve_all(&me(), &[c1.share(), c2.share()]).await;

        assert_eq!(peers(&filter_metas(&metas, "LUNCH")), vec!["c1"]);
        assert_eq!(peers(&filter_metas(&metas, "ca401")), vec!["c2"]);
        assert_eq!(filter_metas(&metas, "  ").len(), 2);
        assert!(filter_metas(&metas, "nothing").is_empty());
        assert_eq!(peers(&filter_metas(&metas, "lunch ")), vec!["c1"]);
        assert!(filter_metas(&metas, "tomorrow ").is_empty());
    }

    #[tokio::test]
    async fn test_newer_run_discards_older() {
        let bob = inbox("bob");
        let c1 = FakeConversation::dm("c1", &me(), &bob, BOB)
            .with_history(vec![text("m1", "c1", &bob, "old", 10)]);
        let c2 = FakeConversation::dm("c2", &me(), &bob, BOB)
            .with_history(vec![text("m2", "c2", &bob, "new", 20)]);
        let resolver = MetadataResolver::new();

        let mut held = c1.message_gates.hold_next();
        let slow = tokio::spawn({
            let resolver = resolver.clone();
            let items = vec![c1.share()];
            async move { resolver.refresh(Some(me()), items).await }
        });
        held.entered().await;

        assert!(resolver.refresh(Some(me()), vec![c2.share()]).await);
        held.release();
        assert!(!slow.await.unwrap());
        assert_eq!(peers(&resolver.metas()), vec!["c2"]);
        assert!(!resolver.subscribe().borrow().resolving);
    }

    #[tokio::test]
    async fn test_no_client_clears() {
        let bob = inbox("bob");
        let c1 = FakeConversation::dm("c1", &me(), &bob, BOB);
        let resolver = MetadataResolver::new();
        resolver.refresh(Some(me()), vec![c1.share()]).await;
        assert_eq!(resolver.metas().len(), 1);

        resolver.refresh(None, vec![c1.share()]).await;
        assert!(resolver.metas().is_empty());
    }

    #[tokio::test]
    async fn test_driver_follows_conversation_list() {
        let bob = inbox("bob");
        let client = crate::testkit::FakeClient::new(me());
        let (phase_tx, phase_rx) = watch::channel(ClientPhase::Ready(client));
        let (list_tx, list_rx) = watch::channel(ConversationState::default());
        let resolver = MetadataResolver::new();
        let driver = resolver.drive(list_rx, phase_rx);

        let c1 = FakeConversation::dm("c1", &me(), &bob, BOB)
            .with_history(vec![text("m1", "c1", &bob, "hi", 10)]);
        list_tx.send_modify(|s| s.items = vec![c1.share()]);

        let mut rx = resolver.subscribe();
        let state = wait_for(&mut rx, |s| s.metas.len() == 1).await;
        assert_eq!(state.metas[0].last_message_text, "hi");

        drop(list_tx);
        drop(phase_tx);
        tokio::time::timeout(std::time::Duration::from_secs(1), driver)
            .await
            .unwrap()
            .unwrap();
    }
}
