//! In-process network actor with tokio mpsc command/reply pattern.
//!
//! The network state lives in a dedicated tokio task. Clients talk to it
//! through typed commands carrying `oneshot` reply channels, and receive
//! live deliveries on per-subscription mpsc channels, so the loopback
//! backend behaves like a remote service: every call is asynchronous and
//! completions are unordered relative to each other.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_shared::constants::DEFAULT_STREAM_BUFFER;
use parley_shared::error::TransportError;
use parley_shared::transport::{ListOptions, MessageQuery};
use parley_shared::types::{
    ConsentState, ConversationId, ConversationKind, Environment, Identifier, InboxId, Member,
    MessageContent, MessageId, MessageKind, MessageRecord,
};

use crate::registry::InboxRegistry;

pub type Reply<T> = oneshot::Sender<Result<T, TransportError>>;

// ---------------------------------------------------------------------------
// Command / delivery types
// ---------------------------------------------------------------------------

/// Minimal description of a conversation handed to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSnapshot {
    pub id: ConversationId,
    pub kind: ConversationKind,
}

/// Result of a successful client registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub inbox_id: InboxId,
    /// Identifies this client instance; subscriptions are owned per session.
    pub session: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionTarget {
    /// New conversations the inbox becomes a member of.
    Conversations,
    /// New messages in one conversation.
    Messages(ConversationId),
}

/// An item pushed to a live subscription.
#[derive(Debug, Clone)]
pub enum Delivery {
    Conversation(ConversationSnapshot),
    Message(MessageRecord),
}

/// Counters exposed for diagnostics and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub inboxes: usize,
    pub conversations: usize,
    pub messages: usize,
    pub subscriptions: usize,
    pub registrations: u64,
    pub conversation_syncs: u64,
}

/// Commands sent *into* the network task.
#[derive(Debug)]
pub enum NetworkCommand {
    Register {
        identifier: Identifier,
        signature: Vec<u8>,
        env: Environment,
        reply: Reply<Registration>,
    },
    /// Register an inbox without opening a client session.
    RegisterInbox {
        identifier: Identifier,
        reply: oneshot::Sender<InboxId>,
    },
    CanMessage {
        identifiers: Vec<Identifier>,
        reply: oneshot::Sender<HashMap<String, bool>>,
    },
    CreateDm {
        inbox: InboxId,
        peer: Identifier,
        reply: Reply<ConversationSnapshot>,
    },
    CreateGroup {
        inbox: InboxId,
        peers: Vec<Identifier>,
        reply: Reply<ConversationSnapshot>,
    },
    SyncConversations {
        inbox: InboxId,
        reply: oneshot::Sender<()>,
    },
    ListConversations {
        inbox: InboxId,
        options: ListOptions,
        reply: oneshot::Sender<Vec<ConversationSnapshot>>,
    },
    SyncConversation {
        inbox: InboxId,
        conversation: ConversationId,
        reply: Reply<()>,
    },
    Members {
        inbox: InboxId,
        conversation: ConversationId,
        reply: Reply<Vec<Member>>,
    },
    Messages {
        inbox: InboxId,
        conversation: ConversationId,
        query: MessageQuery,
        reply: Reply<Vec<MessageRecord>>,
    },
    SendText {
        inbox: InboxId,
        conversation: ConversationId,
        text: String,
        reply: Reply<MessageId>,
    },
    /// Append a record with full control over its fields.
    Inject {
        inbox: InboxId,
        conversation: ConversationId,
        content: MessageContent,
        kind: MessageKind,
        sent_at: Option<DateTime<Utc>>,
        reply: Reply<MessageId>,
    },
    SetConsent {
        inbox: InboxId,
        conversation: ConversationId,
        state: ConsentState,
        reply: Reply<()>,
    },
    Subscribe {
        session: u64,
        inbox: InboxId,
        target: SubscriptionTarget,
        reply: Reply<(u64, mpsc::Receiver<Delivery>)>,
    },
    Unsubscribe {
        id: u64,
        reply: oneshot::Sender<bool>,
    },
    /// End every subscription owned by a client session.
    CloseSession {
        session: u64,
        reply: oneshot::Sender<usize>,
    },
    Stats {
        reply: oneshot::Sender<NetworkStats>,
    },
    Shutdown,
}

/// Configuration for spawning the network.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Environment clients must be constructed for.
    pub env: Environment,
    /// Capacity of each subscription channel. A full channel drops deliveries.
    pub stream_buffer: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            env: Environment::Local,
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }
}

// ---------------------------------------------------------------------------
// Actor state
// ---------------------------------------------------------------------------

struct ConversationEntry {
    kind: ConversationKind,
    members: Vec<InboxId>,
    consent: HashMap<InboxId, ConsentState>,
    /// Ordered by `sent_at`, oldest first.
    messages: Vec<MessageRecord>,
}

impl ConversationEntry {
    fn is_member(&self, inbox: &InboxId) -> bool {
        self.members.contains(inbox)
    }

    fn insert(&mut self, record: MessageRecord) {
        let at = self
            .messages
            .partition_point(|m| m.sent_at <= record.sent_at);
        self.messages.insert(at, record);
    }
}

struct SubscriptionEntry {
    session: u64,
    inbox: InboxId,
    target: SubscriptionTarget,
    tx: mpsc::Sender<Delivery>,
}

/// Strictly increasing timestamps seeded from wall time.
#[derive(Default)]
struct LogicalClock {
    last: Option<DateTime<Utc>>,
}

impl LogicalClock {
    fn next(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.last {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last = Some(next);
        next
    }

    fn observe(&mut self, at: DateTime<Utc>) {
        if self.last.map_or(true, |last| at > last) {
            self.last = Some(at);
        }
    }
}

struct NetworkState {
    config: NetworkConfig,
    registry: InboxRegistry,
    conversations: HashMap<ConversationId, ConversationEntry>,
    /// Creation order, used for listing.
    order: Vec<ConversationId>,
    subscriptions: HashMap<u64, SubscriptionEntry>,
    next_subscription: u64,
    next_session: u64,
    clock: LogicalClock,
    stats: NetworkStats,
}

impl NetworkState {
    fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            registry: InboxRegistry::new(),
            conversations: HashMap::new(),
            order: Vec::new(),
            subscriptions: HashMap::new(),
            next_subscription: 1,
            next_session: 1,
            clock: LogicalClock::default(),
            stats: NetworkStats::default(),
        }
    }

    fn handle(&mut self, cmd: NetworkCommand) {
        match cmd {
            NetworkCommand::Register {
                identifier,
                signature,
                env,
                reply,
            } => {
                let _ = reply.send(self.register(identifier, signature, env));
            }
            NetworkCommand::RegisterInbox { identifier, reply } => {
                let _ = reply.send(self.registry.register(&identifier));
            }
            NetworkCommand::CanMessage { identifiers, reply } => {
                let result = identifiers
                    .into_iter()
                    .map(|id| {
                        let reachable = self.registry.is_registered(&id.identifier);
                        (id.identifier, reachable)
                    })
                    .collect();
                let _ = reply.send(result);
            }
            NetworkCommand::CreateDm { inbox, peer, reply } => {
                let _ = reply.send(self.create_dm(inbox, &peer));
            }
            NetworkCommand::CreateGroup {
                inbox,
                peers,
                reply,
            } => {
                let _ = reply.send(self.create_group(inbox, &peers));
            }
            NetworkCommand::SyncConversations { inbox, reply } => {
                debug!(inbox = %inbox.short(), "Conversation list sync");
                let _ = reply.send(());
            }
            NetworkCommand::ListConversations {
                inbox,
                options,
                reply,
            } => {
                let _ = reply.send(self.list(&inbox, &options));
            }
            NetworkCommand::SyncConversation {
                inbox,
                conversation,
                reply,
            } => {
                let result = self.member_entry(&inbox, &conversation).map(|_| ());
                if result.is_ok() {
                    self.stats.conversation_syncs += 1;
                }
                let _ = reply.send(result);
            }
            NetworkCommand::Members {
                inbox,
                conversation,
                reply,
            } => {
                let result = self.member_entry(&inbox, &conversation).map(|entry| {
                    entry
                        .members
                        .iter()
                        .filter_map(|m| self.registry.member(m))
                        .collect()
                });
                let _ = reply.send(result);
            }
            NetworkCommand::Messages {
                inbox,
                conversation,
                query,
                reply,
            } => {
                let result = self.member_entry(&inbox, &conversation).map(|entry| {
                    let skip = query
                        .limit
                        .map(|n| entry.messages.len().saturating_sub(n))
                        .unwrap_or(0);
                    entry.messages[skip..].to_vec()
                });
                let _ = reply.send(result);
            }
            NetworkCommand::SendText {
                inbox,
                conversation,
                text,
                reply,
            } => {
                let result = self.append(
                    inbox,
                    conversation,
                    MessageContent::Text(text),
                    MessageKind::Application,
                    None,
                );
                let _ = reply.send(result);
            }
            NetworkCommand::Inject {
                inbox,
                conversation,
                content,
                kind,
                sent_at,
                reply,
            } => {
                let _ = reply.send(self.append(inbox, conversation, content, kind, sent_at));
            }
            NetworkCommand::SetConsent {
                inbox,
                conversation,
                state,
                reply,
            } => {
                let result = match self.conversations.get_mut(&conversation) {
                    Some(entry) if entry.is_member(&inbox) => {
                        entry.consent.insert(inbox, state);
                        Ok(())
                    }
                    _ => Err(TransportError::ConversationNotFound(conversation.0)),
                };
                let _ = reply.send(result);
            }
            NetworkCommand::Subscribe {
                session,
                inbox,
                target,
                reply,
            } => {
                let _ = reply.send(self.subscribe(session, inbox, target));
            }
            NetworkCommand::Unsubscribe { id, reply } => {
                let removed = self.subscriptions.remove(&id).is_some();
                if removed {
                    debug!(subscription = id, "Subscription ended");
                }
                let _ = reply.send(removed);
            }
            NetworkCommand::CloseSession { session, reply } => {
                let before = self.subscriptions.len();
                self.subscriptions.retain(|_, sub| sub.session != session);
                let ended = before - self.subscriptions.len();
                info!(session, ended, "Client session closed");
                let _ = reply.send(ended);
            }
            NetworkCommand::Stats { reply } => {
                let mut stats = self.stats.clone();
                stats.inboxes = self.registry.inbox_count();
                stats.conversations = self.conversations.len();
                stats.messages = self.conversations.values().map(|c| c.messages.len()).sum();
                stats.subscriptions = self.subscriptions.len();
                let _ = reply.send(stats);
            }
            NetworkCommand::Shutdown => {}
        }
    }

    fn register(
        &mut self,
        identifier: Identifier,
        signature: Vec<u8>,
        env: Environment,
    ) -> Result<Registration, TransportError> {
        if env != self.config.env {
            return Err(TransportError::EnvironmentMismatch {
                expected: self.config.env.to_string(),
                actual: env.to_string(),
            });
        }
        if signature.is_empty() {
            return Err(TransportError::Signature("empty registration signature".into()));
        }

        let inbox_id = self.registry.register(&identifier);
        let session = self.next_session;
        self.next_session += 1;
        self.stats.registrations += 1;

        info!(inbox = %inbox_id.short(), session, "Client registered");
        Ok(Registration { inbox_id, session })
    }

    fn resolve_peer(&self, peer: &Identifier) -> Result<InboxId, TransportError> {
        self.registry
            .lookup(&peer.identifier)
            .cloned()
            .ok_or_else(|| TransportError::InboxNotFound(peer.identifier.clone()))
    }

    fn create_dm(
        &mut self,
        inbox: InboxId,
        peer: &Identifier,
    ) -> Result<ConversationSnapshot, TransportError> {
        let peer_inbox = self.resolve_peer(peer)?;
        if peer_inbox == inbox {
            return Err(TransportError::Rejected(
                "cannot open a direct conversation with yourself".into(),
            ));
        }

        // A DM between two inboxes is unique.
        let existing = self.order.iter().find(|id| {
            self.conversations.get(*id).is_some_and(|c| {
                c.kind == ConversationKind::Dm
                    && c.is_member(&inbox)
                    && c.is_member(&peer_inbox)
            })
        });
        if let Some(id) = existing {
            return Ok(ConversationSnapshot {
                id: id.clone(),
                kind: ConversationKind::Dm,
            });
        }

        Ok(self.open(ConversationKind::Dm, inbox, vec![peer_inbox]))
    }

    fn create_group(
        &mut self,
        inbox: InboxId,
        peers: &[Identifier],
    ) -> Result<ConversationSnapshot, TransportError> {
        let mut others = Vec::with_capacity(peers.len());
        for peer in peers {
            let peer_inbox = self.resolve_peer(peer)?;
            if peer_inbox != inbox && !others.contains(&peer_inbox) {
                others.push(peer_inbox);
            }
        }
        if others.is_empty() {
            return Err(TransportError::Rejected(
                "a group needs at least one other member".into(),
            ));
        }
        Ok(self.open(ConversationKind::Group, inbox, others))
    }

    fn open(
        &mut self,
        kind: ConversationKind,
        creator: InboxId,
        others: Vec<InboxId>,
    ) -> ConversationSnapshot {
        let id = ConversationId(Uuid::new_v4().to_string());

        let mut consent = HashMap::new();
        consent.insert(creator.clone(), ConsentState::Allowed);
        for other in &others {
            consent.insert(other.clone(), ConsentState::Unknown);
        }

        let mut members = vec![creator];
        members.extend(others);

        let snapshot = ConversationSnapshot {
            id: id.clone(),
            kind,
        };

        info!(conversation = %id, kind = ?kind, members = members.len(), "Conversation created");

        self.conversations.insert(
            id.clone(),
            ConversationEntry {
                kind,
                members: members.clone(),
                consent,
                messages: Vec::new(),
            },
        );
        self.order.push(id);

        self.deliver(
            |sub| sub.target == SubscriptionTarget::Conversations && members.contains(&sub.inbox),
            Delivery::Conversation(snapshot.clone()),
        );
        snapshot
    }

    fn list(&self, inbox: &InboxId, options: &ListOptions) -> Vec<ConversationSnapshot> {
        self.order
            .iter()
            .filter_map(|id| {
                let entry = self.conversations.get(id)?;
                if !entry.is_member(inbox) {
                    return None;
                }
                let state = entry
                    .consent
                    .get(inbox)
                    .copied()
                    .unwrap_or(ConsentState::Unknown);
                options.admits(state).then(|| ConversationSnapshot {
                    id: id.clone(),
                    kind: entry.kind,
                })
            })
            .collect()
    }

    fn member_entry(
        &self,
        inbox: &InboxId,
        conversation: &ConversationId,
    ) -> Result<&ConversationEntry, TransportError> {
        self.conversations
            .get(conversation)
            .filter(|entry| entry.is_member(inbox))
            .ok_or_else(|| TransportError::ConversationNotFound(conversation.0.clone()))
    }

    fn append(
        &mut self,
        inbox: InboxId,
        conversation: ConversationId,
        content: MessageContent,
        kind: MessageKind,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<MessageId, TransportError> {
        self.member_entry(&inbox, &conversation)?;

        let sent_at = match sent_at {
            Some(at) => {
                self.clock.observe(at);
                at
            }
            None => self.clock.next(),
        };
        let record = MessageRecord {
            id: MessageId(Uuid::new_v4().to_string()),
            conversation_id: conversation.clone(),
            sender_inbox_id: inbox.clone(),
            content,
            sent_at,
            kind,
        };
        let id = record.id.clone();

        if let Some(entry) = self.conversations.get_mut(&conversation) {
            // Speaking in a conversation accepts it.
            if kind == MessageKind::Application {
                entry.consent.insert(inbox, ConsentState::Allowed);
            }
            entry.insert(record.clone());
        }

        debug!(conversation = %conversation, message = %id, "Message appended");

        let target = SubscriptionTarget::Messages(conversation);
        self.deliver(|sub| sub.target == target, Delivery::Message(record));
        Ok(id)
    }

    fn subscribe(
        &mut self,
        session: u64,
        inbox: InboxId,
        target: SubscriptionTarget,
    ) -> Result<(u64, mpsc::Receiver<Delivery>), TransportError> {
        if let SubscriptionTarget::Messages(ref conversation) = target {
            self.member_entry(&inbox, conversation)?;
        }

        let id = self.next_subscription;
        self.next_subscription += 1;

        let (tx, rx) = mpsc::channel(self.config.stream_buffer.max(1));
        debug!(subscription = id, session, target = ?target, "Subscription opened");
        self.subscriptions.insert(
            id,
            SubscriptionEntry {
                session,
                inbox,
                target,
                tx,
            },
        );
        Ok((id, rx))
    }

    /// Push `delivery` to every matching subscription. Closed receivers are
    /// pruned; full ones drop the item, live streams are not gap-free.
    fn deliver<F>(&mut self, matches: F, delivery: Delivery)
    where
        F: Fn(&SubscriptionEntry) -> bool,
    {
        let mut closed = Vec::new();
        for (id, sub) in self.subscriptions.iter() {
            if !matches(sub) {
                continue;
            }
            match sub.tx.try_send(delivery.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(subscription = id, "Subscriber lagging, delivery dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
            }
        }
        for id in closed {
            self.subscriptions.remove(&id);
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to a running loopback network.
#[derive(Clone)]
pub struct LoopbackNetwork {
    cmd_tx: mpsc::Sender<NetworkCommand>,
    env: Environment,
}

/// Spawn the network task. Must be called from within a tokio runtime.
pub fn spawn_network(config: NetworkConfig) -> LoopbackNetwork {
    let env = config.env;
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<NetworkCommand>(256);

    tokio::spawn(async move {
        let mut state = NetworkState::new(config);
        info!(env = %state.config.env, "Loopback network started");

        while let Some(cmd) = cmd_rx.recv().await {
            if matches!(cmd, NetworkCommand::Shutdown) {
                info!("Loopback network shutdown requested");
                break;
            }
            state.handle(cmd);
        }

        info!("Loopback network terminated");
    });

    LoopbackNetwork { cmd_tx, env }
}

/// Send a command and wait for its reply.
pub(crate) async fn request<T>(
    cmd_tx: &mpsc::Sender<NetworkCommand>,
    build: impl FnOnce(oneshot::Sender<T>) -> NetworkCommand,
) -> Result<T, TransportError> {
    let (tx, rx) = oneshot::channel();
    cmd_tx
        .send(build(tx))
        .await
        .map_err(|_| TransportError::Network("loopback network stopped".into()))?;
    rx.await
        .map_err(|_| TransportError::Network("loopback network dropped the request".into()))
}

impl LoopbackNetwork {
    pub fn env(&self) -> Environment {
        self.env
    }

    pub(crate) fn sender(&self) -> mpsc::Sender<NetworkCommand> {
        self.cmd_tx.clone()
    }

    /// Register an inbox for `identifier` without a client, as if the peer
    /// had initialized messaging on another device.
    pub async fn register(&self, identifier: &Identifier) -> Result<InboxId, TransportError> {
        let identifier = identifier.clone();
        request(&self.cmd_tx, |reply| NetworkCommand::RegisterInbox {
            identifier,
            reply,
        })
        .await
    }

    pub async fn create_dm(
        &self,
        inbox: &InboxId,
        peer: &Identifier,
    ) -> Result<ConversationSnapshot, TransportError> {
        let (inbox, peer) = (inbox.clone(), peer.clone());
        request(&self.cmd_tx, |reply| NetworkCommand::CreateDm { inbox, peer, reply }).await?
    }

    pub async fn create_group(
        &self,
        inbox: &InboxId,
        peers: &[Identifier],
    ) -> Result<ConversationSnapshot, TransportError> {
        let (inbox, peers) = (inbox.clone(), peers.to_vec());
        request(&self.cmd_tx, |reply| NetworkCommand::CreateGroup {
            inbox,
            peers,
            reply,
        })
        .await?
    }

    /// Send a text message as `inbox`, optionally pinning its timestamp.
    pub async fn send_text(
        &self,
        inbox: &InboxId,
        conversation: &ConversationId,
        text: &str,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<MessageId, TransportError> {
        self.inject(
            inbox,
            conversation,
            MessageContent::Text(text.to_string()),
            MessageKind::Application,
            sent_at,
        )
        .await
    }

    pub async fn inject(
        &self,
        inbox: &InboxId,
        conversation: &ConversationId,
        content: MessageContent,
        kind: MessageKind,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<MessageId, TransportError> {
        let (inbox, conversation) = (inbox.clone(), conversation.clone());
        request(&self.cmd_tx, |reply| NetworkCommand::Inject {
            inbox,
            conversation,
            content,
            kind,
            sent_at,
            reply,
        })
        .await?
    }

    pub async fn set_consent(
        &self,
        inbox: &InboxId,
        conversation: &ConversationId,
        state: ConsentState,
    ) -> Result<(), TransportError> {
        let (inbox, conversation) = (inbox.clone(), conversation.clone());
        request(&self.cmd_tx, |reply| NetworkCommand::SetConsent {
            inbox,
            conversation,
            state,
            reply,
        })
        .await?
    }

    pub async fn stats(&self) -> Result<NetworkStats, TransportError> {
        request(&self.cmd_tx, |reply| NetworkCommand::Stats { reply }).await
    }

    pub async fn shutdown(&self) {
        if self.cmd_tx.send(NetworkCommand::Shutdown).await.is_err() {
            debug!("Loopback network already stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::types::IdentifierKind;

    fn ident(s: &str) -> Identifier {
        Identifier {
            identifier: s.to_string(),
            kind: IdentifierKind::Ethereum,
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_logical_clock_is_strictly_increasing() {
        let mut clock = LogicalClock::default();
        let a = clock.next();
        let b = clock.next();
        assert!(b > a);

        let future = Utc::now() + Duration::days(1);
        clock.observe(future);
        assert!(clock.next() > future);
    }

    #[tokio::test]
    async fn test_dm_is_unique_per_pair() {
        let net = spawn_network(NetworkConfig::default());
        let a = net.register(&ident("0xaa")).await.unwrap();
        net.register(&ident("0xbb")).await.unwrap();

        let first = net.create_dm(&a, &ident("0xbb")).await.unwrap();
        let second = net.create_dm(&a, &ident("0xbb")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(net.stats().await.unwrap().conversations, 1);
    }

    #[tokio::test]
    async fn test_dm_with_unregistered_peer_fails() {
        let net = spawn_network(NetworkConfig::default());
        let a = net.register(&ident("0xaa")).await.unwrap();
        assert_eq!(
            net.create_dm(&a, &ident("0xcc")).await,
            Err(TransportError::InboxNotFound("0xcc".into()))
        );
    }

    #[tokio::test]
    async fn test_injected_messages_are_kept_in_time_order() {
        let net = spawn_network(NetworkConfig::default());
        let a = net.register(&ident("0xaa")).await.unwrap();
        net.register(&ident("0xbb")).await.unwrap();
        let dm = net.create_dm(&a, &ident("0xbb")).await.unwrap();

        net.send_text(&a, &dm.id, "late", Some(at(200))).await.unwrap();
        net.send_text(&a, &dm.id, "early", Some(at(100))).await.unwrap();

        let msgs = request(&net.sender(), |reply| NetworkCommand::Messages {
            inbox: a.clone(),
            conversation: dm.id.clone(),
            query: MessageQuery::all(),
            reply,
        })
        .await
        .unwrap()
        .unwrap();
        let texts: Vec<_> = msgs.iter().filter_map(|m| m.content.as_text()).collect();
        assert_eq!(texts, vec!["early", "late"]);

        let latest = request(&net.sender(), |reply| NetworkCommand::Messages {
            inbox: a.clone(),
            conversation: dm.id.clone(),
            query: MessageQuery::latest(1),
            reply,
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].content.as_text(), Some("late"));
    }

    #[tokio::test]
    async fn test_non_members_cannot_read() {
        let net = spawn_network(NetworkConfig::default());
        let a = net.register(&ident("0xaa")).await.unwrap();
        net.register(&ident("0xbb")).await.unwrap();
        let outsider = net.register(&ident("0xcc")).await.unwrap();
        let dm = net.create_dm(&a, &ident("0xbb")).await.unwrap();

        assert!(net
            .send_text(&outsider, &dm.id, "hi", None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_shutdown_fails_later_requests() {
        let net = spawn_network(NetworkConfig::default());
        net.shutdown().await;
        tokio::task::yield_now().await;
        assert!(net.stats().await.is_err());
    }
}
