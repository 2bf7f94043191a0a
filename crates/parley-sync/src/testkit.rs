//! Scripted in-memory transport for exercising the synchronizers.
//!
//! Every call can be held at a [`Gates`] checkpoint so tests can interleave
//! completions deterministically.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};

use parley_shared::error::{IdentityError, TransportError};
use parley_shared::identity::{Identity, MessagingSigner, WalletSigner};
use parley_shared::transport::{
    ClientOptions, ClientRef, Connector, Conversation, ConversationRef, ListOptions, MessageQuery,
    MessagingClient, StreamHandle, Subscription,
};
use parley_shared::types::{
    Address, ConversationId, ConversationKind, Environment, Identifier, InboxId, Member,
    MessageContent, MessageId, MessageKind, MessageRecord,
};

pub const ALICE: &str = "0x00000000000000000000000000000000000a11ce";
pub const BOB: &str = "0x0000000000000000000000000000000000000b0b";
pub const CAROL: &str = "0x00000000000000000000000000000000000ca401";

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn inbox(name: &str) -> InboxId {
    InboxId(format!("inbox-{name}"))
}

pub fn text(id: &str, conversation: &str, sender: &InboxId, body: &str, secs: i64) -> MessageRecord {
    MessageRecord {
        id: MessageId::from(id),
        conversation_id: ConversationId::from(conversation),
        sender_inbox_id: sender.clone(),
        content: MessageContent::Text(body.to_string()),
        sent_at: at(secs),
        kind: MessageKind::Application,
    }
}

pub fn membership(id: &str, conversation: &str, sender: &InboxId, secs: i64) -> MessageRecord {
    MessageRecord {
        id: MessageId::from(id),
        conversation_id: ConversationId::from(conversation),
        sender_inbox_id: sender.clone(),
        content: MessageContent::Other("group_updated".to_string()),
        sent_at: at(secs),
        kind: MessageKind::MembershipChange,
    }
}

/// Wait until the watched value satisfies `pred`, failing after one second.
pub async fn wait_for<T: Clone>(rx: &mut watch::Receiver<T>, pred: impl FnMut(&T) -> bool) -> T {
    tokio::time::timeout(Duration::from_secs(1), rx.wait_for(pred))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed")
        .clone()
}

// Gates

type Checkpoint = (oneshot::Sender<()>, oneshot::Receiver<()>);

/// Queue of checkpoints; each held call consumes one.
#[derive(Default)]
pub struct Gates {
    queue: Mutex<VecDeque<Checkpoint>>,
}

/// A call parked at a checkpoint.
pub struct Held {
    entered: oneshot::Receiver<()>,
    release: oneshot::Sender<()>,
}

impl Gates {
    /// Park the next call that passes through these gates.
    pub fn hold_next(&self) -> Held {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        self.queue
            .lock()
            .unwrap()
            .push_back((entered_tx, release_rx));
        Held {
            entered: entered_rx,
            release: release_tx,
        }
    }

    pub async fn pass(&self) {
        let next = self.queue.lock().unwrap().pop_front();
        if let Some((entered, release)) = next {
            let _ = entered.send(());
            let _ = release.await;
        }
    }
}

impl Held {
    /// Resolves once the held call has reached its checkpoint.
    pub async fn entered(&mut self) {
        tokio::time::timeout(Duration::from_secs(1), &mut self.entered)
            .await
            .expect("call never reached its checkpoint")
            .expect("gate dropped");
    }

    pub fn release(self) {
        let _ = self.release.send(());
    }
}

// Live feeds

type Slot<T> = Arc<Mutex<Option<mpsc::UnboundedSender<Result<T, TransportError>>>>>;

/// Fan-out source for fake subscriptions.
pub struct FakeFeed<T> {
    slots: Mutex<Vec<Slot<T>>>,
    pub opened: AtomicUsize,
    pub ended: Arc<AtomicUsize>,
    pub fail_end: Arc<AtomicBool>,
    pub end_gates: Arc<Gates>,
}

struct FakeHandle<T> {
    slot: Slot<T>,
    ended: Arc<AtomicUsize>,
    fail_end: Arc<AtomicBool>,
    gates: Arc<Gates>,
}

#[async_trait]
impl<T: Send + 'static> StreamHandle for FakeHandle<T> {
    async fn end(&self) -> Result<(), TransportError> {
        self.gates.pass().await;
        self.slot.lock().unwrap().take();
        self.ended.fetch_add(1, Ordering::SeqCst);
        if self.fail_end.load(Ordering::SeqCst) {
            return Err(TransportError::Network("end failed".into()));
        }
        Ok(())
    }
}

impl<T: Clone + Send + 'static> FakeFeed<T> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            opened: AtomicUsize::new(0),
            ended: Arc::new(AtomicUsize::new(0)),
            fail_end: Arc::new(AtomicBool::new(false)),
            end_gates: Arc::new(Gates::default()),
        }
    }

    pub fn open(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let slot: Slot<T> = Arc::new(Mutex::new(Some(tx)));
        self.slots.lock().unwrap().push(slot.clone());
        self.opened.fetch_add(1, Ordering::SeqCst);

        let items = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();
        let handle = FakeHandle {
            slot,
            ended: self.ended.clone(),
            fail_end: self.fail_end.clone(),
            gates: self.end_gates.clone(),
        };
        Subscription::new(items, Arc::new(handle))
    }

    fn broadcast(&self, item: Result<T, TransportError>) {
        for slot in self.slots.lock().unwrap().iter() {
            if let Some(tx) = slot.lock().unwrap().as_ref() {
                let _ = tx.send(item.clone());
            }
        }
    }

    pub fn push(&self, item: T) {
        self.broadcast(Ok(item));
    }

    pub fn push_error(&self, error: TransportError) {
        self.broadcast(Err(error));
    }

    /// Subscriptions not yet ended.
    pub fn open_count(&self) -> usize {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .filter(|slot| slot.lock().unwrap().is_some())
            .count()
    }
}

// Conversations

pub struct FakeConversation {
    id: ConversationId,
    kind: ConversationKind,
    own_inbox: InboxId,
    members: Vec<Member>,
    pub history: Mutex<Vec<MessageRecord>>,
    pub feed: FakeFeed<MessageRecord>,
    pub fail_members: AtomicBool,
    pub fail_sync: AtomicBool,
    pub fail_messages: AtomicBool,
    pub fail_send: AtomicBool,
    /// Push sent messages to open subscriptions.
    pub echo_sends: AtomicBool,
    pub message_gates: Gates,
    pub send_gates: Gates,
    pub sync_calls: AtomicUsize,
    pub members_calls: AtomicUsize,
    sent: AtomicUsize,
}

fn member(inbox_id: &InboxId, address: &str) -> Member {
    Member {
        inbox_id: inbox_id.clone(),
        account_identifiers: vec![Identifier {
            identifier: address.to_string(),
            kind: parley_shared::types::IdentifierKind::Ethereum,
        }],
    }
}

impl FakeConversation {
    pub fn new(
        id: &str,
        kind: ConversationKind,
        own_inbox: &InboxId,
        members: Vec<Member>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: ConversationId::from(id),
            kind,
            own_inbox: own_inbox.clone(),
            members,
            history: Mutex::new(Vec::new()),
            feed: FakeFeed::new(),
            fail_members: AtomicBool::new(false),
            fail_sync: AtomicBool::new(false),
            fail_messages: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
            echo_sends: AtomicBool::new(false),
            message_gates: Gates::default(),
            send_gates: Gates::default(),
            sync_calls: AtomicUsize::new(0),
            members_calls: AtomicUsize::new(0),
            sent: AtomicUsize::new(0),
        })
    }

    /// DM between `me` and a peer identified by `peer_address`.
    pub fn dm(id: &str, me: &InboxId, peer: &InboxId, peer_address: &str) -> Arc<Self> {
        Self::new(
            id,
            ConversationKind::Dm,
            me,
            vec![member(me, ALICE), member(peer, peer_address)],
        )
    }

    pub fn with_history(self: Arc<Self>, records: Vec<MessageRecord>) -> Arc<Self> {
        *self.history.lock().unwrap() = records;
        self
    }

    pub fn add(&self, record: MessageRecord) {
        self.history.lock().unwrap().push(record);
    }

    pub fn share(self: &Arc<Self>) -> ConversationRef {
        self.clone()
    }
}

fn fail(flag: &AtomicBool, what: &str) -> Result<(), TransportError> {
    if flag.load(Ordering::SeqCst) {
        Err(TransportError::Network(format!("{what} failed")))
    } else {
        Ok(())
    }
}

#[async_trait]
impl Conversation for FakeConversation {
    fn id(&self) -> &ConversationId {
        &self.id
    }

    fn kind(&self) -> ConversationKind {
        self.kind
    }

    async fn members(&self) -> Result<Vec<Member>, TransportError> {
        self.members_calls.fetch_add(1, Ordering::SeqCst);
        fail(&self.fail_members, "members")?;
        Ok(self.members.clone())
    }

    async fn sync(&self) -> Result<(), TransportError> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        fail(&self.fail_sync, "sync")
    }

    /// Full history comes back in insertion order, which lets tests feed
    /// out-of-order records; a limit returns the newest records.
    async fn messages(&self, query: MessageQuery) -> Result<Vec<MessageRecord>, TransportError> {
        let snapshot = self.history.lock().unwrap().clone();
        self.message_gates.pass().await;
        fail(&self.fail_messages, "messages")?;
        match query.limit {
            None => Ok(snapshot),
            Some(n) => {
                let mut sorted = snapshot;
                sorted.sort_by_key(|m| m.sent_at);
                let skip = sorted.len().saturating_sub(n);
                Ok(sorted.into_iter().skip(skip).collect())
            }
        }
    }

    async fn send_text(&self, body: &str) -> Result<MessageId, TransportError> {
        self.send_gates.pass().await;
        fail(&self.fail_send, "send")?;
        let n = self.sent.fetch_add(1, Ordering::SeqCst) + 1;
        let latest = self
            .history
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.sent_at)
            .max()
            .unwrap_or_else(|| at(0));
        let record = MessageRecord {
            id: MessageId(format!("{}-sent-{n}", self.id)),
            conversation_id: self.id.clone(),
            sender_inbox_id: self.own_inbox.clone(),
            content: MessageContent::Text(body.to_string()),
            sent_at: latest + chrono::Duration::seconds(1),
            kind: MessageKind::Application,
        };
        self.add(record.clone());
        if self.echo_sends.load(Ordering::SeqCst) {
            self.feed.push(record.clone());
        }
        Ok(record.id)
    }

    async fn stream(&self) -> Result<Subscription<MessageRecord>, TransportError> {
        Ok(self.feed.open())
    }
}

// Clients

pub struct FakeClient {
    inbox_id: InboxId,
    pub conversations: Mutex<Vec<ConversationRef>>,
    pub reachable: Mutex<HashSet<String>>,
    pub feed: FakeFeed<ConversationRef>,
    pub list_gates: Gates,
    pub fail_list: AtomicBool,
    pub list_calls: AtomicUsize,
    pub closed: AtomicBool,
}

impl FakeClient {
    pub fn new(inbox_id: InboxId) -> Arc<Self> {
        Arc::new(Self {
            inbox_id,
            conversations: Mutex::new(Vec::new()),
            reachable: Mutex::new(HashSet::new()),
            feed: FakeFeed::new(),
            list_gates: Gates::default(),
            fail_list: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn set_conversations(&self, conversations: Vec<ConversationRef>) {
        *self.conversations.lock().unwrap() = conversations;
    }

    pub fn allow(&self, address: &str) {
        self.reachable.lock().unwrap().insert(address.to_string());
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagingClient for FakeClient {
    fn inbox_id(&self) -> &InboxId {
        &self.inbox_id
    }

    async fn can_message(
        &self,
        identifiers: &[Identifier],
    ) -> Result<HashMap<String, bool>, TransportError> {
        let reachable = self.reachable.lock().unwrap();
        Ok(identifiers
            .iter()
            .map(|i| (i.identifier.clone(), reachable.contains(&i.identifier)))
            .collect())
    }

    async fn sync_conversations(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// The snapshot is taken when the call starts, before any gate.
    async fn list_conversations(
        &self,
        _options: &ListOptions,
    ) -> Result<Vec<ConversationRef>, TransportError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.conversations.lock().unwrap().clone();
        self.list_gates.pass().await;
        fail(&self.fail_list, "list")?;
        Ok(snapshot)
    }

    async fn stream_conversations(&self) -> Result<Subscription<ConversationRef>, TransportError> {
        Ok(self.feed.open())
    }

    async fn create_dm(&self, identifier: &Identifier) -> Result<ConversationRef, TransportError> {
        let peer = InboxId(format!("inbox-{}", identifier.identifier));
        let id = format!("dm-{}", identifier.identifier);
        Ok(FakeConversation::dm(&id, &self.inbox_id, &peer, &identifier.identifier))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// Connector and wallet

pub struct FakeConnector {
    pub creates: AtomicUsize,
    pub create_gates: Gates,
    pub failures_left: AtomicUsize,
    pub clients: Mutex<Vec<Arc<FakeClient>>>,
    pub reachable: Mutex<HashSet<String>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            creates: AtomicUsize::new(0),
            create_gates: Gates::default(),
            failures_left: AtomicUsize::new(0),
            clients: Mutex::new(Vec::new()),
            reachable: Mutex::new(HashSet::new()),
        })
    }

    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn last_client(&self) -> Arc<FakeClient> {
        self.clients.lock().unwrap().last().cloned().expect("no client built")
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn create(
        &self,
        signer: MessagingSigner,
        _options: ClientOptions,
    ) -> Result<ClientRef, TransportError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        signer.sign("register").await?;
        self.create_gates.pass().await;

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::Network("registration unavailable".into()));
        }

        let client = FakeClient::new(InboxId(format!("inbox-{}", signer.address())));
        self.clients.lock().unwrap().push(client.clone());
        Ok(client)
    }

    async fn can_message(
        &self,
        identifiers: &[Identifier],
        _env: Environment,
    ) -> Result<HashMap<String, bool>, TransportError> {
        let reachable = self.reachable.lock().unwrap();
        Ok(identifiers
            .iter()
            .map(|i| (i.identifier.clone(), reachable.contains(&i.identifier)))
            .collect())
    }
}

/// Wallet that returns a fixed signature, or refuses.
pub struct FakeWallet {
    pub refuse: AtomicBool,
}

#[async_trait]
impl WalletSigner for FakeWallet {
    async fn sign_message(&self, _address: &Address, _message: &str) -> Result<String, IdentityError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(IdentityError::Signing("user rejected".into()));
        }
        Ok("0x5151".to_string())
    }

    fn chain_id(&self) -> u64 {
        2741
    }
}

pub fn identity(address: &str) -> Identity {
    let wallet = Arc::new(FakeWallet {
        refuse: AtomicBool::new(false),
    });
    Identity::new(Address::parse(address).unwrap(), wallet)
}
