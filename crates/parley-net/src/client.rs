//! Transport trait implementations backed by the loopback network task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::{mpsc, oneshot, OnceCell};
use tracing::{debug, info};

use parley_shared::error::TransportError;
use parley_shared::identity::MessagingSigner;
use parley_shared::transport::{
    ClientOptions, ClientRef, Connector, Conversation, ConversationRef, ListOptions,
    MessageQuery, MessagingClient, StreamHandle, Subscription,
};
use parley_shared::types::{
    ConversationId, ConversationKind, Environment, Identifier, InboxId, Member, MessageId,
    MessageRecord,
};

use crate::network::{
    request, ConversationSnapshot, Delivery, LoopbackNetwork, NetworkCommand, SubscriptionTarget,
};

/// Text every client signs when it registers its installation.
pub fn registration_text(identifier: &Identifier, env: Environment, app_version: &str) -> String {
    format!(
        "Parley installation registration\nidentifier: {}\nenv: {}\napp: {}",
        identifier.identifier, env, app_version
    )
}

/// Builds [`LoopbackClient`]s on a running [`LoopbackNetwork`].
#[derive(Clone)]
pub struct LoopbackConnector {
    cmd_tx: mpsc::Sender<NetworkCommand>,
}

impl LoopbackNetwork {
    pub fn connector(&self) -> LoopbackConnector {
        LoopbackConnector {
            cmd_tx: self.sender(),
        }
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn create(
        &self,
        signer: MessagingSigner,
        options: ClientOptions,
    ) -> Result<ClientRef, TransportError> {
        let identifier = signer.identifier();
        let text = registration_text(&identifier, options.env, &options.app_version);
        let signature = signer.sign(&text).await?;

        let registration = {
            let identifier = identifier.clone();
            let env = options.env;
            request(&self.cmd_tx, |reply| NetworkCommand::Register {
                identifier,
                signature,
                env,
                reply,
            })
            .await??
        };

        info!(
            inbox = %registration.inbox_id.short(),
            session = registration.session,
            app = %options.app_version,
            "Loopback client created"
        );

        Ok(Arc::new(LoopbackClient {
            inner: Arc::new(ClientInner {
                cmd_tx: self.cmd_tx.clone(),
                session: registration.session,
                inbox_id: registration.inbox_id,
                closed: AtomicBool::new(false),
            }),
        }))
    }

    async fn can_message(
        &self,
        identifiers: &[Identifier],
        _env: Environment,
    ) -> Result<HashMap<String, bool>, TransportError> {
        let identifiers = identifiers.to_vec();
        request(&self.cmd_tx, |reply| NetworkCommand::CanMessage { identifiers, reply }).await
    }
}

struct ClientInner {
    cmd_tx: mpsc::Sender<NetworkCommand>,
    session: u64,
    inbox_id: InboxId,
    closed: AtomicBool,
}

impl ClientInner {
    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> NetworkCommand,
    ) -> Result<T, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        request(&self.cmd_tx, build).await
    }

    async fn subscribe(
        &self,
        target: SubscriptionTarget,
    ) -> Result<(mpsc::Receiver<Delivery>, Arc<LoopbackStreamHandle>), TransportError> {
        let session = self.session;
        let inbox = self.inbox_id.clone();
        let (id, rx) = self
            .call(|reply| NetworkCommand::Subscribe {
                session,
                inbox,
                target,
                reply,
            })
            .await??;
        let handle = Arc::new(LoopbackStreamHandle {
            cmd_tx: self.cmd_tx.clone(),
            id,
            ended: AtomicBool::new(false),
        });
        Ok((rx, handle))
    }
}

/// Drains a delivery channel as a stream.
fn deliveries(rx: mpsc::Receiver<Delivery>) -> impl futures::Stream<Item = Delivery> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|d| (d, rx)) })
}

/// A client session on the loopback network.
pub struct LoopbackClient {
    inner: Arc<ClientInner>,
}

impl LoopbackClient {
    fn wrap(&self, snapshot: ConversationSnapshot) -> ConversationRef {
        Arc::new(LoopbackConversation::new(self.inner.clone(), snapshot))
    }
}

#[async_trait]
impl MessagingClient for LoopbackClient {
    fn inbox_id(&self) -> &InboxId {
        &self.inner.inbox_id
    }

    async fn can_message(
        &self,
        identifiers: &[Identifier],
    ) -> Result<HashMap<String, bool>, TransportError> {
        let identifiers = identifiers.to_vec();
        self.inner
            .call(|reply| NetworkCommand::CanMessage { identifiers, reply })
            .await
    }

    async fn sync_conversations(&self) -> Result<(), TransportError> {
        let inbox = self.inner.inbox_id.clone();
        self.inner
            .call(|reply| NetworkCommand::SyncConversations { inbox, reply })
            .await
    }

    async fn list_conversations(
        &self,
        options: &ListOptions,
    ) -> Result<Vec<ConversationRef>, TransportError> {
        let inbox = self.inner.inbox_id.clone();
        let options = options.clone();
        let snapshots = self
            .inner
            .call(|reply| NetworkCommand::ListConversations {
                inbox,
                options,
                reply,
            })
            .await?;
        Ok(snapshots.into_iter().map(|s| self.wrap(s)).collect())
    }

    async fn stream_conversations(&self) -> Result<Subscription<ConversationRef>, TransportError> {
        let (rx, handle) = self.inner.subscribe(SubscriptionTarget::Conversations).await?;
        let inner = self.inner.clone();
        let items = deliveries(rx)
            .filter_map(move |delivery| {
                let item = match delivery {
                    Delivery::Conversation(snapshot) => {
                        let conversation: ConversationRef =
                            Arc::new(LoopbackConversation::new(inner.clone(), snapshot));
                        Some(Ok(conversation))
                    }
                    Delivery::Message(_) => None,
                };
                futures::future::ready(item)
            })
            .boxed();
        Ok(Subscription::new(items, handle))
    }

    async fn create_dm(&self, identifier: &Identifier) -> Result<ConversationRef, TransportError> {
        let inbox = self.inner.inbox_id.clone();
        let peer = identifier.clone();
        let snapshot = self
            .inner
            .call(|reply| NetworkCommand::CreateDm { inbox, peer, reply })
            .await??;
        Ok(self.wrap(snapshot))
    }

    async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let session = self.inner.session;
        match request(&self.inner.cmd_tx, |reply| NetworkCommand::CloseSession {
            session,
            reply,
        })
        .await
        {
            Ok(ended) => debug!(session, ended, "Loopback client closed"),
            Err(e) => debug!(session, error = %e, "Close on stopped network"),
        }
    }
}

/// One conversation as seen by one client. Membership is fetched once per
/// instance and cached.
pub struct LoopbackConversation {
    client: Arc<ClientInner>,
    snapshot: ConversationSnapshot,
    members: OnceCell<Vec<Member>>,
}

impl LoopbackConversation {
    fn new(client: Arc<ClientInner>, snapshot: ConversationSnapshot) -> Self {
        Self {
            client,
            snapshot,
            members: OnceCell::new(),
        }
    }
}

#[async_trait]
impl Conversation for LoopbackConversation {
    fn id(&self) -> &ConversationId {
        &self.snapshot.id
    }

    fn kind(&self) -> ConversationKind {
        self.snapshot.kind
    }

    async fn members(&self) -> Result<Vec<Member>, TransportError> {
        let members = self
            .members
            .get_or_try_init(|| async {
                let inbox = self.client.inbox_id.clone();
                let conversation = self.snapshot.id.clone();
                self.client
                    .call(|reply| NetworkCommand::Members {
                        inbox,
                        conversation,
                        reply,
                    })
                    .await?
            })
            .await?;
        Ok(members.clone())
    }

    async fn sync(&self) -> Result<(), TransportError> {
        let inbox = self.client.inbox_id.clone();
        let conversation = self.snapshot.id.clone();
        self.client
            .call(|reply| NetworkCommand::SyncConversation {
                inbox,
                conversation,
                reply,
            })
            .await?
    }

    async fn messages(&self, query: MessageQuery) -> Result<Vec<MessageRecord>, TransportError> {
        let inbox = self.client.inbox_id.clone();
        let conversation = self.snapshot.id.clone();
        self.client
            .call(|reply| NetworkCommand::Messages {
                inbox,
                conversation,
                query,
                reply,
            })
            .await?
    }

    async fn send_text(&self, text: &str) -> Result<MessageId, TransportError> {
        let inbox = self.client.inbox_id.clone();
        let conversation = self.snapshot.id.clone();
        let text = text.to_string();
        self.client
            .call(|reply| NetworkCommand::SendText {
                inbox,
                conversation,
                text,
                reply,
            })
            .await?
    }

    async fn stream(&self) -> Result<Subscription<MessageRecord>, TransportError> {
        let (rx, handle) = self
            .client
            .subscribe(SubscriptionTarget::Messages(self.snapshot.id.clone()))
            .await?;
        let items = deliveries(rx)
            .filter_map(|delivery| {
                let item = match delivery {
                    Delivery::Message(record) => Some(Ok(record)),
                    Delivery::Conversation(_) => None,
                };
                futures::future::ready(item)
            })
            .boxed();
        Ok(Subscription::new(items, handle))
    }
}

/// Ends one subscription. Idempotent.
pub struct LoopbackStreamHandle {
    cmd_tx: mpsc::Sender<NetworkCommand>,
    id: u64,
    ended: AtomicBool,
}

#[async_trait]
impl StreamHandle for LoopbackStreamHandle {
    async fn end(&self) -> Result<(), TransportError> {
        if self.ended.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let id = self.id;
        request(&self.cmd_tx, |reply| NetworkCommand::Unsubscribe { id, reply }).await?;
        Ok(())
    }
}
