//! Application state shared across all host commands.
//!
//! [`AppState`] owns the client lifecycle manager and the synchronizers,
//! wires them together, and forwards their state changes to the host as
//! [`AppEvent`]s.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use parley_shared::transport::Connector;
use parley_shared::types::InboxId;
use parley_sync::{ClientManager, ClientPhase, ConversationSync, MessageSync, MetadataResolver};

use crate::config::ClientConfig;
use crate::events::{
    emit_event, AppEvent, ClientStatusPayload, ConversationsPayload, MessagesPayload,
    EVENT_BUFFER,
};

/// Central application state.
pub struct AppState {
    pub config: ClientConfig,

    /// Identity gate and owner of the messaging client.
    pub clients: Arc<ClientManager>,

    /// Visible conversations of the current client.
    pub conversations: ConversationSync,

    /// Peer labels and previews, sorted newest first.
    pub metadata: MetadataResolver,

    /// History of the selected conversation.
    pub messages: MessageSync,

    events: broadcast::Sender<AppEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AppState {
    /// Wire every component around `connector`.
    ///
    /// Spawns the metadata driver and event forwarders, so it must be
    /// called from within a tokio runtime.
    pub fn new(config: ClientConfig, connector: Arc<dyn Connector>) -> Arc<Self> {
        let clients = Arc::new(ClientManager::new(
            connector,
            config.client_options(),
            config.chain_id,
        ));
        let conversations = ConversationSync::new();
        let messages = MessageSync::new();
        let metadata = MetadataResolver::new();

        // Lost in reverse: the thread is released before the list.
        clients.add_observer(Arc::new(conversations.clone()));
        clients.add_observer(Arc::new(messages.clone()));

        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let tasks = vec![
            metadata.drive(conversations.subscribe(), clients.subscribe()),
            forward_client_status(clients.subscribe(), events.clone()),
            forward_conversations(&conversations, &metadata, events.clone()),
            forward_messages(&messages, events.clone()),
        ];

        info!(env = %config.env, "Application state ready");
        Arc::new(Self {
            config,
            clients,
            conversations,
            metadata,
            messages,
            events,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<AppEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: AppEvent) {
        emit_event(&self.events, event);
    }

    pub fn own_inbox(&self) -> Option<InboxId> {
        self.clients.client().map(|c| c.inbox_id().clone())
    }

    /// Tear down the client and stop background tasks.
    pub async fn shutdown(&self) {
        self.clients.disconnect().await;
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            task.abort();
        }
        debug!("Application state shut down");
    }
}

fn forward_client_status(
    mut phases: watch::Receiver<ClientPhase>,
    events: broadcast::Sender<AppEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while phases.changed().await.is_ok() {
            let payload = {
                let phase = phases.borrow_and_update();
                ClientStatusPayload {
                    status: phase.name().to_string(),
                    inbox_id: phase.client().map(|c| c.inbox_id().to_string()),
                    error: phase.error().map(str::to_string),
                }
            };
            emit_event(&events, AppEvent::ClientStatusChanged(payload));
        }
    })
}

fn forward_conversations(
    conversations: &ConversationSync,
    metadata: &MetadataResolver,
    events: broadcast::Sender<AppEvent>,
) -> JoinHandle<()> {
    let mut list = conversations.subscribe();
    let mut metas = metadata.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = list.changed() => if changed.is_err() { break },
                changed = metas.changed() => if changed.is_err() { break },
            }
            let payload = {
                let list = list.borrow_and_update();
                let metas = metas.borrow_and_update();
                ConversationsPayload {
                    count: metas.metas.len(),
                    loading: list.loading || metas.resolving,
                    error: list.error.clone(),
                }
            };
            emit_event(&events, AppEvent::ConversationsChanged(payload));
        }
    })
}

fn forward_messages(messages: &MessageSync, events: broadcast::Sender<AppEvent>) -> JoinHandle<()> {
    let mut states = messages.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let payload = {
                let state = states.borrow_and_update();
                MessagesPayload {
                    conversation_id: state.conversation_id.as_ref().map(|id| id.to_string()),
                    count: state.visible().len(),
                    loading: state.loading,
                    sending: state.sending,
                    error: state.error.clone(),
                }
            };
            emit_event(&events, AppEvent::MessagesChanged(payload));
        }
    })
}
