//! Messaging client lifecycle.
//!
//! Exactly one client exists per connected identity. Construction is
//! single-flight: while one is pending, further `initialize` calls are
//! no-ops. Losing or switching the identity tears the client down, and
//! every registered [`ClientObserver`] gets to release what it opened
//! against the client before the client itself is closed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use parley_shared::identity::{Identity, MessagingSigner};
use parley_shared::transport::{ClientOptions, ClientRef, Connector};
use parley_shared::types::{Address, Identifier};

use crate::error::{Result, SyncError};
use crate::generation::Generation;

/// Published state of the client slot.
#[derive(Debug, Clone, Default)]
pub enum ClientPhase {
    #[default]
    Absent,
    Pending,
    Ready(ClientRef),
    Failed(String),
}

impl ClientPhase {
    pub fn client(&self) -> Option<&ClientRef> {
        match self {
            ClientPhase::Ready(client) => Some(client),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ClientPhase::Pending)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ClientPhase::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientPhase::Absent => "absent",
            ClientPhase::Pending => "pending",
            ClientPhase::Ready(_) => "ready",
            ClientPhase::Failed(_) => "failed",
        }
    }
}

/// Result of an `initialize` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// This call built the client and published it.
    Ready,
    /// A client was already published.
    AlreadyReady,
    /// Another call is constructing the client.
    InFlight,
    /// No identity is connected.
    NoIdentity,
    /// Construction failed; the error was published.
    Failed,
    /// The identity changed while constructing; the new client was discarded.
    Superseded,
}

/// Components bound to the client's lifetime.
#[async_trait]
pub trait ClientObserver: Send + Sync {
    /// A client was published. Called in registration order.
    async fn client_ready(&self, client: ClientRef);

    /// The client is about to be closed. Called in reverse registration
    /// order, before the client is closed and before `Absent` is published.
    async fn client_lost(&self);
}

pub struct ClientManager {
    connector: Arc<dyn Connector>,
    options: ClientOptions,
    chain_id: u64,
    identity: Mutex<Option<Identity>>,
    phase: watch::Sender<ClientPhase>,
    epochs: Generation,
    observers: Mutex<Vec<Arc<dyn ClientObserver>>>,
    transition: tokio::sync::Mutex<()>,
}

impl ClientManager {
    pub fn new(connector: Arc<dyn Connector>, options: ClientOptions, chain_id: u64) -> Self {
        let (phase, _) = watch::channel(ClientPhase::Absent);
        Self {
            connector,
            options,
            chain_id,
            identity: Mutex::new(None),
            phase,
            epochs: Generation::new(),
            observers: Mutex::new(Vec::new()),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn ClientObserver>) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    fn observers(&self) -> Vec<Arc<dyn ClientObserver>> {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn phase(&self) -> ClientPhase {
        self.phase.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ClientPhase> {
        self.phase.subscribe()
    }

    pub fn client(&self) -> Option<ClientRef> {
        self.phase.borrow().client().cloned()
    }

    pub fn is_initializing(&self) -> bool {
        self.phase.borrow().is_pending()
    }

    pub fn error(&self) -> Option<String> {
        self.phase.borrow().error().map(str::to_string)
    }

    /// Replace the connected identity. A change of account (or its loss)
    /// tears down the client bound to the previous one.
    pub async fn set_identity(&self, identity: Option<Identity>) {
        let changed = {
            let mut current = self.identity.lock().unwrap_or_else(PoisonError::into_inner);
            let changed = match (current.as_ref(), identity.as_ref()) {
                (Some(old), Some(new)) => old.address() != new.address(),
                (None, None) => false,
                _ => true,
            };
            *current = identity;
            changed
        };

        if changed {
            debug!("Identity changed");
            self.disconnect().await;
        }
    }

    /// Build and publish a client for the current identity.
    pub async fn initialize(&self) -> InitOutcome {
        // Taken before the identity is read: any disconnect after this
        // point makes the build stale.
        let epoch = self.epochs.current();
        let Some(identity) = self.identity() else {
            debug!("Initialize skipped: no identity");
            return InitOutcome::NoIdentity;
        };

        let mut skipped = None;
        self.phase.send_if_modified(|phase| match phase {
            ClientPhase::Pending => {
                skipped = Some(InitOutcome::InFlight);
                false
            }
            ClientPhase::Ready(_) => {
                skipped = Some(InitOutcome::AlreadyReady);
                false
            }
            ClientPhase::Absent | ClientPhase::Failed(_) => {
                *phase = ClientPhase::Pending;
                true
            }
        });
        if let Some(outcome) = skipped {
            debug!(?outcome, "Initialize skipped");
            return outcome;
        }

        info!(
            address = %identity.address().short(),
            env = %self.options.env,
            "Initializing messaging client"
        );

        let signer = MessagingSigner::new(identity, self.chain_id);
        let built = self.connector.create(signer, self.options.clone()).await;

        let _guard = self.transition.lock().await;
        if !self.epochs.is_current(epoch) {
            warn!("Identity changed while the client was being built; discarding it");
            if let Ok(client) = built {
                client.close().await;
            }
            // A disconnect that landed before this call went pending left
            // nothing to reset the phase.
            self.phase.send_if_modified(|phase| {
                if !phase.is_pending() {
                    return false;
                }
                *phase = ClientPhase::Absent;
                true
            });
            return InitOutcome::Superseded;
        }

        match built {
            Ok(client) => {
                info!(inbox = %client.inbox_id().short(), "Messaging client ready");
                self.phase.send_replace(ClientPhase::Ready(client.clone()));
                for observer in self.observers() {
                    observer.client_ready(client.clone()).await;
                }
                InitOutcome::Ready
            }
            Err(e) => {
                error!(error = %e, "Messaging client initialization failed");
                self.phase.send_replace(ClientPhase::Failed(e.to_string()));
                InitOutcome::Failed
            }
        }
    }

    /// Tear down the client, if any, and clear any published error.
    /// Pending constructions are invalidated.
    pub async fn disconnect(&self) {
        let _guard = self.transition.lock().await;
        self.epochs.issue();

        let previous = self.phase.borrow().client().cloned();
        if let Some(client) = previous {
            for observer in self.observers().iter().rev() {
                observer.client_lost().await;
            }
            client.close().await;
            info!(inbox = %client.inbox_id().short(), "Messaging client closed");
        }
        self.phase.send_replace(ClientPhase::Absent);
    }

    /// Reachability of each address, keyed by lowercase address. Uses the
    /// live client when there is one.
    pub async fn can_message(&self, addresses: &[Address]) -> Result<HashMap<Address, bool>> {
        let identifiers: Vec<Identifier> = addresses.iter().map(Identifier::ethereum).collect();
        let answers = match self.client() {
            Some(client) => client.can_message(&identifiers).await?,
            None => {
                self.connector
                    .can_message(&identifiers, self.options.env)
                    .await?
            }
        };
        Ok(addresses
            .iter()
            .map(|a| (a.clone(), answers.get(a.as_str()).copied().unwrap_or(false)))
            .collect())
    }

    /// The live client or [`SyncError::NoClient`].
    pub fn require_client(&self) -> Result<ClientRef> {
        self.client().ok_or(SyncError::NoClient)
    }
}
