//! Inbox registration tracking.
//!
//! Maps account identifiers to the inbox ids derived for them and keeps
//! per-inbox registration info for the loopback network.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use parley_shared::constants::KDF_CONTEXT_INBOX_ID;
use parley_shared::types::{Identifier, InboxId, Member};

/// Information about a registered inbox.
#[derive(Debug, Clone)]
pub struct RegisteredInbox {
    pub inbox_id: InboxId,
    pub identifier: Identifier,
    /// When the first installation registered.
    pub registered_at: DateTime<Utc>,
    /// Number of client constructions seen for this inbox.
    pub installations: u32,
}

/// Tracks every inbox known to the network.
#[derive(Debug, Clone, Default)]
pub struct InboxRegistry {
    by_identifier: HashMap<String, InboxId>,
    inboxes: HashMap<InboxId, RegisteredInbox>,
}

/// Deterministic inbox id for an identifier.
pub fn derive_inbox_id(identifier: &Identifier) -> InboxId {
    let key = blake3::derive_key(KDF_CONTEXT_INBOX_ID, identifier.identifier.as_bytes());
    InboxId(hex::encode(key))
}

impl InboxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an installation for `identifier`, creating the inbox on first use.
    pub fn register(&mut self, identifier: &Identifier) -> InboxId {
        let inbox_id = derive_inbox_id(identifier);
        let entry = self
            .inboxes
            .entry(inbox_id.clone())
            .or_insert_with(|| RegisteredInbox {
                inbox_id: inbox_id.clone(),
                identifier: identifier.clone(),
                registered_at: Utc::now(),
                installations: 0,
            });
        entry.installations += 1;
        self.by_identifier
            .insert(identifier.identifier.clone(), inbox_id.clone());

        debug!(
            inbox = %inbox_id.short(),
            installations = entry.installations,
            "Registered installation"
        );
        inbox_id
    }

    pub fn lookup(&self, identifier: &str) -> Option<&InboxId> {
        self.by_identifier.get(identifier)
    }

    pub fn is_registered(&self, identifier: &str) -> bool {
        self.by_identifier.contains_key(identifier)
    }

    pub fn get(&self, inbox_id: &InboxId) -> Option<&RegisteredInbox> {
        self.inboxes.get(inbox_id)
    }

    /// Member view of an inbox with its linked account identifier.
    pub fn member(&self, inbox_id: &InboxId) -> Option<Member> {
        self.inboxes.get(inbox_id).map(|info| Member {
            inbox_id: info.inbox_id.clone(),
            account_identifiers: vec![info.identifier.clone()],
        })
    }

    pub fn inbox_count(&self) -> usize {
        self.inboxes.len()
    }
}
