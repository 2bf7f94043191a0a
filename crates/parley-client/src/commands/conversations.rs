use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use parley_shared::format::{format_relative, peer_color, peer_initials};
use parley_shared::types::{truncate_middle, Address, ConversationKind};
use parley_sync::{metadata, ConversationMeta, LoadOutcome};

use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDto {
    pub id: String,
    pub kind: ConversationKind,
    pub peer: String,
    pub peer_short: String,
    pub initials: String,
    pub color: String,
    pub last_message: String,
    pub last_message_at: Option<String>,
    pub last_message_relative: Option<String>,
}

impl ConversationDto {
    pub fn from_meta(meta: &ConversationMeta, now: DateTime<Utc>) -> Self {
        let peer_short = match Address::parse(&meta.peer) {
            Ok(address) => address.short(),
            Err(_) => truncate_middle(&meta.peer, 6, 4),
        };
        Self {
            id: meta.id().to_string(),
            kind: meta.conversation.kind(),
            peer: meta.peer.clone(),
            peer_short,
            initials: peer_initials(&meta.peer),
            color: peer_color(&meta.peer),
            last_message: meta.last_message_text.clone(),
            last_message_at: meta.last_message_at.map(|t| t.to_rfc3339()),
            last_message_relative: meta.last_message_at.map(|t| format_relative(t, now)),
        }
    }
}

fn to_dtos(metas: &[ConversationMeta]) -> Vec<ConversationDto> {
    let now = Utc::now();
    metas.iter().map(|m| ConversationDto::from_meta(m, now)).collect()
}

/// Conversation list, newest first, optionally filtered by peer or preview.
pub fn list_conversations(state: &AppState, query: Option<String>) -> Vec<ConversationDto> {
    let metas = match query {
        Some(q) => state.metadata.search(&q),
        None => state.metadata.metas(),
    };
    to_dtos(&metas)
}

/// Reload the list and resolve its metadata before returning.
pub async fn refresh_conversations(state: &AppState) -> Result<Vec<ConversationDto>, String> {
    if state.clients.client().is_none() {
        return Err("Messaging client not initialized".to_string());
    }
    if state.conversations.load().await == LoadOutcome::Failed {
        let error = state.conversations.state().error;
        return Err(error.unwrap_or_else(|| "Failed to load conversations".to_string()));
    }
    state
        .metadata
        .refresh(state.own_inbox(), state.conversations.items())
        .await;
    Ok(list_conversations(state, None))
}

/// Open a DM with `address` and select it.
pub async fn start_conversation(state: &AppState, address: String) -> Result<ConversationDto, String> {
    let conversation = state
        .conversations
        .start_conversation(&address)
        .await
        .map_err(|e| e.to_string())?;
    info!(conversation = %conversation.id(), "Opening new conversation");
    state.messages.select(Some(conversation.clone())).await;

    let meta = match state.own_inbox() {
        Some(own) => metadata::resolve_one(&own, &conversation)
            .await
            .unwrap_or_else(|_| ConversationMeta::unresolved(conversation.clone())),
        None => ConversationMeta::unresolved(conversation),
    };
    Ok(ConversationDto::from_meta(&meta, Utc::now()))
}

/// Select a conversation by id, or clear the selection with `None`.
pub async fn select_conversation(
    state: &AppState,
    conversation_id: Option<String>,
) -> Result<(), String> {
    let conversation = match conversation_id {
        None => None,
        Some(id) => Some(
            state
                .conversations
                .items()
                .into_iter()
                .find(|c| c.id().as_str() == id)
                .ok_or_else(|| format!("Conversation not found: {id}"))?,
        ),
    };
    state.messages.select(conversation).await;
    Ok(())
}
