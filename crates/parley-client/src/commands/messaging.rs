use serde::Serialize;
use tracing::info;

use parley_shared::format::format_clock;
use parley_shared::types::{InboxId, MessageRecord};
use parley_sync::LoadOutcome;

use crate::events::{AppEvent, SendFailedPayload};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: String,
    pub conversation_id: String,
    pub sender_inbox_id: String,
    pub content: String,
    pub sent_at: String,
    /// Wall-clock label for the bubble.
    pub time: String,
    pub is_sender: bool,
}

impl MessageDto {
    pub fn from_record(record: &MessageRecord, own_inbox: Option<&InboxId>) -> Self {
        Self {
            id: record.id.to_string(),
            conversation_id: record.conversation_id.to_string(),
            sender_inbox_id: record.sender_inbox_id.to_string(),
            content: record.content.as_text().unwrap_or_default().to_string(),
            sent_at: record.sent_at.to_rfc3339(),
            time: format_clock(record.sent_at),
            is_sender: own_inbox == Some(&record.sender_inbox_id),
        }
    }
}

/// Displayable messages of the selected conversation, oldest first.
pub fn get_messages(state: &AppState) -> Vec<MessageDto> {
    let own = state.own_inbox();
    state
        .messages
        .visible_messages()
        .iter()
        .map(|m| MessageDto::from_record(m, own.as_ref()))
        .collect()
}

pub async fn refresh_messages(state: &AppState) -> Result<Vec<MessageDto>, String> {
    match state.messages.load().await {
        LoadOutcome::Skipped => Err("No conversation selected".to_string()),
        LoadOutcome::Failed => Err(state
            .messages
            .state()
            .error
            .unwrap_or_else(|| "Failed to load messages".to_string())),
        _ => Ok(get_messages(state)),
    }
}

/// Send to the selected conversation. On failure the draft is handed back
/// through a `send-failed` event.
pub async fn send_message(state: &AppState, content: String) -> Result<String, String> {
    match state.messages.send(&content).await {
        Ok(id) => {
            info!(message = %id, "Message sent from host");
            state
                .metadata
                .refresh(state.own_inbox(), state.conversations.items())
                .await;
            Ok(id.to_string())
        }
        Err(e) => {
            let error = e.to_string();
            state.emit(AppEvent::SendFailed(SendFailedPayload {
                conversation_id: state.messages.state().conversation_id.map(|id| id.to_string()),
                error: error.clone(),
                draft: content,
            }));
            Err(error)
        }
    }
}
