use serde::Serialize;
use tokio::sync::broadcast;

pub const EVENT_CLIENT_STATUS_CHANGED: &str = "client-status-changed";
pub const EVENT_CONVERSATIONS_CHANGED: &str = "conversations-changed";
pub const EVENT_MESSAGES_CHANGED: &str = "messages-changed";
pub const EVENT_SEND_FAILED: &str = "send-failed";

/// Capacity of the host event channel. Slow listeners lose the oldest events.
pub const EVENT_BUFFER: usize = 128;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatusPayload {
    pub status: String,
    pub inbox_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationsPayload {
    pub count: usize,
    pub loading: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessagesPayload {
    pub conversation_id: Option<String>,
    pub count: usize,
    pub loading: bool,
    pub sending: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendFailedPayload {
    pub conversation_id: Option<String>,
    pub error: String,
    /// The unsent text, so the composer can be restored.
    pub draft: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum AppEvent {
    ClientStatusChanged(ClientStatusPayload),
    ConversationsChanged(ConversationsPayload),
    MessagesChanged(MessagesPayload),
    SendFailed(SendFailedPayload),
}

impl AppEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AppEvent::ClientStatusChanged(_) => EVENT_CLIENT_STATUS_CHANGED,
            AppEvent::ConversationsChanged(_) => EVENT_CONVERSATIONS_CHANGED,
            AppEvent::MessagesChanged(_) => EVENT_MESSAGES_CHANGED,
            AppEvent::SendFailed(_) => EVENT_SEND_FAILED,
        }
    }
}

pub fn emit_event(events: &broadcast::Sender<AppEvent>, event: AppEvent) {
    let name = event.name();
    if events.send(event).is_err() {
        tracing::debug!(event = name, "No listeners for event");
    }
}
