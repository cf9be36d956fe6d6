//! JSON wire protocol and the per-event dispatch table.
//!
//! Every frame is `{"event": "<name>", "data": {...}}`. Inbound payload fields
//! are optional at the serde level so that missing fields become validation
//! errors reported to the sender instead of opaque decode failures.

use serde::{Deserialize, Serialize};

use crate::db::models::{Message, MessageKind};
use crate::error::RelayError;
use crate::state::AppState;
use crate::ws::Endpoint;

// --- Inbound ---

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Typing(TypingPayload),
    PrivateMessage(PrivateMessagePayload),
    JoinConversation(ConversationPayload),
    LeaveConversation(ConversationPayload),
    GetOnlineUsers,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TypingPayload {
    pub conversation_id: Option<String>,
    pub is_typing: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrivateMessagePayload {
    pub conversation_id: Option<String>,
    pub recipient_id: Option<String>,
    pub content: Option<String>,
    pub kind: Option<MessageKind>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversationPayload {
    pub conversation_id: Option<String>,
}

// --- Outbound ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    UserOnline(PresenceEvent),
    UserOffline(PresenceEvent),
    UserTyping(TypingEvent),
    PrivateMessage(MessageEvent),
    MessageDelivered(DeliveredEvent),
    UserJoined(RoomEvent),
    UserLeft(RoomEvent),
    OnlineUsers(OnlineUsersEvent),
    Error(ErrorEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEvent {
    pub identity: String,
    pub status: PresenceStatus,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingEvent {
    pub identity: String,
    pub conversation_id: String,
    pub is_typing: bool,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub kind: MessageKind,
    pub timestamp: u64,
}

impl From<&Message> for MessageEvent {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            conversation_id: message.conversation_id.clone(),
            sender_id: message.sender_id.clone(),
            recipient_id: message.recipient_id.clone(),
            content: message.content.clone(),
            kind: message.kind,
            timestamp: message.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredEvent {
    pub conversation_id: String,
    pub message_id: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomEvent {
    pub identity: String,
    pub conversation_id: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineUsersEvent {
    pub users: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
}

/// Current wall-clock time as unix milliseconds.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

// --- Dispatch ---

/// Handle one inbound text frame: decode, dispatch, and report any failure
/// back to the originating endpoint as an `error` event.
pub async fn handle_text_message(text: &str, endpoint: &Endpoint, state: &AppState) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                user_id = %endpoint.identity(),
                endpoint_id = %endpoint.id(),
                error = %e,
                "Failed to decode client event"
            );
            send_error(endpoint, "Malformed event");
            return;
        }
    };

    if let Err(err) = dispatch(event, endpoint, state).await {
        tracing::debug!(
            user_id = %endpoint.identity(),
            endpoint_id = %endpoint.id(),
            error = %err,
            "Client event rejected"
        );
        send_error(endpoint, &err.to_string());
    }
}

/// Route a decoded event to its handler. Each handler receives the bound
/// endpoint (and through it the immutable identity) plus the payload.
pub async fn dispatch(
    event: ClientEvent,
    endpoint: &Endpoint,
    state: &AppState,
) -> Result<(), RelayError> {
    match event {
        ClientEvent::Typing(payload) => handle_typing(payload, endpoint, state),
        ClientEvent::PrivateMessage(payload) => {
            state.relay.send(endpoint, payload).await.map(|_| ())
        }
        ClientEvent::JoinConversation(payload) => handle_join(payload, endpoint, state),
        ClientEvent::LeaveConversation(payload) => handle_leave(payload, endpoint, state),
        ClientEvent::GetOnlineUsers => handle_get_online_users(endpoint, state),
    }
}

fn handle_typing(
    payload: TypingPayload,
    endpoint: &Endpoint,
    state: &AppState,
) -> Result<(), RelayError> {
    let conversation_id = required(payload.conversation_id, "conversationId")?;
    let is_typing = payload
        .is_typing
        .ok_or_else(|| RelayError::Validation("isTyping is required".to_string()))?;

    state.typing.set_typing(&conversation_id, endpoint, is_typing);
    Ok(())
}

fn handle_join(
    payload: ConversationPayload,
    endpoint: &Endpoint,
    state: &AppState,
) -> Result<(), RelayError> {
    let conversation_id = required(payload.conversation_id, "conversationId")?;
    state.rooms.join(&conversation_id, endpoint);
    Ok(())
}

fn handle_leave(
    payload: ConversationPayload,
    endpoint: &Endpoint,
    state: &AppState,
) -> Result<(), RelayError> {
    let conversation_id = required(payload.conversation_id, "conversationId")?;
    state.rooms.leave(&conversation_id, endpoint);
    Ok(())
}

fn handle_get_online_users(endpoint: &Endpoint, state: &AppState) -> Result<(), RelayError> {
    let event = ServerEvent::OnlineUsers(OnlineUsersEvent {
        users: state.connections.all_online_identities(),
    });
    if let Err(e) = endpoint.send(&event) {
        tracing::warn!(endpoint_id = %endpoint.id(), error = %e, "Failed to send online users");
    }
    Ok(())
}

/// Trimmed, non-empty value of a required field.
pub(crate) fn required(value: Option<String>, field: &str) -> Result<String, RelayError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(RelayError::Validation(format!("{} is required", field))),
    }
}

/// Send an `error` event. Best-effort: a closed endpoint is only logged.
pub fn send_error(endpoint: &Endpoint, message: &str) {
    let event = ServerEvent::Error(ErrorEvent {
        message: message.to_string(),
    });
    if let Err(e) = endpoint.send(&event) {
        tracing::debug!(endpoint_id = %endpoint.id(), error = %e, "Failed to send error event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;
    use crate::ws::testing::drain_events;

    #[test]
    fn test_decode_private_message() {
        let raw = r#"{"event":"private_message","data":{"conversationId":"c1","recipientId":"bob","content":"hi","kind":"image"}}"#;
        match serde_json::from_str::<ClientEvent>(raw).unwrap() {
            ClientEvent::PrivateMessage(p) => {
                assert_eq!(p.conversation_id.as_deref(), Some("c1"));
                assert_eq!(p.recipient_id.as_deref(), Some("bob"));
                assert_eq!(p.kind, Some(MessageKind::Image));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_decode_get_online_users_without_data() {
        let event: ClientEvent = serde_json::from_str(r#"{"event":"get_online_users"}"#).unwrap();
        assert!(matches!(event, ClientEvent::GetOnlineUsers));
    }

    #[test]
    fn test_encode_server_event_shape() {
        let event = ServerEvent::MessageDelivered(DeliveredEvent {
            conversation_id: "c1".into(),
            message_id: "m1".into(),
            timestamp: 42,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "message_delivered");
        assert_eq!(value["data"]["messageId"], "m1");
        assert_eq!(value["data"]["conversationId"], "c1");
    }

    #[test]
    fn test_required_rejects_blank() {
        assert!(required(None, "x").is_err());
        assert!(required(Some("   ".into()), "x").is_err());
        assert_eq!(required(Some(" c1 ".into()), "x").unwrap(), "c1");
    }

    #[tokio::test]
    async fn test_missing_recipient_yields_single_error_and_no_store_call() {
        let (state, store, notifier) = test_state();
        let (alice, mut alice_rx) = Endpoint::with_channel("alice");
        state.connections.register(&alice);

        let raw = r#"{"event":"private_message","data":{"conversationId":"c1","content":"hello"}}"#;
        handle_text_message(raw, &alice, &state).await;

        let events = drain_events(&mut alice_rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ServerEvent::Error(e) => assert!(e.message.contains("recipientId")),
            other => panic!("expected error event, got {:?}", other),
        }
        assert_eq!(store.insert_count(), 0);
        assert_eq!(notifier.calls().len(), 0);
    }

    #[tokio::test]
    async fn test_malformed_json_yields_error() {
        let (state, _store, _notifier) = test_state();
        let (alice, mut alice_rx) = Endpoint::with_channel("alice");

        handle_text_message("{not json", &alice, &state).await;
        handle_text_message(r#"{"event":"fly_away"}"#, &alice, &state).await;

        let events = drain_events(&mut alice_rx);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(e, ServerEvent::Error(_))));
    }

    #[tokio::test]
    async fn test_typing_requires_flag() {
        let (state, _store, _notifier) = test_state();
        let (alice, mut alice_rx) = Endpoint::with_channel("alice");

        handle_text_message(
            r#"{"event":"typing","data":{"conversationId":"c1"}}"#,
            &alice,
            &state,
        )
        .await;

        let events = drain_events(&mut alice_rx);
        assert!(matches!(&events[..], [ServerEvent::Error(_)]));
        assert!(state.typing.typing_users_of("c1").is_empty());
    }

    #[tokio::test]
    async fn test_get_online_users() {
        let (state, _store, _notifier) = test_state();
        let (alice, mut alice_rx) = Endpoint::with_channel("alice");
        let (bob, _bob_rx) = Endpoint::with_channel("bob");
        state.connections.register(&alice);
        state.connections.register(&bob);

        handle_text_message(r#"{"event":"get_online_users"}"#, &alice, &state).await;

        let events = drain_events(&mut alice_rx);
        assert_eq!(
            events,
            vec![ServerEvent::OnlineUsers(OnlineUsersEvent {
                users: vec!["alice".to_string(), "bob".to_string()],
            })]
        );
    }
}
