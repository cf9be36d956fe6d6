//! Message relay: validate, persist, deliver or fall back, acknowledge.
//!
//! A message is never broadcast before the store has accepted it. Exactly one
//! of direct delivery or push fallback is attempted per send, chosen from a
//! single snapshot of the recipient's endpoints. Delivery and fallback
//! failures are soft: logged, never returned to the sender.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::chat::store::MessageStore;
use crate::chat::typing::TypingTracker;
use crate::db::models::{Message, NewMessage};
use crate::error::RelayError;
use crate::notify::{self, PushNotifier};
use crate::ws::broadcast::send_to_endpoints;
use crate::ws::protocol::{required, DeliveredEvent, MessageEvent, PrivateMessagePayload, ServerEvent};
use crate::ws::{ConnectionRegistry, Endpoint};

/// Default number of characters kept in a push preview.
pub const DEFAULT_PREVIEW_CHARS: usize = 100;

/// Which delivery path a send took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Emitted to this many live recipient endpoints.
    Direct(usize),
    /// Recipient had no endpoints; the push notifier was invoked.
    PushFallback,
}

#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub message: Message,
    pub delivery: Delivery,
}

type SendKey = (String, String);

#[derive(Clone)]
pub struct MessageRelay {
    connections: ConnectionRegistry,
    typing: TypingTracker,
    store: Arc<dyn MessageStore>,
    notifier: Arc<dyn PushNotifier>,
    preview_chars: usize,
    /// One lock per (sender, conversation) so a sender's messages in a
    /// conversation are persisted and delivered in submission order.
    send_locks: Arc<DashMap<SendKey, Arc<Mutex<()>>>>,
}

impl MessageRelay {
    pub fn new(
        connections: ConnectionRegistry,
        typing: TypingTracker,
        store: Arc<dyn MessageStore>,
        notifier: Arc<dyn PushNotifier>,
        preview_chars: usize,
    ) -> Self {
        Self {
            connections,
            typing,
            store,
            notifier,
            preview_chars,
            send_locks: Arc::new(DashMap::new()),
        }
    }

    /// Relay a private message from `origin`.
    ///
    /// On success the origin endpoint has received a `message_delivered`
    /// acknowledgment. On error nothing was persisted or broadcast, and the
    /// caller is responsible for reporting the error to the origin.
    pub async fn send(
        &self,
        origin: &Endpoint,
        payload: PrivateMessagePayload,
    ) -> Result<SendOutcome, RelayError> {
        let draft = validate(origin.identity(), payload)?;

        let key = (draft.sender_id.clone(), draft.conversation_id.clone());
        let lock = self.send_locks.entry(key.clone()).or_default().clone();
        let outcome = {
            let _ordered = lock.lock().await;
            self.persist_and_deliver(origin, draft).await
        };
        drop(lock);
        self.send_locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);

        outcome
    }

    async fn persist_and_deliver(
        &self,
        origin: &Endpoint,
        draft: NewMessage,
    ) -> Result<SendOutcome, RelayError> {
        let message = self.store.insert(draft).await.map_err(|e| {
            tracing::warn!(
                user_id = %origin.identity(),
                error = %e,
                "Message persistence failed, discarding"
            );
            RelayError::Persistence(e)
        })?;

        let recipients = self.connections.endpoints_of(&message.recipient_id);
        let delivery = if recipients.is_empty() {
            self.push_fallback(&message).await;
            Delivery::PushFallback
        } else {
            let event = ServerEvent::PrivateMessage(MessageEvent::from(&message));
            send_to_endpoints(&recipients, &event);
            Delivery::Direct(recipients.len())
        };

        let ack = ServerEvent::MessageDelivered(DeliveredEvent {
            conversation_id: message.conversation_id.clone(),
            message_id: message.id.clone(),
            timestamp: message.created_at,
        });
        if let Err(e) = origin.send(&ack) {
            tracing::warn!(
                user_id = %origin.identity(),
                endpoint_id = %origin.id(),
                error = %e,
                "Failed to acknowledge message"
            );
        }

        self.typing
            .clear(&message.conversation_id, &message.sender_id);

        tracing::debug!(
            message_id = %message.id,
            conversation_id = %message.conversation_id,
            delivery = ?delivery,
            "Message relayed"
        );
        Ok(SendOutcome { message, delivery })
    }

    async fn push_fallback(&self, message: &Message) {
        let title = notify::message_title(&message.sender_id);
        let preview = notify::preview(&message.content, self.preview_chars);
        if let Err(e) = self
            .notifier
            .notify(&message.recipient_id, &title, &preview)
            .await
        {
            tracing::warn!(
                user_id = %message.recipient_id,
                message_id = %message.id,
                error = %e,
                "Push fallback failed"
            );
        }
    }

    /// Load a message the requester takes part in.
    async fn participant_message(&self, requester: &str, message_id: &str) -> Result<Message, RelayError> {
        let message = self
            .store
            .get(message_id)
            .await
            .map_err(RelayError::from_store)?;
        if !message.is_participant(requester) {
            return Err(RelayError::Forbidden);
        }
        Ok(message)
    }

    /// Set the read flag. Idempotent.
    pub async fn mark_as_read(&self, requester: &str, message_id: &str) -> Result<(), RelayError> {
        self.participant_message(requester, message_id).await?;
        self.store
            .mark_read(message_id)
            .await
            .map_err(RelayError::from_store)
    }

    /// Set the important flag to `important`. Idempotent.
    pub async fn toggle_important(
        &self,
        requester: &str,
        message_id: &str,
        important: bool,
    ) -> Result<(), RelayError> {
        self.participant_message(requester, message_id).await?;
        self.store
            .set_important(message_id, important)
            .await
            .map_err(RelayError::from_store)
    }

    /// Delete a message. Only its sender may do so.
    pub async fn delete(&self, requester: &str, message_id: &str) -> Result<(), RelayError> {
        let message = self
            .store
            .get(message_id)
            .await
            .map_err(RelayError::from_store)?;
        if message.sender_id != requester {
            return Err(RelayError::Forbidden);
        }
        self.store
            .delete(message_id)
            .await
            .map_err(RelayError::from_store)?;
        tracing::info!(user_id = %requester, message_id = %message_id, "Message deleted");
        Ok(())
    }

    /// Record a report against a message.
    pub async fn report(&self, requester: &str, message_id: &str, reason: &str) -> Result<(), RelayError> {
        if reason.trim().is_empty() {
            return Err(RelayError::Validation("reason is required".to_string()));
        }
        self.participant_message(requester, message_id).await?;
        self.store
            .report(message_id, requester, reason.trim())
            .await
            .map_err(RelayError::from_store)?;
        tracing::info!(user_id = %requester, message_id = %message_id, "Message reported");
        Ok(())
    }
}

fn validate(sender_id: &str, payload: PrivateMessagePayload) -> Result<NewMessage, RelayError> {
    let conversation_id = required(payload.conversation_id, "conversationId")?;
    let recipient_id = required(payload.recipient_id, "recipientId")?;
    let content = match payload.content {
        Some(content) if !content.trim().is_empty() => content,
        _ => return Err(RelayError::Validation("content is required".to_string())),
    };

    Ok(NewMessage {
        conversation_id,
        sender_id: sender_id.to_string(),
        recipient_id,
        content,
        kind: payload.kind.unwrap_or_default(),
    })
}
