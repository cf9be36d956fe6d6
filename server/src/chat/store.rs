use async_trait::async_trait;

use crate::db::models::{Message, NewMessage};
use crate::error::StoreError;

/// Durable message storage consumed by the relay.
///
/// `insert` must only return once the message is durable; the relay never
/// broadcasts a message before this call succeeds.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new message, assigning its id and timestamp.
    async fn insert(&self, message: NewMessage) -> Result<Message, StoreError>;

    async fn get(&self, message_id: &str) -> Result<Message, StoreError>;

    /// Set the read flag. Marking an already-read message succeeds.
    async fn mark_read(&self, message_id: &str) -> Result<(), StoreError>;

    async fn set_important(&self, message_id: &str, important: bool) -> Result<(), StoreError>;

    async fn delete(&self, message_id: &str) -> Result<(), StoreError>;

    /// Record a report against a message without changing the message.
    async fn report(&self, message_id: &str, reporter_id: &str, reason: &str)
        -> Result<(), StoreError>;
}
