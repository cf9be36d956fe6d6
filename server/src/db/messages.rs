//! SQLite-backed `MessageStore`.

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};

use super::models::{Message, NewMessage};
use super::DbPool;
use crate::chat::store::MessageStore;
use crate::error::StoreError;
use crate::ws::protocol::now_millis;

#[derive(Debug, Clone)]
pub struct SqliteMessageStore {
    db: DbPool,
}

impl SqliteMessageStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Run a closure against the connection on the blocking pool.
    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|e| StoreError::Database(format!("DB lock error: {}", e)))?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let kind: String = row.get(5)?;
    let created_at: i64 = row.get(8)?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        recipient_id: row.get(3)?,
        content: row.get(4)?,
        kind: kind.parse().unwrap_or_default(),
        is_read: row.get(6)?,
        is_important: row.get(7)?,
        created_at: created_at as u64,
    })
}

/// Fail with `NotFound` when an UPDATE/DELETE touched no row.
fn expect_row(changed: usize) -> Result<(), StoreError> {
    if changed == 0 {
        Err(StoreError::NotFound)
    } else {
        Ok(())
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn insert(&self, message: NewMessage) -> Result<Message, StoreError> {
        self.run(move |conn| {
            let stored = Message {
                id: uuid::Uuid::now_v7().to_string(),
                conversation_id: message.conversation_id,
                sender_id: message.sender_id,
                recipient_id: message.recipient_id,
                content: message.content,
                kind: message.kind,
                is_read: false,
                is_important: false,
                created_at: now_millis(),
            };
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, recipient_id, content, kind, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    stored.id,
                    stored.conversation_id,
                    stored.sender_id,
                    stored.recipient_id,
                    stored.content,
                    stored.kind.as_str(),
                    stored.created_at as i64,
                ],
            )?;
            Ok(stored)
        })
        .await
    }

    async fn get(&self, message_id: &str) -> Result<Message, StoreError> {
        let id = message_id.to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT id, conversation_id, sender_id, recipient_id, content, kind,
                        is_read, is_important, created_at
                 FROM messages WHERE id = ?1",
                rusqlite::params![id],
                row_to_message,
            )
            .map_err(StoreError::from)
        })
        .await
    }

    async fn mark_read(&self, message_id: &str) -> Result<(), StoreError> {
        let id = message_id.to_string();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_read = 1 WHERE id = ?1",
                rusqlite::params![id],
            )?;
            expect_row(changed)
        })
        .await
    }

    async fn set_important(&self, message_id: &str, important: bool) -> Result<(), StoreError> {
        let id = message_id.to_string();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_important = ?2 WHERE id = ?1",
                rusqlite::params![id, important],
            )?;
            expect_row(changed)
        })
        .await
    }

    async fn delete(&self, message_id: &str) -> Result<(), StoreError> {
        let id = message_id.to_string();
        self.run(move |conn| {
            let changed = conn.execute("DELETE FROM messages WHERE id = ?1", rusqlite::params![id])?;
            expect_row(changed)
        })
        .await
    }

    async fn report(
        &self,
        message_id: &str,
        reporter_id: &str,
        reason: &str,
    ) -> Result<(), StoreError> {
        let id = message_id.to_string();
        let reporter = reporter_id.to_string();
        let reason = reason.to_string();
        self.run(move |conn| {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM messages WHERE id = ?1",
                    rusqlite::params![id],
                    |_| Ok(()),
                )
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::NotFound);
            }
            conn.execute(
                "INSERT INTO message_reports (id, message_id, reporter_id, reason, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    uuid::Uuid::now_v7().to_string(),
                    id,
                    reporter,
                    reason,
                    now_millis() as i64,
                ],
            )?;
            Ok(())
        })
        .await
    }
}
