//! Notification queue backing the push fallback.
//!
//! When a message is sent to an offline user, a notification row is queued.
//! On reconnection, the client calls GET /api/notifications to retrieve them.
//! A background task purges queue entries older than the retention window.

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::PushNotifier;
use crate::auth::middleware::Claims;
use crate::db::DbPool;
use crate::error::NotifyError;
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct QueueNotifier {
    db: DbPool,
}

impl QueueNotifier {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PushNotifier for QueueNotifier {
    async fn notify(&self, identity: &str, title: &str, preview: &str) -> Result<(), NotifyError> {
        let db = self.db.clone();
        let recipient = identity.to_string();
        let title = title.to_string();
        let preview = preview.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|e| NotifyError(format!("DB lock error: {}", e)))?;
            conn.execute(
                "INSERT INTO notifications (id, recipient_id, title, preview) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![uuid::Uuid::now_v7().to_string(), recipient, title, preview],
            )
            .map_err(|e| NotifyError(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| NotifyError(format!("Task join: {}", e)))?
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingNotification {
    pub id: String,
    pub title: String,
    pub preview: String,
    pub queued_at: String,
}

#[derive(Debug, Deserialize)]
pub struct AckNotificationsRequest {
    pub ids: Vec<String>,
}

/// GET /api/notifications: pending notifications for the authenticated user.
/// JWT auth required. Returned entries are marked as delivered.
pub async fn get_notifications(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<PendingNotification>>, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub;

    let pending = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let mut stmt = conn
            .prepare(
                "SELECT id, title, preview, queued_at FROM notifications
                 WHERE recipient_id = ?1 AND delivered = 0
                 ORDER BY queued_at ASC, id ASC",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let pending: Vec<PendingNotification> = stmt
            .query_map(rusqlite::params![user_id], |row| {
                Ok(PendingNotification {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    preview: row.get(2)?,
                    queued_at: row.get(3)?,
                })
            })
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        conn.execute(
            "UPDATE notifications SET delivered = 1 WHERE recipient_id = ?1 AND delivered = 0",
            rusqlite::params![user_id],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Ok::<_, StatusCode>(pending)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(pending))
}

/// POST /api/notifications/ack: mark specific notifications delivered.
/// Only the caller's own notifications are affected.
pub async fn ack_notifications(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<AckNotificationsRequest>,
) -> Result<StatusCode, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub;

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        for id in &body.ids {
            conn.execute(
                "UPDATE notifications SET delivered = 1 WHERE recipient_id = ?1 AND id = ?2",
                rusqlite::params![user_id, id],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        }
        Ok::<(), StatusCode>(())
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(StatusCode::OK)
}

/// Delete notifications queued more than `retention_days` ago.
pub fn purge_expired(
    db: &DbPool,
    retention_days: u32,
) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
    let conn = db.lock().map_err(|e| format!("DB lock error: {}", e))?;
    let count = conn.execute(
        "DELETE FROM notifications WHERE queued_at < datetime('now', ?1)",
        rusqlite::params![format!("-{} days", retention_days)],
    )?;
    Ok(count)
}

/// Spawn the background cleanup task for the notification queue.
pub fn spawn_cleanup(db: DbPool, retention_days: u32, interval: Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            let db_clone = db.clone();
            let _ = tokio::task::spawn_blocking(move || {
                match purge_expired(&db_clone, retention_days) {
                    Ok(count) => {
                        if count > 0 {
                            tracing::info!("Cleaned up {} expired notifications", count);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to clean up notification queue: {}", e);
                    }
                }
            })
            .await;
        }
    });
}
