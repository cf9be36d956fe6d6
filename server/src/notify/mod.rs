//! Out-of-band notifications for recipients with no live connection.

pub mod queue;

use async_trait::async_trait;

use crate::error::NotifyError;

pub use queue::QueueNotifier;

/// Best-effort alert delivery. Any retry or queueing policy lives behind
/// this trait; the relay only logs failures.
#[async_trait]
pub trait PushNotifier: Send + Sync {
    async fn notify(&self, identity: &str, title: &str, preview: &str) -> Result<(), NotifyError>;
}

/// Truncate content to at most `max_chars` characters, appending an ellipsis
/// when anything was cut. Counts chars, not bytes.
pub fn preview(content: &str, max_chars: usize) -> String {
    let mut chars = content.char_indices();
    match chars.nth(max_chars) {
        Some((cut, _)) => format!("{}…", &content[..cut]),
        None => content.to_string(),
    }
}

pub fn message_title(sender_id: &str) -> String {
    format!("New message from {}", sender_id)
}
