//! Typing indicators with server-enforced expiry.
//!
//! Each (conversation, identity) entry owns the handle of its expiry timer and
//! remembers the endpoint that last set it. Replacing or clearing an entry
//! aborts that timer. Timers also carry a generation number: a timer that
//! already woke up before being aborted only expires the entry if the
//! generation still matches, so it can never clear a refreshed entry.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::chat::rooms::RoomManager;
use crate::ws::protocol::{now_millis, ServerEvent, TypingEvent};
use crate::ws::{Endpoint, EndpointId};

/// Default time an unrefreshed typing flag stays set.
pub const DEFAULT_TYPING_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug)]
struct TypingEntry {
    generation: u64,
    owner: EndpointId,
    timer: JoinHandle<()>,
}

#[derive(Debug, Clone)]
pub struct TypingTracker {
    entries: Arc<DashMap<String, HashMap<String, TypingEntry>>>,
    next_generation: Arc<AtomicU64>,
    rooms: RoomManager,
    ttl: Duration,
}

impl TypingTracker {
    pub fn new(rooms: RoomManager, ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            next_generation: Arc::new(AtomicU64::new(0)),
            rooms,
            ttl,
        }
    }

    /// Set or clear the endpoint identity's typing flag and broadcast it to the
    /// conversation room. `true` (re)starts the expiry timer; `false` cancels it.
    pub fn set_typing(&self, conversation_id: &str, endpoint: &Endpoint, is_typing: bool) {
        let identity = endpoint.identity();
        if !is_typing {
            self.cancel(conversation_id, identity);
            self.broadcast(conversation_id, identity, false);
            return;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let timer = self.spawn_expiry(conversation_id, identity, generation);
        let previous = self
            .entries
            .entry(conversation_id.to_string())
            .or_default()
            .insert(
                identity.to_string(),
                TypingEntry {
                    generation,
                    owner: endpoint.id(),
                    timer,
                },
            );
        if let Some(previous) = previous {
            previous.timer.abort();
        }

        self.broadcast(conversation_id, identity, true);
    }

    /// Drop the entry (if any) and broadcast the cleared flag.
    /// Returns whether an entry was removed.
    pub fn clear(&self, conversation_id: &str, identity: &str) -> bool {
        let removed = self.cancel(conversation_id, identity);
        self.broadcast(conversation_id, identity, false);
        removed
    }

    /// Remove every typing entry last set by `endpoint`, broadcasting a
    /// cleared flag for each removal. Entries refreshed by another endpoint of
    /// the same identity are left alone. Returns the number of removals.
    pub fn clear_all_for(&self, endpoint: &Endpoint) -> usize {
        let identity = endpoint.identity();
        let conversations: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .get(identity)
                    .is_some_and(|typing| typing.owner == endpoint.id())
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut cleared = 0;
        for conversation_id in conversations {
            if self.cancel_owned(&conversation_id, identity, endpoint.id()) {
                self.broadcast(&conversation_id, identity, false);
                cleared += 1;
            }
        }
        cleared
    }

    /// Sorted identities currently typing in a conversation.
    pub fn typing_users_of(&self, conversation_id: &str) -> Vec<String> {
        let mut users: Vec<String> = self
            .entries
            .get(conversation_id)
            .map(|typing| typing.keys().cloned().collect())
            .unwrap_or_default();
        users.sort();
        users
    }

    fn spawn_expiry(&self, conversation_id: &str, identity: &str, generation: u64) -> JoinHandle<()> {
        let tracker = self.clone();
        let conversation_id = conversation_id.to_string();
        let identity = identity.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(tracker.ttl).await;
            tracker.expire(&conversation_id, &identity, generation);
        })
    }

    fn expire(&self, conversation_id: &str, identity: &str, generation: u64) {
        let expired = match self.entries.get_mut(conversation_id) {
            Some(mut typing) => {
                let current = typing.get(identity).map(|entry| entry.generation);
                if current == Some(generation) {
                    typing.remove(identity);
                    true
                } else {
                    false
                }
            }
            None => false,
        };
        if !expired {
            return;
        }

        self.entries
            .remove_if(conversation_id, |_, typing| typing.is_empty());
        tracing::debug!(
            user_id = %identity,
            conversation_id = %conversation_id,
            "Typing indicator expired"
        );
        self.broadcast(conversation_id, identity, false);
    }

    /// Remove an entry and abort its timer without broadcasting.
    fn cancel(&self, conversation_id: &str, identity: &str) -> bool {
        self.cancel_if(conversation_id, identity, |_| true)
    }

    /// Like `cancel`, but only if `owner` still owns the entry.
    fn cancel_owned(&self, conversation_id: &str, identity: &str, owner: EndpointId) -> bool {
        self.cancel_if(conversation_id, identity, |entry| entry.owner == owner)
    }

    fn cancel_if(
        &self,
        conversation_id: &str,
        identity: &str,
        matches: impl FnOnce(&TypingEntry) -> bool,
    ) -> bool {
        let removed = self.entries.get_mut(conversation_id).and_then(|mut typing| {
            if typing.get(identity).is_some_and(matches) {
                typing.remove(identity)
            } else {
                None
            }
        });
        self.entries
            .remove_if(conversation_id, |_, typing| typing.is_empty());

        match removed {
            Some(entry) => {
                entry.timer.abort();
                true
            }
            None => false,
        }
    }

    fn broadcast(&self, conversation_id: &str, identity: &str, is_typing: bool) {
        let event = ServerEvent::UserTyping(TypingEvent {
            identity: identity.to_string(),
            conversation_id: conversation_id.to_string(),
            is_typing,
            timestamp: now_millis(),
        });
        self.rooms.broadcast_except(conversation_id, identity, &event);
    }
}
