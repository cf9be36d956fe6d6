//! Conversation rooms: which endpoints are subscribed to a conversation's
//! broadcast scope.
//!
//! Membership lives in two maps, room -> members and endpoint -> rooms, so a
//! disconnecting endpoint can be purged without scanning every room. A guard
//! on one map is never held while locking the other.

use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::ws::broadcast::send_to_endpoints;
use crate::ws::protocol::{now_millis, RoomEvent, ServerEvent};
use crate::ws::{Endpoint, EndpointId};

#[derive(Debug, Clone, Default)]
pub struct RoomManager {
    rooms: Arc<DashMap<String, HashMap<EndpointId, Endpoint>>>,
    memberships: Arc<DashMap<EndpointId, HashSet<String>>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe an endpoint to a conversation and notify the existing members.
    /// Returns `false` (and broadcasts nothing) if it was already a member.
    pub fn join(&self, conversation_id: &str, endpoint: &Endpoint) -> bool {
        let existing: Vec<Endpoint> = {
            let mut room = self.rooms.entry(conversation_id.to_string()).or_default();
            if room.contains_key(&endpoint.id()) {
                return false;
            }
            let existing = room.values().cloned().collect();
            room.insert(endpoint.id(), endpoint.clone());
            existing
        };

        self.memberships
            .entry(endpoint.id())
            .or_default()
            .insert(conversation_id.to_string());

        tracing::debug!(
            user_id = %endpoint.identity(),
            conversation_id = %conversation_id,
            "Joined conversation room"
        );

        let event = ServerEvent::UserJoined(RoomEvent {
            identity: endpoint.identity().to_string(),
            conversation_id: conversation_id.to_string(),
            timestamp: now_millis(),
        });
        send_to_endpoints(&existing, &event);
        true
    }

    /// Unsubscribe an endpoint and notify the remaining members.
    /// Returns `false` if it was not a member.
    pub fn leave(&self, conversation_id: &str, endpoint: &Endpoint) -> bool {
        let Some(remaining) = self.detach(conversation_id, endpoint.id()) else {
            return false;
        };

        if let Some(mut rooms) = self.memberships.get_mut(&endpoint.id()) {
            rooms.remove(conversation_id);
        }
        self.memberships
            .remove_if(&endpoint.id(), |_, rooms| rooms.is_empty());

        self.announce_left(conversation_id, endpoint, &remaining);
        true
    }

    /// Purge an endpoint from every room it had joined. Called once per
    /// disconnecting endpoint; each room's remaining members are notified.
    pub fn leave_all(&self, endpoint: &Endpoint) -> usize {
        let conversations = self
            .memberships
            .remove(&endpoint.id())
            .map(|(_, rooms)| rooms)
            .unwrap_or_default();

        let mut left = 0;
        for conversation_id in conversations {
            if let Some(remaining) = self.detach(&conversation_id, endpoint.id()) {
                self.announce_left(&conversation_id, endpoint, &remaining);
                left += 1;
            }
        }
        left
    }

    pub fn members_of(&self, conversation_id: &str) -> Vec<Endpoint> {
        self.rooms
            .get(conversation_id)
            .map(|room| room.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Conversations an endpoint is currently subscribed to.
    pub fn rooms_of(&self, endpoint: &Endpoint) -> Vec<String> {
        let mut rooms: Vec<String> = self
            .memberships
            .get(&endpoint.id())
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    /// Broadcast to every member of a room whose identity differs from `identity`.
    pub fn broadcast_except(&self, conversation_id: &str, identity: &str, event: &ServerEvent) -> usize {
        let targets: Vec<Endpoint> = self
            .members_of(conversation_id)
            .into_iter()
            .filter(|member| member.identity() != identity)
            .collect();
        send_to_endpoints(&targets, event)
    }

    /// Remove one member from a room, dropping the room once it is empty.
    /// Returns the remaining members, or `None` if the endpoint was not there.
    fn detach(&self, conversation_id: &str, endpoint_id: EndpointId) -> Option<Vec<Endpoint>> {
        let remaining = {
            let mut room = self.rooms.get_mut(conversation_id)?;
            room.remove(&endpoint_id)?;
            room.values().cloned().collect::<Vec<_>>()
        };
        self.rooms.remove_if(conversation_id, |_, room| room.is_empty());
        Some(remaining)
    }

    fn announce_left(&self, conversation_id: &str, endpoint: &Endpoint, remaining: &[Endpoint]) {
        tracing::debug!(
            user_id = %endpoint.identity(),
            conversation_id = %conversation_id,
            "Left conversation room"
        );
        let event = ServerEvent::UserLeft(RoomEvent {
            identity: endpoint.identity().to_string(),
            conversation_id: conversation_id.to_string(),
            timestamp: now_millis(),
        });
        send_to_endpoints(remaining, &event);
    }
}
