//! Platform-wide presence announcements.
//!
//! Presence is derived from the connection registry: an identity is online
//! while it has at least one endpoint. Only the first-connect and
//! last-disconnect transitions are announced. Announcements are advisory, with
//! no retry or queueing. Transitions and their announcements are serialized, so
//! observers see them in the order the registry applied them.

use axum::{extract::State, Json};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::auth::middleware::Claims;
use crate::state::AppState;
use crate::ws::broadcast::send_to_endpoints;
use crate::ws::protocol::{now_millis, PresenceEvent, PresenceStatus, ServerEvent};
use crate::ws::{ConnectionRegistry, Endpoint};

#[derive(Debug, Clone)]
pub struct PresenceBroadcaster {
    connections: ConnectionRegistry,
    transitions: Arc<Mutex<()>>,
}

impl PresenceBroadcaster {
    pub fn new(connections: ConnectionRegistry) -> Self {
        Self {
            connections,
            transitions: Arc::new(Mutex::new(())),
        }
    }

    /// Broadcast a presence change to every connected endpoint.
    pub fn announce(&self, identity: &str, status: PresenceStatus) -> usize {
        let event = presence_event(identity, status);
        let delivered = send_to_endpoints(&self.connections.all_endpoints(), &event);
        tracing::info!(
            user_id = %identity,
            status = ?status,
            recipients = delivered,
            "Presence announced"
        );
        delivered
    }

    /// Register an endpoint and announce the identity if it just came online.
    pub fn connect(&self, endpoint: &Endpoint) {
        let _transition = self.lock_transitions();
        if self.connections.register(endpoint) {
            self.announce(endpoint.identity(), PresenceStatus::Online);
        }
    }

    /// Unregister an endpoint and announce the identity if it just went offline.
    pub fn disconnect(&self, endpoint: &Endpoint) {
        let _transition = self.lock_transitions();
        if self.connections.unregister(endpoint) {
            self.announce(endpoint.identity(), PresenceStatus::Offline);
        }
    }

    // Held across register/unregister and the announcement. Sends never block.
    fn lock_transitions(&self) -> MutexGuard<'_, ()> {
        self.transitions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Send a newly connected endpoint the current presence of everyone else.
    pub fn send_snapshot(&self, endpoint: &Endpoint) {
        let others = self
            .connections
            .all_online_identities()
            .into_iter()
            .filter(|identity| identity != endpoint.identity());
        for identity in others {
            let event = presence_event(&identity, PresenceStatus::Online);
            if endpoint.send(&event).is_err() {
                break;
            }
        }
    }
}

fn presence_event(identity: &str, status: PresenceStatus) -> ServerEvent {
    let payload = PresenceEvent {
        identity: identity.to_string(),
        status,
        timestamp: now_millis(),
    };
    match status {
        PresenceStatus::Online => ServerEvent::UserOnline(payload),
        PresenceStatus::Offline => ServerEvent::UserOffline(payload),
    }
}

/// GET /api/presence: identities with at least one live connection. JWT auth required.
pub async fn get_presence(State(state): State<AppState>, _claims: Claims) -> Json<Vec<String>> {
    Json(state.connections.all_online_identities())
}
