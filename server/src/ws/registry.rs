use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

use super::{Endpoint, EndpointId};

/// Tracks all live WebSocket endpoints per identity.
/// A user can have multiple concurrent connections (multiple devices/tabs).
///
/// An identity is online iff its endpoint map is non-empty; empty maps are
/// removed eagerly so presence never has to look past the key.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<DashMap<String, HashMap<EndpointId, Endpoint>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint under its bound identity. Idempotent.
    ///
    /// Returns `true` only when this call took the identity from offline to
    /// online; that is the single transition presence must announce.
    pub fn register(&self, endpoint: &Endpoint) -> bool {
        let mut endpoints = self
            .inner
            .entry(endpoint.identity().to_string())
            .or_default();
        let was_offline = endpoints.is_empty();
        let inserted = endpoints.insert(endpoint.id(), endpoint.clone()).is_none();
        let count = endpoints.len();
        drop(endpoints);

        tracing::debug!(
            user_id = %endpoint.identity(),
            endpoint_id = %endpoint.id(),
            connections = count,
            "Connection registered"
        );
        was_offline && inserted
    }

    /// Remove an endpoint. Unknown endpoints are a no-op.
    ///
    /// Returns `true` only when this call removed the identity's last endpoint.
    pub fn unregister(&self, endpoint: &Endpoint) -> bool {
        let went_offline = match self.inner.entry(endpoint.identity().to_string()) {
            Entry::Occupied(mut entry) => {
                let removed = entry.get_mut().remove(&endpoint.id()).is_some();
                if entry.get().is_empty() {
                    entry.remove();
                    removed
                } else {
                    false
                }
            }
            Entry::Vacant(_) => false,
        };

        tracing::debug!(
            user_id = %endpoint.identity(),
            endpoint_id = %endpoint.id(),
            went_offline,
            "Connection unregistered"
        );
        went_offline
    }

    pub fn is_online(&self, identity: &str) -> bool {
        self.inner
            .get(identity)
            .map(|endpoints| !endpoints.is_empty())
            .unwrap_or(false)
    }

    /// Snapshot of an identity's endpoints, read under the key's shard lock.
    pub fn endpoints_of(&self, identity: &str) -> Vec<Endpoint> {
        self.inner
            .get(identity)
            .map(|endpoints| endpoints.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Sorted list of every identity with at least one live endpoint.
    pub fn all_online_identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self
            .inner
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        identities.sort();
        identities
    }

    /// Snapshot of every live endpoint, for platform-wide broadcasts.
    pub fn all_endpoints(&self) -> Vec<Endpoint> {
        self.inner
            .iter()
            .flat_map(|entry| entry.value().values().cloned().collect::<Vec<_>>())
            .collect()
    }
}
