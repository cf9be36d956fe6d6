use std::sync::Arc;
use std::time::Duration;

use crate::auth::{Authenticator, ConnectionGate, JwtAuthenticator};
use crate::chat::presence::PresenceBroadcaster;
use crate::chat::relay::{MessageRelay, DEFAULT_PREVIEW_CHARS};
use crate::chat::rooms::RoomManager;
use crate::chat::store::MessageStore;
use crate::chat::typing::{TypingTracker, DEFAULT_TYPING_TIMEOUT};
use crate::db::{DbPool, SqliteMessageStore};
use crate::notify::{PushNotifier, QueueNotifier};
use crate::ws::ConnectionRegistry;

/// Tunables for the relay core.
#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    /// How long an unrefreshed typing flag stays set
    pub typing_timeout: Duration,
    /// Characters of message content kept in a push preview
    pub preview_chars: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            typing_timeout: DEFAULT_TYPING_TIMEOUT,
            preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }
}

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret for the REST Claims extractor
    pub jwt_secret: Vec<u8>,
    /// Authenticates WebSocket handshakes
    pub gate: ConnectionGate,
    /// Live WebSocket endpoints per identity
    pub connections: ConnectionRegistry,
    pub presence: PresenceBroadcaster,
    pub rooms: RoomManager,
    pub typing: TypingTracker,
    pub relay: MessageRelay,
}

impl AppState {
    /// Production wiring: JWT authenticator, SQLite store, queued notifications.
    pub fn new(db: DbPool, jwt_secret: Vec<u8>, settings: RelaySettings) -> Self {
        let authenticator = Arc::new(JwtAuthenticator::new(jwt_secret.clone()));
        let store = Arc::new(SqliteMessageStore::new(db.clone()));
        let notifier = Arc::new(QueueNotifier::new(db.clone()));
        Self::with_collaborators(db, jwt_secret, authenticator, store, notifier, settings)
    }

    pub fn with_collaborators(
        db: DbPool,
        jwt_secret: Vec<u8>,
        authenticator: Arc<dyn Authenticator>,
        store: Arc<dyn MessageStore>,
        notifier: Arc<dyn PushNotifier>,
        settings: RelaySettings,
    ) -> Self {
        let connections = ConnectionRegistry::new();
        let rooms = RoomManager::new();
        let typing = TypingTracker::new(rooms.clone(), settings.typing_timeout);
        let presence = PresenceBroadcaster::new(connections.clone());
        let relay = MessageRelay::new(
            connections.clone(),
            typing.clone(),
            store,
            notifier,
            settings.preview_chars,
        );

        Self {
            db,
            jwt_secret,
            gate: ConnectionGate::new(authenticator),
            connections,
            presence,
            rooms,
            typing,
            relay,
        }
    }
}
