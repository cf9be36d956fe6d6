pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod protocol;
pub mod registry;

use axum::extract::ws::Message;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::DeliveryError;
use crate::ws::protocol::ServerEvent;

pub use registry::ConnectionRegistry;

/// Sender half of a WebSocket connection's outbound channel.
/// Cloned by any part of the system that needs to push frames to one client.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

pub type EndpointId = Uuid;

/// One live WebSocket connection, bound to a single identity for its lifetime.
///
/// The identity is fixed at construction and has no setter, so an endpoint can
/// never change owner mid-connection.
#[derive(Debug, Clone)]
pub struct Endpoint {
    id: EndpointId,
    identity: String,
    tx: ConnectionSender,
}

impl Endpoint {
    pub fn new(identity: impl Into<String>, tx: ConnectionSender) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity: identity.into(),
            tx,
        }
    }

    /// Create an endpoint together with the receiving half of its channel.
    pub fn with_channel(identity: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(identity, tx), rx)
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Serialize an event as a JSON text frame and queue it for this client.
    pub fn send(&self, event: &ServerEvent) -> Result<(), DeliveryError> {
        let json = serde_json::to_string(event)?;
        self.send_frame(Message::Text(json.into()))
    }

    /// Queue a raw frame (ping, pong, close) for this client.
    pub fn send_frame(&self, frame: Message) -> Result<(), DeliveryError> {
        self.tx.send(frame).map_err(|_| DeliveryError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
