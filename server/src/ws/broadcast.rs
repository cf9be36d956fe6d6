use axum::extract::ws::{CloseFrame, Message};

use super::protocol::ServerEvent;
use super::Endpoint;

/// Send an event to each endpoint. Per-endpoint failures are soft: logged
/// and skipped. Returns how many endpoints accepted the event.
pub fn send_to_endpoints<'a>(
    endpoints: impl IntoIterator<Item = &'a Endpoint>,
    event: &ServerEvent,
) -> usize {
    let mut delivered = 0;
    for endpoint in endpoints {
        match endpoint.send(event) {
            Ok(()) => delivered += 1,
            Err(e) => {
                tracing::warn!(
                    user_id = %endpoint.identity(),
                    endpoint_id = %endpoint.id(),
                    error = %e,
                    "Delivery to endpoint failed"
                );
            }
        }
    }
    delivered
}

/// Close a single connection with the given code and reason.
pub fn close_endpoint(endpoint: &Endpoint, close_code: u16, reason: &str) {
    let frame = CloseFrame {
        code: close_code,
        reason: reason.into(),
    };
    let _ = endpoint.send_frame(Message::Close(Some(frame)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::ErrorEvent;
    use crate::ws::testing::drain_events;

    #[test]
    fn test_closed_endpoint_is_skipped() {
        let (open, mut open_rx) = Endpoint::with_channel("alice");
        let (closed, closed_rx) = Endpoint::with_channel("alice");
        drop(closed_rx);

        let event = ServerEvent::Error(ErrorEvent {
            message: "x".into(),
        });
        let delivered = send_to_endpoints([&open, &closed], &event);

        assert_eq!(delivered, 1);
        assert_eq!(drain_events(&mut open_rx), vec![event]);
    }
}
