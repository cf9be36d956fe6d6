use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::state::AppState;
use crate::ws::broadcast::close_endpoint;
use crate::ws::protocol;
use crate::ws::Endpoint;

/// Ping interval: server sends WebSocket ping every 30 seconds.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if pong not received within 10 seconds after ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Close code sent when a client stops answering pings.
const CLOSE_GOING_AWAY: u16 = 1001;

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards frames from the endpoint's channel
/// - Reader loop: decodes inbound events and awaits each handler in turn
///
/// The endpoint is bound to `identity` for its whole lifetime. On exit the
/// endpoint leaves every room, its typing flags are cleared, and it is
/// unregistered (announcing offline if it was the identity's last one).
pub async fn run_connection(socket: WebSocket, state: AppState, identity: String) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (endpoint, rx) = Endpoint::with_channel(identity);

    state.presence.connect(&endpoint);
    state.presence.send_snapshot(&endpoint);

    tracing::info!(
        user_id = %endpoint.identity(),
        endpoint_id = %endpoint.id(),
        "WebSocket actor started"
    );

    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    let ping_endpoint = endpoint.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_endpoint
                .send_frame(Message::Ping(vec![1, 2, 3, 4].into()))
                .is_err()
            {
                // Writer task has died, connection is gone
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!(
                        user_id = %ping_endpoint.identity(),
                        endpoint_id = %ping_endpoint.id(),
                        "Pong timeout, closing connection"
                    );
                    close_endpoint(&ping_endpoint, CLOSE_GOING_AWAY, "Pong timeout");
                    break;
                }
            }
        }
    });

    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_message(text.as_str(), &endpoint, &state).await;
                }
                Message::Binary(data) => {
                    tracing::debug!(
                        endpoint_id = %endpoint.id(),
                        bytes = data.len(),
                        "Ignoring binary frame"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = endpoint.send_frame(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %endpoint.identity(),
                        endpoint_id = %endpoint.id(),
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %endpoint.identity(),
                    endpoint_id = %endpoint.id(),
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(endpoint_id = %endpoint.id(), "WebSocket stream ended");
                break;
            }
        }
    }

    writer_handle.abort();
    ping_handle.abort();

    let cleared = state.typing.clear_all_for(&endpoint);
    let left = state.rooms.leave_all(&endpoint);
    state.presence.disconnect(&endpoint);

    tracing::info!(
        user_id = %endpoint.identity(),
        endpoint_id = %endpoint.id(),
        rooms_left = left,
        typing_cleared = cleared,
        "WebSocket actor stopped"
    );
}

/// Writer task: receives frames from the endpoint channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            break;
        }
    }
}
