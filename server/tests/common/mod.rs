//! Shared helpers for integration tests: a real server on a random port and
//! JSON WebSocket clients.

#![allow(dead_code)]

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use presence_relay::state::{AppState, RelaySettings};

pub type WsWrite = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
pub type WsRead = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub base_url: String,
    pub jwt_secret: Vec<u8>,
    _data_dir: tempfile::TempDir,
}

impl TestServer {
    pub fn token_for(&self, identity: &str) -> String {
        presence_relay::auth::jwt::issue_access_token(&self.jwt_secret, identity)
            .expect("Failed to issue token")
    }
}

/// Start the server on a random port with a short typing timeout.
pub async fn start_test_server() -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = presence_relay::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = presence_relay::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    let settings = RelaySettings {
        typing_timeout: Duration::from_secs(1),
        ..RelaySettings::default()
    };
    let state = AppState::new(db, jwt_secret.clone(), settings);

    let app = presence_relay::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        addr,
        base_url: format!("http://{}", addr),
        jwt_secret,
        _data_dir: tmp_dir,
    }
}

/// Open a raw WebSocket with the given query string.
pub async fn open_ws(server: &TestServer, query: &str) -> (WsWrite, WsRead) {
    let ws_url = format!("ws://{}/ws{}", server.addr, query);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream.split()
}

/// Connect as `identity` and wait until the server has registered the endpoint.
pub async fn connect(server: &TestServer, identity: &str) -> (WsWrite, WsRead) {
    let token = server.token_for(identity);
    let (mut write, mut read) = open_ws(server, &format!("?token={}", token)).await;

    // The reply is produced by the connection actor after registration
    send_event(&mut write, json!({ "event": "get_online_users" })).await;
    wait_for(&mut read, "online_users").await;

    (write, read)
}

pub async fn send_event(write: &mut WsWrite, event: Value) {
    write
        .send(Message::Text(event.to_string().into()))
        .await
        .expect("Failed to send event");
}

/// Next JSON event, skipping control frames. None on timeout or close.
pub async fn next_event(read: &mut WsRead, wait: Duration) -> Option<Value> {
    loop {
        match tokio::time::timeout(wait, read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                return Some(serde_json::from_str(text.as_str()).expect("Server sent invalid JSON"));
            }
            Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => continue,
            _ => return None,
        }
    }
}

/// Read events until one named `name` arrives; panics after two seconds.
pub async fn wait_for(read: &mut WsRead, name: &str) -> Value {
    loop {
        match next_event(read, Duration::from_secs(2)).await {
            Some(event) if event["event"] == name => return event,
            Some(_) => continue,
            None => panic!("Timed out waiting for '{}' event", name),
        }
    }
}

/// Collect every event that arrives within `wait`.
pub async fn collect_events(read: &mut WsRead, wait: Duration) -> Vec<Value> {
    let mut events = Vec::new();
    while let Some(event) = next_event(read, wait).await {
        events.push(event);
    }
    events
}

pub async fn send_private_message(
    write: &mut WsWrite,
    conversation_id: &str,
    recipient_id: &str,
    content: &str,
) {
    send_event(
        write,
        json!({
            "event": "private_message",
            "data": {
                "conversationId": conversation_id,
                "recipientId": recipient_id,
                "content": content,
            }
        }),
    )
    .await;
}
