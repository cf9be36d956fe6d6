//! Integration tests for WebSocket auth, presence, rooms, typing and message relay.

mod common;

use common::*;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

async fn expect_close_code(read: &mut WsRead, expected: u16) {
    let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("Expected close message within timeout");

    match msg {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(frame.code, CloseCode::from(expected));
        }
        other => panic!("Expected close frame {}, got: {:?}", expected, other),
    }
}

#[tokio::test]
async fn test_ws_invalid_token_closes_with_4002() {
    let server = start_test_server().await;

    let (_write, mut read) = open_ws(&server, "?token=invalid_jwt_token").await;
    expect_close_code(&mut read, 4002).await;
}

#[tokio::test]
async fn test_ws_missing_token_closes_with_4002() {
    let server = start_test_server().await;

    let (_write, mut read) = open_ws(&server, "").await;
    expect_close_code(&mut read, 4002).await;
}

#[tokio::test]
async fn test_ws_expired_token_closes_with_4001() {
    let server = start_test_server().await;
    let now = chrono::Utc::now().timestamp();
    let claims = presence_relay::auth::middleware::Claims {
        sub: "alice".into(),
        iat: now - 7200,
        exp: now - 3600,
    };
    let token = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(&server.jwt_secret),
    )
    .unwrap();

    let (_write, mut read) = open_ws(&server, &format!("?token={}", token)).await;
    expect_close_code(&mut read, 4001).await;
}

#[tokio::test]
async fn test_ws_rejected_connection_is_not_online() {
    let server = start_test_server().await;
    let (_w, mut r) = open_ws(&server, "?token=garbage").await;
    expect_close_code(&mut r, 4002).await;

    let (_alice_w, _alice_r) = connect(&server, "alice").await;

    let resp = reqwest::Client::new()
        .get(format!("{}/api/presence", server.base_url))
        .bearer_auth(server.token_for("alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let online: Vec<String> = resp.json().await.unwrap();
    assert_eq!(online, vec!["alice".to_string()]);
}

#[tokio::test]
async fn test_ws_ping_pong() {
    let server = start_test_server().await;
    let (mut write, mut read) = connect(&server, "alice").await;

    write
        .send(Message::Ping(vec![42, 43, 44].into()))
        .await
        .expect("Failed to send ping");

    let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("Expected pong within timeout");
    match msg {
        Some(Ok(Message::Pong(data))) => assert_eq!(data.as_ref(), &[42, 43, 44]),
        other => panic!("Expected Pong message, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_presence_online_snapshot_and_offline() {
    let server = start_test_server().await;
    let (_alice_w, mut alice_r) = connect(&server, "alice").await;
    let (mut bob_w, mut bob_r) = open_ws(&server, &format!("?token={}", server.token_for("bob"))).await;

    // Snapshot of everyone already online, excluding bob himself
    let snapshot = wait_for(&mut bob_r, "user_online").await;
    assert_eq!(snapshot["data"]["identity"], "alice");
    let rest = collect_events(&mut bob_r, Duration::from_millis(300)).await;
    assert!(rest.iter().all(|e| e["event"] != "user_online"));

    let online = wait_for(&mut alice_r, "user_online").await;
    assert_eq!(online["data"]["identity"], "bob");
    assert_eq!(online["data"]["status"], "online");

    bob_w.send(Message::Close(None)).await.unwrap();
    let offline = wait_for(&mut alice_r, "user_offline").await;
    assert_eq!(offline["data"]["identity"], "bob");
}

#[tokio::test]
async fn test_second_device_does_not_reannounce() {
    let server = start_test_server().await;
    let (_alice_w, mut alice_r) = connect(&server, "alice").await;
    let (mut bob1_w, _bob1_r) = connect(&server, "bob").await;
    wait_for(&mut alice_r, "user_online").await;

    let (_bob2_w, _bob2_r) = connect(&server, "bob").await;
    bob1_w.send(Message::Close(None)).await.unwrap();

    let events = collect_events(&mut alice_r, Duration::from_millis(500)).await;
    assert!(
        events
            .iter()
            .all(|e| e["event"] != "user_online" && e["event"] != "user_offline"),
        "unexpected presence events: {:?}",
        events
    );
}

#[tokio::test]
async fn test_direct_delivery_to_online_recipient() {
    let server = start_test_server().await;
    let (_bob_w, mut bob_r) = connect(&server, "bob").await;
    let (mut alice_w, mut alice_r) = connect(&server, "alice").await;

    send_private_message(&mut alice_w, "c1", "bob", "hello bob").await;

    let delivered = wait_for(&mut alice_r, "message_delivered").await;
    let received = wait_for(&mut bob_r, "private_message").await;
    assert_eq!(received["data"]["content"], "hello bob");
    assert_eq!(received["data"]["senderId"], "alice");
    assert_eq!(received["data"]["conversationId"], "c1");
    assert_eq!(received["data"]["kind"], "text");
    assert_eq!(delivered["data"]["messageId"], received["data"]["id"]);

    // Delivered directly, so nothing was queued for bob
    let pending: Vec<serde_json::Value> = reqwest::Client::new()
        .get(format!("{}/api/notifications", server.base_url))
        .bearer_auth(server.token_for("bob"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(pending.is_empty());
}

#[tokio::test]
async fn test_every_recipient_device_gets_the_message() {
    let server = start_test_server().await;
    let (_b1_w, mut b1_r) = connect(&server, "bob").await;
    let (_b2_w, mut b2_r) = connect(&server, "bob").await;
    let (mut alice_w, mut alice_r) = connect(&server, "alice").await;

    send_private_message(&mut alice_w, "c1", "bob", "both tabs").await;

    wait_for(&mut alice_r, "message_delivered").await;
    assert_eq!(wait_for(&mut b1_r, "private_message").await["data"]["content"], "both tabs");
    assert_eq!(wait_for(&mut b2_r, "private_message").await["data"]["content"], "both tabs");
}

#[tokio::test]
async fn test_offline_recipient_gets_queued_notification() {
    let server = start_test_server().await;
    let (mut alice_w, mut alice_r) = connect(&server, "alice").await;

    let long = "x".repeat(150);
    send_private_message(&mut alice_w, "c1", "carol", &long).await;

    let delivered = wait_for(&mut alice_r, "message_delivered").await;
    assert!(delivered["data"]["messageId"].as_str().is_some());

    let client = reqwest::Client::new();
    let pending: Vec<serde_json::Value> = client
        .get(format!("{}/api/notifications", server.base_url))
        .bearer_auth(server.token_for("carol"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["title"], "New message from alice");
    let preview = pending[0]["preview"].as_str().unwrap();
    assert_eq!(preview.chars().count(), 101);
    assert!(preview.ends_with('…'));

    // Fetching marks them delivered
    let again: Vec<serde_json::Value> = client
        .get(format!("{}/api/notifications", server.base_url))
        .bearer_auth(server.token_for("carol"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn test_invalid_private_message_is_rejected() {
    let server = start_test_server().await;
    let (_bob_w, mut bob_r) = connect(&server, "bob").await;
    let (mut alice_w, mut alice_r) = connect(&server, "alice").await;

    send_event(
        &mut alice_w,
        json!({
            "event": "private_message",
            "data": { "conversationId": "c1", "content": "hello" }
        }),
    )
    .await;
    let error = wait_for(&mut alice_r, "error").await;
    assert!(error["data"]["message"].as_str().unwrap().contains("recipientId"));

    send_private_message(&mut alice_w, "c1", "bob", "   ").await;
    wait_for(&mut alice_r, "error").await;

    let events = collect_events(&mut bob_r, Duration::from_millis(300)).await;
    assert!(events.iter().all(|e| e["event"] != "private_message"));
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection_open() {
    let server = start_test_server().await;
    let (mut alice_w, mut alice_r) = connect(&server, "alice").await;

    alice_w
        .send(Message::Text("{not json".to_string().into()))
        .await
        .unwrap();
    let error = wait_for(&mut alice_r, "error").await;
    assert_eq!(error["data"]["message"], "Malformed event");

    send_event(&mut alice_w, json!({ "event": "get_online_users" })).await;
    let users = wait_for(&mut alice_r, "online_users").await;
    assert_eq!(users["data"]["users"], json!(["alice"]));
}

#[tokio::test]
async fn test_rooms_and_typing_expiry() {
    let server = start_test_server().await;
    let (mut bob_w, mut bob_r) = connect(&server, "bob").await;
    let (mut alice_w, mut alice_r) = connect(&server, "alice").await;

    send_event(
        &mut bob_w,
        json!({ "event": "join_conversation", "data": { "conversationId": "c1" } }),
    )
    .await;
    // Round-trip so bob's join is processed before alice joins
    send_event(&mut bob_w, json!({ "event": "get_online_users" })).await;
    wait_for(&mut bob_r, "online_users").await;

    send_event(
        &mut alice_w,
        json!({ "event": "join_conversation", "data": { "conversationId": "c1" } }),
    )
    .await;
    let joined = wait_for(&mut bob_r, "user_joined").await;
    assert_eq!(joined["data"]["identity"], "alice");
    assert_eq!(joined["data"]["conversationId"], "c1");

    send_event(
        &mut alice_w,
        json!({ "event": "typing", "data": { "conversationId": "c1", "isTyping": true } }),
    )
    .await;
    let typing = wait_for(&mut bob_r, "user_typing").await;
    assert_eq!(typing["data"]["identity"], "alice");
    assert_eq!(typing["data"]["isTyping"], true);

    // Test server uses a one second typing timeout
    let cleared = wait_for(&mut bob_r, "user_typing").await;
    assert_eq!(cleared["data"]["isTyping"], false);

    // The typist never hears its own typing flag
    let own = collect_events(&mut alice_r, Duration::from_millis(200)).await;
    assert!(own.iter().all(|e| e["event"] != "user_typing"));
}

#[tokio::test]
async fn test_disconnect_leaves_rooms_and_clears_typing() {
    let server = start_test_server().await;
    let (mut bob_w, mut bob_r) = connect(&server, "bob").await;
    let (mut alice_w, mut alice_r) = connect(&server, "alice").await;

    send_event(
        &mut bob_w,
        json!({ "event": "join_conversation", "data": { "conversationId": "c1" } }),
    )
    .await;
    send_event(&mut bob_w, json!({ "event": "get_online_users" })).await;
    wait_for(&mut bob_r, "online_users").await;

    send_event(
        &mut alice_w,
        json!({ "event": "join_conversation", "data": { "conversationId": "c1" } }),
    )
    .await;
    send_event(
        &mut alice_w,
        json!({ "event": "typing", "data": { "conversationId": "c1", "isTyping": true } }),
    )
    .await;
    send_event(&mut alice_w, json!({ "event": "get_online_users" })).await;
    wait_for(&mut alice_r, "online_users").await;
    wait_for(&mut bob_r, "user_typing").await;

    alice_w.send(Message::Close(None)).await.unwrap();

    let cleared = wait_for(&mut bob_r, "user_typing").await;
    assert_eq!(cleared["data"]["isTyping"], false);
    let left = wait_for(&mut bob_r, "user_left").await;
    assert_eq!(left["data"]["identity"], "alice");
    let offline = wait_for(&mut bob_r, "user_offline").await;
    assert_eq!(offline["data"]["identity"], "alice");
}

#[tokio::test]
async fn test_closing_idle_device_keeps_typing_flag() {
    let server = start_test_server().await;
    let (mut bob_w, mut bob_r) = connect(&server, "bob").await;
    let (mut laptop_w, mut laptop_r) = connect(&server, "alice").await;
    let (mut phone_w, _phone_r) = connect(&server, "alice").await;

    send_event(
        &mut bob_w,
        json!({ "event": "join_conversation", "data": { "conversationId": "c1" } }),
    )
    .await;
    send_event(&mut bob_w, json!({ "event": "get_online_users" })).await;
    wait_for(&mut bob_r, "online_users").await;

    send_event(
        &mut laptop_w,
        json!({ "event": "join_conversation", "data": { "conversationId": "c1" } }),
    )
    .await;
    send_event(
        &mut laptop_w,
        json!({ "event": "typing", "data": { "conversationId": "c1", "isTyping": true } }),
    )
    .await;
    send_event(&mut laptop_w, json!({ "event": "get_online_users" })).await;
    wait_for(&mut laptop_r, "online_users").await;
    let typing = wait_for(&mut bob_r, "user_typing").await;
    assert_eq!(typing["data"]["isTyping"], true);

    // The phone never joined c1 or typed; closing it must not touch the laptop's flag
    phone_w.send(Message::Close(None)).await.unwrap();

    let events = collect_events(&mut bob_r, Duration::from_millis(300)).await;
    assert!(
        events.iter().all(|e| e["event"] != "user_typing" && e["event"] != "user_offline"),
        "unexpected events after idle device closed: {:?}",
        events
    );

    // The flag still expires on its own timer
    let expired = wait_for(&mut bob_r, "user_typing").await;
    assert_eq!(expired["data"]["identity"], "alice");
    assert_eq!(expired["data"]["isTyping"], false);
}
