use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::error::AuthError;
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection. Auth is via `?token=JWT`.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// WebSocket close codes:
/// 4001 = credential expired
/// 4002 = credential invalid or missing
pub const CLOSE_TOKEN_EXPIRED: u16 = 4001;
pub const CLOSE_TOKEN_INVALID: u16 = 4002;

fn close_reason(err: &AuthError) -> (u16, &'static str) {
    match err {
        AuthError::Expired => (CLOSE_TOKEN_EXPIRED, "Token expired"),
        AuthError::Invalid => (CLOSE_TOKEN_INVALID, "Token invalid"),
        AuthError::Missing => (CLOSE_TOKEN_INVALID, "Token missing"),
    }
}

/// GET /ws?token=JWT
/// WebSocket upgrade endpoint. Authenticates via query parameter.
/// On auth failure, upgrades then immediately closes with the matching close code;
/// no endpoint is created. On success, runs an actor for the connection.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match state.gate.authenticate(params.token.as_deref()).await {
        Ok(identity) => {
            tracing::info!(user_id = %identity, "WebSocket connection authenticated");
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, identity))
        }
        Err(err) => {
            let (close_code, reason) = close_reason(&err);
            tracing::warn!(
                close_code = close_code,
                reason = reason,
                error = %err,
                "WebSocket auth failed"
            );

            ws.on_upgrade(move |mut socket| async move {
                let close_frame = CloseFrame {
                    code: close_code,
                    reason: reason.into(),
                };
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            })
        }
    }
}
