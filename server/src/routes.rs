use axum::{middleware, Router};

use crate::auth::middleware::JwtSecret;
use crate::chat::{messages, presence};
use crate::notify::queue as notifications;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Authenticated routes (JWT required, Claims extractor validates token)
    let message_routes = Router::new()
        .route(
            "/api/messages/{id}/read",
            axum::routing::put(messages::mark_read),
        )
        .route(
            "/api/messages/{id}/important",
            axum::routing::put(messages::set_important),
        )
        .route(
            "/api/messages/{id}/report",
            axum::routing::post(messages::report_message),
        )
        .route(
            "/api/messages/{id}",
            axum::routing::delete(messages::delete_message),
        );

    let notification_routes = Router::new()
        .route(
            "/api/notifications",
            axum::routing::get(notifications::get_notifications),
        )
        .route(
            "/api/notifications/ack",
            axum::routing::post(notifications::ack_notifications),
        );

    let presence_routes =
        Router::new().route("/api/presence", axum::routing::get(presence::get_presence));

    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(message_routes)
        .merge(notification_routes)
        .merge(presence_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
