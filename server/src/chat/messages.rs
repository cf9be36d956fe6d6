//! REST endpoints for message flag mutation, deletion and reporting.
//! All routes require `Authorization: Bearer <jwt>`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::auth::middleware::Claims;
use crate::error::RelayError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SetImportantRequest {
    pub important: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    pub reason: String,
}

fn into_response(result: Result<(), RelayError>) -> Result<StatusCode, (StatusCode, String)> {
    result
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(|e| (e.status_code(), e.to_string()))
}

/// PUT /api/messages/{id}/read: mark a message read. Idempotent.
pub async fn mark_read(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    into_response(state.relay.mark_as_read(&claims.sub, &message_id).await)
}

/// PUT /api/messages/{id}/important: set the important flag.
/// Body: { "important": bool }
pub async fn set_important(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<String>,
    Json(body): Json<SetImportantRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    into_response(
        state
            .relay
            .toggle_important(&claims.sub, &message_id, body.important)
            .await,
    )
}

/// DELETE /api/messages/{id}: delete a message. Sender only.
pub async fn delete_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    into_response(state.relay.delete(&claims.sub, &message_id).await)
}

/// POST /api/messages/{id}/report: report a message.
/// Body: { "reason": "..." }
pub async fn report_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<String>,
    Json(body): Json<ReportRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    into_response(
        state
            .relay
            .report(&claims.sub, &message_id, &body.reason)
            .await,
    )
}
