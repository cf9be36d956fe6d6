//! Error taxonomy for the relay core.
//!
//! `AuthError` and `RelayError::Validation` are terminal and local: they never
//! reach persistence or broadcast. `DeliveryError` and `NotifyError` are soft
//! failures that callers log and swallow.

use axum::http::StatusCode;

/// Connection credential could not be turned into an identity.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing credential")]
    Missing,

    #[error("invalid credential")]
    Invalid,

    #[error("credential expired")]
    Expired,
}

/// Failure reported by a `MessageStore`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("message not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(String),

    #[error("storage task failed: {0}")]
    Task(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            other => StoreError::Database(other.to_string()),
        }
    }
}

/// Failure reported by a `PushNotifier`.
#[derive(Debug, thiserror::Error)]
#[error("push notification failed: {0}")]
pub struct NotifyError(pub String);

/// A write to a single endpoint failed.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("endpoint channel closed")]
    Closed,
}

/// Errors surfaced to the sender of an inbound event or REST call.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("{0}")]
    Validation(String),

    #[error("failed to save message")]
    Persistence(#[source] StoreError),

    #[error("message not found")]
    NotFound,

    #[error("not allowed")]
    Forbidden,
}

impl RelayError {
    /// Map a store failure, keeping "not found" distinct from real persistence errors.
    pub fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => RelayError::NotFound,
            other => RelayError::Persistence(other),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Validation(_) => StatusCode::BAD_REQUEST,
            RelayError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::NotFound => StatusCode::NOT_FOUND,
            RelayError::Forbidden => StatusCode::FORBIDDEN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_rows_maps_to_not_found() {
        let err = StoreError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(err, StoreError::NotFound));
        assert!(matches!(RelayError::from_store(err), RelayError::NotFound));
    }

    #[test]
    fn test_persistence_message_hides_internals() {
        let err = RelayError::Persistence(StoreError::Database("disk I/O error".into()));
        assert_eq!(err.to_string(), "failed to save message");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
