//! API error taxonomy and its HTTP mapping.
//!
//! `Denied` is deliberately absent: a verdict that fails the policy is a
//! legitimate business outcome and is answered with a 200 `{"not_correct"}`
//! body by the result handler, never through this type.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use roomgate_core::ValidationError;
use roomgate_storage::StorageError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed policy payload; carries every violated field.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// Caller identity could not be resolved.
    #[error("could not authenticate the request")]
    Unauthenticated,

    /// Caller lacks the required role for this operation.
    #[error("{0}")]
    Forbidden(String),

    /// No policy for the given room.
    #[error("no room with that id")]
    NotFound,

    /// Attempted to change `room_type` after creation.
    #[error("can't update room type after creation")]
    ImmutableFieldViolation,

    /// Malformed session token or disallowed proxy sub-path; rejected before
    /// any outbound call.
    #[error("session token or proxy path not allowed")]
    InvalidSessionToken,

    /// The Disclosure Provider timed out or could not be reached. Retryable,
    /// never interpreted as a denial.
    #[error("disclosure provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Validation(err) => (
                StatusCode::BAD_REQUEST,
                json!({"errors": err.errors}),
            ),
            ApiError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                json!({"errors": self.to_string()}),
            ),
            ApiError::Forbidden(_) => {
                (StatusCode::FORBIDDEN, json!({"errors": self.to_string()}))
            }
            ApiError::NotFound => {
                // 400, not 404: clients match on the literal message.
                (StatusCode::BAD_REQUEST, json!({"errors": self.to_string()}))
            }
            ApiError::ImmutableFieldViolation => {
                (StatusCode::BAD_REQUEST, json!({"errors": self.to_string()}))
            }
            ApiError::InvalidSessionToken => {
                (StatusCode::FORBIDDEN, json!({"error": "Path not allowed"}))
            }
            ApiError::ProviderUnavailable(_) => (
                StatusCode::BAD_GATEWAY,
                json!({"errors": self.to_string()}),
            ),
            ApiError::Storage(err) => {
                tracing::error!(error = %err, "storage failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"errors": "internal storage error"}),
                )
            }
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"errors": "internal error"}),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_every_field() {
        let err = ApiError::Validation(ValidationError {
            errors: vec!["'name' should be a string".into(), "'profile' missing".into()],
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn provider_unavailable_is_a_5xx() {
        let response = ApiError::ProviderUnavailable("timeout".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
