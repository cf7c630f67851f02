//! HTTP-facing error types shared by the REST surface and the
//! WebSocket upgrade/auth path.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::claims::TokenError;

/// One entry of a [`ValidationErrorBody`] — a stable numeric code plus a
/// human-readable message, spec.md §4.6/§6.
#[derive(Debug, Serialize)]
struct ValidationErrorDetail {
    code: u32,
    message: &'static str,
}

/// The exact wire shape spec.md §6 mandates for access-token validation
/// failures — a stable, documented contract peers parse against, not a
/// free-form error body.
#[derive(Debug, Serialize)]
struct ValidationErrorBody {
    success: bool,
    errors: [ValidationErrorDetail; 1],
}

/// The public code for "access token missing or invalid" (spec.md §4.6).
/// Every rejection in the access-token middleware uses this single code
/// and message — parse failure reasons are never leaked to the peer.
const MISSING_ACCESS_TOKEN_CODE: u32 = 1001;
const MISSING_ACCESS_TOKEN_MESSAGE: &str = "missing access_token query parameter";

/// Failures surfaced while establishing the WebSocket connection, before
/// any close frame exists yet — the upgrade itself is refused with a
/// plain HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error(transparent)]
    Token(#[from] TokenError),
}

impl IntoResponse for ValidationError {
    fn into_response(self) -> Response {
        // Every rejection path collapses to the same HTTP 400 + stable
        // code 1001, whether the query parameter was absent or the token
        // failed to parse — spec.md §4.6 forbids leaking why.
        let ValidationError::Token(err) = self;
        tracing::debug!(%err, "access token validation failed");
        let body = ValidationErrorBody {
            success: false,
            errors: [ValidationErrorDetail {
                code: MISSING_ACCESS_TOKEN_CODE,
                message: MISSING_ACCESS_TOKEN_MESSAGE,
            }],
        };
        (StatusCode::BAD_REQUEST, axum::Json(body)).into_response()
    }
}

/// Reasons a management connection can be closed, carrying the WebSocket
/// close code each maps to (spec.md §4.2 / §6 / §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Normal,
    InvalidCommand,
    SessionLimitExceeded,
    IdleTimeout,
    UnsupportedData,
    InternalError,
}

impl CloseReason {
    pub const fn code(self) -> u16 {
        match self {
            CloseReason::Normal => 1000,
            CloseReason::InvalidCommand => 4001,
            CloseReason::SessionLimitExceeded => 4002,
            CloseReason::IdleTimeout => 4003,
            CloseReason::UnsupportedData => 1003,
            CloseReason::InternalError => 1011,
        }
    }

    pub const fn reason(self) -> &'static str {
        match self {
            CloseReason::Normal => "normal closure",
            CloseReason::InvalidCommand => "invalid command",
            CloseReason::SessionLimitExceeded => "session limit exceeded",
            CloseReason::IdleTimeout => "idle timeout",
            CloseReason::UnsupportedData => "unsupported data",
            CloseReason::InternalError => "internal error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_reason_codes_match_spec() {
        assert_eq!(CloseReason::Normal.code(), 1000);
        assert_eq!(CloseReason::InvalidCommand.code(), 4001);
        assert_eq!(CloseReason::SessionLimitExceeded.code(), 4002);
        assert_eq!(CloseReason::IdleTimeout.code(), 4003);
        assert_eq!(CloseReason::UnsupportedData.code(), 1003);
        assert_eq!(CloseReason::InternalError.code(), 1011);
    }

    #[tokio::test]
    async fn validation_error_body_matches_wire_contract() {
        for err in [
            TokenError::MissingQueryParam,
            TokenError::EmptyClaim { field: "actor.id" },
        ] {
            let response = ValidationError::from(err).into_response();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(value["success"], false);
            assert_eq!(value["errors"][0]["code"], 1001);
            assert_eq!(value["errors"][0]["message"], "missing access_token query parameter");
        }
    }
}
