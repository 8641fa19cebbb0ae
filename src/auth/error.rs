//! OAuth error responses (RFC 6749 §5.2)

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Errors returned by the authorization and token endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OAuthError {
    /// Malformed or missing parameters
    #[error("invalid_request: {0}")]
    InvalidRequest(String),
    /// Unknown client or bad client credentials
    #[error("invalid_client: {0}")]
    InvalidClient(String),
    /// Unknown, expired, reused or mismatched code or refresh token
    #[error("invalid_grant: {0}")]
    InvalidGrant(String),
    /// `grant_type` other than `authorization_code` / `refresh_token`
    #[error("unsupported_grant_type: {0}")]
    UnsupportedGrantType(String),
    /// `response_type` other than `code`
    #[error("unsupported_response_type: {0}")]
    UnsupportedResponseType(String),
    /// Missing or wrong initial access token at `/register`
    #[error("invalid_token: {0}")]
    InvalidToken(String),
    /// Client table is full
    #[error("temporarily_unavailable: {0}")]
    TemporarilyUnavailable(String),
}

impl OAuthError {
    /// The RFC 6749 `error` code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidClient(_) => "invalid_client",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::UnsupportedResponseType(_) => "unsupported_response_type",
            Self::InvalidToken(_) => "invalid_token",
            Self::TemporarilyUnavailable(_) => "temporarily_unavailable",
        }
    }

    /// Human-readable detail.
    #[must_use]
    pub fn description(&self) -> &str {
        match self {
            Self::InvalidRequest(d)
            | Self::InvalidClient(d)
            | Self::InvalidGrant(d)
            | Self::UnsupportedGrantType(d)
            | Self::UnsupportedResponseType(d)
            | Self::InvalidToken(d)
            | Self::TemporarilyUnavailable(d) => d,
        }
    }

    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidClient(_) | Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            Self::TemporarilyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(json!({
                "error": self.code(),
                "error_description": self.description(),
            })),
        )
            .into_response()
    }
}
