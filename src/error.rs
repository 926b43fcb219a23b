//! API error taxonomy.
//!
//! Every failure surfaced to the transport layer carries a numeric status and
//! a machine-readable `errcode`, rendered as `{"errcode": ..., "error": ...}`.
//! Internal faults are logged server-side and collapsed into a generic 500 so
//! upstream details never reach clients.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Missing params: {}", .0.join(", "))]
    MissingParams(Vec<&'static str>),
    #[error("{0}")]
    BadRequest(String),
    #[error("Unrecognized authentication stage: {0}")]
    UnknownStageType(String),
    #[error("Missing access token")]
    MissingToken,
    #[error("Invalid access token")]
    Unauthorized,
    #[error("Authenticated user does not match the requester")]
    IdentityMismatch,
    #[error("Third-party identifier is owned by another user")]
    NotOwner,
    #[error("Address not found")]
    AddressNotFound,
    #[error("Third-party identifier not found")]
    ThreepidNotFound,
    #[error("User not found")]
    UserNotFound,
    #[error("Address is already in use")]
    AddressInUse,
    #[error("Identity server refused the credentials")]
    CredentialAuthFailed,
    #[error("Invalid response from identity server")]
    MalformedVerifierResponse,
    #[error("Authentication succeeded with no known stage")]
    UnknownAuthResult,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingParams(_) | Self::BadRequest(_) | Self::UnknownStageType(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::MissingToken | Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::IdentityMismatch | Self::NotOwner => StatusCode::FORBIDDEN,
            Self::AddressNotFound | Self::ThreepidNotFound | Self::UserNotFound => {
                StatusCode::NOT_FOUND
            }
            Self::AddressInUse => StatusCode::CONFLICT,
            Self::CredentialAuthFailed | Self::MalformedVerifierResponse => {
                StatusCode::BAD_GATEWAY
            }
            Self::UnknownAuthResult | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub fn errcode(&self) -> &'static str {
        match self {
            Self::MissingParams(_) => "MISSING_PARAM",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::UnknownStageType(_) => "UNKNOWN_STAGE_TYPE",
            Self::MissingToken => "MISSING_TOKEN",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::IdentityMismatch => "IDENTITY_MISMATCH",
            Self::NotOwner => "NOT_OWNER",
            Self::AddressNotFound => "ADDRESS_NOT_FOUND",
            Self::ThreepidNotFound | Self::UserNotFound => "NOT_FOUND",
            Self::AddressInUse => "ADDRESS_IN_USE",
            Self::CredentialAuthFailed => "CREDENTIAL_AUTH_FAILED",
            Self::MalformedVerifierResponse => "MALFORMED_VERIFIER_RESPONSE",
            Self::UnknownAuthResult => "UNKNOWN_AUTH_RESULT",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::Internal(err) => {
                error!("Internal error: {err:#}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = json!({
            "errcode": self.errcode(),
            "error": message,
        });
        (self.status(), Json(body)).into_response()
    }
}
