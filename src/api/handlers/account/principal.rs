//! Bearer-token principal extraction.
//!
//! Tokens are opaque to clients; only their SHA-256 hash ever touches the
//! store, so a leaked database cannot be replayed as live credentials.

use axum::http::{HeaderMap, header::AUTHORIZATION};
use sha2::{Digest, Sha256};

use crate::account::Principal;
use crate::error::ApiError;

use super::state::AppState;

/// Hash an access token for storage lookups.
#[must_use]
pub(crate) fn hash_access_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Resolve the bearer token into a principal; absence is an error.
pub(crate) async fn require_auth(
    headers: &HeaderMap,
    state: &AppState,
) -> Result<Principal, ApiError> {
    match optional_auth(headers, state).await? {
        Some(principal) => Ok(principal),
        None => Err(ApiError::MissingToken),
    }
}

/// Resolve the bearer token if one was supplied.
///
/// A missing header is `Ok(None)`; a token that resolves to nothing is
/// `Unauthorized`: if the caller provides a token, it ought to be valid.
pub(crate) async fn optional_auth(
    headers: &HeaderMap,
    state: &AppState,
) -> Result<Option<Principal>, ApiError> {
    let Some(token) = extract_bearer_token(headers) else {
        return Ok(None);
    };
    let token_hash = hash_access_token(&token);
    match state.accounts().lookup_access_token(&token_hash).await? {
        Some(principal) => Ok(Some(principal)),
        None => Err(ApiError::Unauthorized),
    }
}
