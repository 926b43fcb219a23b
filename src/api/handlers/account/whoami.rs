//! Caller identity endpoint.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::error::ApiError;

use super::principal::require_auth;
use super::state::AppState;
use super::types::WhoamiResponse;

/// Resolve the caller's user id from the bearer token alone; no interactive
/// auth involved.
#[utoipa::path(
    get,
    path = "/v1/account/whoami",
    responses(
        (status = 200, description = "The caller's user id", body = WhoamiResponse),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    tag = "account"
)]
pub async fn whoami(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let principal = require_auth(&headers, &state).await?;
    Ok((
        StatusCode::OK,
        Json(WhoamiResponse {
            user_id: principal.user_id,
        }),
    )
        .into_response())
}
