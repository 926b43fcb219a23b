//! Account deactivation endpoint.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::uia::{StageType, UiaOutcome};

use super::principal::optional_auth;
use super::state::AppState;
use super::types::{DeactivateRequest, split_auth};

const DEACTIVATE_FLOWS: &[&[StageType]] = &[&[StageType::Password]];

/// Deactivate an account.
///
/// Service principals skip interactive auth and may target an account they
/// administer via `user_id` (their own by default). Everyone else must
/// complete the password stage as themselves. Repeating the request after
/// success is itself a success; deactivation is terminal.
#[utoipa::path(
    post,
    path = "/v1/account/deactivate",
    request_body = DeactivateRequest,
    responses(
        (status = 200, description = "Account deactivated (or already was)"),
        (status = 401, description = "Password stage required", body = crate::uia::UiaChallenge),
        (status = 403, description = "Authenticated as the wrong user")
    ),
    tag = "account"
)]
pub async fn deactivate(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<Value>>,
) -> Result<Response, ApiError> {
    // A supplied token ought to be valid even though the body alone can
    // authenticate via the password stage.
    let requester = optional_auth(&headers, &state).await?;
    let body = payload.map_or_else(|| Value::Object(Map::new()), |Json(value)| value);

    if requester.as_ref().is_some_and(|principal| principal.service) {
        let target = match body.get("user_id") {
            Some(value) => Some(parse_user_id(value)?),
            None => None,
        };
        state
            .gateway()
            .deactivate(requester.as_ref(), None, target)
            .await?;
        return Ok((StatusCode::OK, Json(json!({}))).into_response());
    }

    let (auth, params) = split_auth(body)?;
    match state.uia().check_auth(DEACTIVATE_FLOWS, auth, params).await? {
        UiaOutcome::Continue(challenge) => {
            Ok((StatusCode::UNAUTHORIZED, Json(challenge)).into_response())
        }
        UiaOutcome::Authenticated { completed, .. } => {
            state
                .gateway()
                .deactivate(requester.as_ref(), Some(&completed), None)
                .await?;
            Ok((StatusCode::OK, Json(json!({}))).into_response())
        }
    }
}

fn parse_user_id(value: &Value) -> Result<Uuid, ApiError> {
    value
        .as_str()
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or_else(|| ApiError::BadRequest("Invalid user_id".to_string()))
}
