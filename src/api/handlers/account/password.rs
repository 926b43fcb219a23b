//! Password reset-token and change-password endpoints.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use secrecy::SecretString;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::error::ApiError;
use crate::threepid::TokenRequestPolicy;
use crate::uia::{StageType, UiaOutcome};

use super::principal::require_auth;
use super::state::AppState;
use super::threepid::request_token_response;
use super::types::{
    EmailRequestTokenRequest, MsisdnRequestTokenRequest, PasswordChangeRequest, split_auth,
};

/// A password change may be proven by the current password or by ownership of
/// a bound threepid (the recovery path).
const CHANGE_PASSWORD_FLOWS: &[&[StageType]] = &[
    &[StageType::Password],
    &[StageType::EmailIdentity],
    &[StageType::Msisdn],
];

/// Request a password-reset token for an email address.
///
/// The address must already belong to an account.
#[utoipa::path(
    post,
    path = "/v1/account/password/email/request-token",
    request_body = EmailRequestTokenRequest,
    responses(
        (status = 200, description = "Token issued; response is the verifier's"),
        (status = 400, description = "Missing or malformed parameters"),
        (status = 404, description = "Address is not bound to any account")
    ),
    tag = "account"
)]
pub async fn password_email_request_token(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<EmailRequestTokenRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::BadRequest("Missing payload".to_string()));
    };
    request_token_response(&state, request.validated()?, TokenRequestPolicy::PasswordReset).await
}

/// Request a password-reset token for a phone number.
#[utoipa::path(
    post,
    path = "/v1/account/password/msisdn/request-token",
    request_body = MsisdnRequestTokenRequest,
    responses(
        (status = 200, description = "Token issued; response is the verifier's"),
        (status = 400, description = "Missing or malformed parameters"),
        (status = 404, description = "Number is not bound to any account")
    ),
    tag = "account"
)]
pub async fn password_msisdn_request_token(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<MsisdnRequestTokenRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::BadRequest("Missing payload".to_string()));
    };
    request_token_response(&state, request.validated()?, TokenRequestPolicy::PasswordReset).await
}

/// Change the account password after interactive authentication.
///
/// The winning stage decides how the target account is resolved: a password
/// stage must match the bearer identity, an identity stage resolves through
/// the threepid store. `new_password` may arrive on any round trip; the
/// session keeps the first one seen.
#[utoipa::path(
    post,
    path = "/v1/account/password",
    request_body = PasswordChangeRequest,
    responses(
        (status = 200, description = "Password changed"),
        (status = 401, description = "More auth stages required", body = crate::uia::UiaChallenge),
        (status = 403, description = "Authenticated as the wrong user"),
        (status = 404, description = "Verified address has no owner")
    ),
    tag = "account"
)]
pub async fn change_password(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<Value>>,
) -> Result<Response, ApiError> {
    let Some(Json(body)) = payload else {
        return Err(ApiError::BadRequest("Missing payload".to_string()));
    };
    let (auth, params) = split_auth(body)?;

    let (completed, params) = match state
        .uia()
        .check_auth(CHANGE_PASSWORD_FLOWS, auth, params)
        .await?
    {
        UiaOutcome::Continue(challenge) => {
            return Ok((StatusCode::UNAUTHORIZED, Json(challenge)).into_response());
        }
        UiaOutcome::Authenticated { completed, params } => (completed, params),
    };

    // Only the password path needs a logged-in requester; recovery via a
    // verified threepid works from a logged-out client.
    let requester = if completed.contains_key(&StageType::Password) {
        Some(require_auth(&headers, &state).await?)
    } else {
        None
    };

    let new_password = params
        .get("new_password")
        .and_then(Value::as_str)
        .filter(|password| !password.is_empty())
        .ok_or(ApiError::MissingParams(vec!["new_password"]))?;
    let new_password = SecretString::from(new_password);

    state
        .gateway()
        .change_password(&completed, requester.as_ref(), &new_password)
        .await?;

    Ok((StatusCode::OK, Json(json!({}))).into_response())
}
