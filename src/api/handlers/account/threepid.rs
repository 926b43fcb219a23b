//! Threepid add/delete/list and add-token endpoints.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::sync::Arc;

use crate::error::ApiError;
use crate::threepid::TokenRequestPolicy;

use super::principal::require_auth;
use super::state::AppState;
use super::types::{
    AddThreepidRequest, DeleteThreepidRequest, EmailRequestTokenRequest,
    MsisdnRequestTokenRequest, ThreepidListResponse, TokenRequestParams,
};

/// Shared tail of the four request-token endpoints: check the identity-server
/// allowlist, run the ownership guard, and pass the verifier's response
/// through untouched.
pub(super) async fn request_token_response(
    state: &AppState,
    params: TokenRequestParams,
    policy: TokenRequestPolicy,
) -> Result<Response, ApiError> {
    state.config().check_id_server(&params.id_server)?;
    let response = state
        .threepids()
        .request_token(
            &params.input,
            &params.client_secret,
            params.send_attempt,
            &params.id_server,
            policy,
        )
        .await?;
    Ok((StatusCode::OK, Json(response)).into_response())
}

/// Request a verification token to add an email address.
///
/// The address must not belong to any account yet.
#[utoipa::path(
    post,
    path = "/v1/account/3pid/email/request-token",
    request_body = EmailRequestTokenRequest,
    responses(
        (status = 200, description = "Token issued; response is the verifier's"),
        (status = 400, description = "Missing or malformed parameters"),
        (status = 409, description = "Address already bound to an account")
    ),
    tag = "account"
)]
pub async fn threepid_email_request_token(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<EmailRequestTokenRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::BadRequest("Missing payload".to_string()));
    };
    request_token_response(&state, request.validated()?, TokenRequestPolicy::AddThreepid).await
}

/// Request a verification token to add a phone number.
#[utoipa::path(
    post,
    path = "/v1/account/3pid/msisdn/request-token",
    request_body = MsisdnRequestTokenRequest,
    responses(
        (status = 200, description = "Token issued; response is the verifier's"),
        (status = 400, description = "Missing or malformed parameters"),
        (status = 409, description = "Number already bound to an account")
    ),
    tag = "account"
)]
pub async fn threepid_msisdn_request_token(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<MsisdnRequestTokenRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::BadRequest("Missing payload".to_string()));
    };
    request_token_response(&state, request.validated()?, TokenRequestPolicy::AddThreepid).await
}

/// List the caller's bound threepids.
#[utoipa::path(
    get,
    path = "/v1/account/3pid",
    responses(
        (status = 200, description = "Bound threepids", body = ThreepidListResponse),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    tag = "account"
)]
pub async fn list_threepids(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let principal = require_auth(&headers, &state).await?;
    let threepids = state.threepids().list_threepids(principal.user_id).await?;
    Ok((StatusCode::OK, Json(ThreepidListResponse { threepids })).into_response())
}

/// Bind a verified threepid to the caller's account.
///
/// Binding publication to the identity server is best-effort: a failure is
/// logged but the local association stands and the call succeeds.
#[utoipa::path(
    post,
    path = "/v1/account/3pid",
    request_body = AddThreepidRequest,
    responses(
        (status = 200, description = "Threepid added"),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 409, description = "Address already bound to another account"),
        (status = 502, description = "Identity verifier refused or misbehaved")
    ),
    tag = "account"
)]
pub async fn add_threepid(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<AddThreepidRequest>>,
) -> Result<Response, ApiError> {
    let principal = require_auth(&headers, &state).await?;
    let Some(Json(request)) = payload else {
        return Err(ApiError::BadRequest("Missing payload".to_string()));
    };
    let Some(creds) = request.three_pid_creds else {
        return Err(ApiError::MissingParams(vec!["three_pid_creds"]));
    };
    let bind = request.bind.unwrap_or(false);

    state
        .threepids()
        .add_threepid(principal.user_id, &creds, bind)
        .await?;

    Ok((StatusCode::OK, Json(json!({}))).into_response())
}

/// Remove a threepid the caller owns.
#[utoipa::path(
    post,
    path = "/v1/account/3pid/delete",
    request_body = DeleteThreepidRequest,
    responses(
        (status = 200, description = "Threepid removed"),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 403, description = "Owned by a different account"),
        (status = 404, description = "No such association")
    ),
    tag = "account"
)]
pub async fn delete_threepid(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<DeleteThreepidRequest>>,
) -> Result<Response, ApiError> {
    let principal = require_auth(&headers, &state).await?;
    let Some(Json(request)) = payload else {
        return Err(ApiError::BadRequest("Missing payload".to_string()));
    };
    let (medium, address) = request.validated()?;

    state
        .threepids()
        .delete_threepid(principal.user_id, medium, &address)
        .await?;

    Ok((StatusCode::OK, Json(json!({}))).into_response())
}
