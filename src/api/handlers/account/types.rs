//! Request/response types for account endpoints.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;
use crate::threepid::{AddressInput, Medium, ThreepidAssociation, ThreepidCredentials};
use crate::uia::AuthDict;

/// Validated parameters shared by all four request-token endpoints.
#[derive(Debug)]
pub(crate) struct TokenRequestParams {
    pub input: AddressInput,
    pub client_secret: String,
    pub send_attempt: u32,
    pub id_server: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct EmailRequestTokenRequest {
    pub id_server: Option<String>,
    pub client_secret: Option<String>,
    pub email: Option<String>,
    pub send_attempt: Option<u32>,
}

impl EmailRequestTokenRequest {
    /// Collect every absent field into one `MISSING_PARAM` report.
    pub(crate) fn validated(self) -> Result<TokenRequestParams, ApiError> {
        let mut missing = Vec::new();
        if self.id_server.is_none() {
            missing.push("id_server");
        }
        if self.client_secret.is_none() {
            missing.push("client_secret");
        }
        if self.email.is_none() {
            missing.push("email");
        }
        if self.send_attempt.is_none() {
            missing.push("send_attempt");
        }
        let (Some(id_server), Some(client_secret), Some(email), Some(send_attempt)) =
            (self.id_server, self.client_secret, self.email, self.send_attempt)
        else {
            return Err(ApiError::MissingParams(missing));
        };
        Ok(TokenRequestParams {
            input: AddressInput::Email { email },
            client_secret,
            send_attempt,
            id_server,
        })
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MsisdnRequestTokenRequest {
    pub id_server: Option<String>,
    pub client_secret: Option<String>,
    pub country: Option<String>,
    pub phone_number: Option<String>,
    pub send_attempt: Option<u32>,
}

impl MsisdnRequestTokenRequest {
    pub(crate) fn validated(self) -> Result<TokenRequestParams, ApiError> {
        let mut missing = Vec::new();
        if self.id_server.is_none() {
            missing.push("id_server");
        }
        if self.client_secret.is_none() {
            missing.push("client_secret");
        }
        if self.country.is_none() {
            missing.push("country");
        }
        if self.phone_number.is_none() {
            missing.push("phone_number");
        }
        if self.send_attempt.is_none() {
            missing.push("send_attempt");
        }
        let (
            Some(id_server),
            Some(client_secret),
            Some(country),
            Some(phone_number),
            Some(send_attempt),
        ) = (
            self.id_server,
            self.client_secret,
            self.country,
            self.phone_number,
            self.send_attempt,
        )
        else {
            return Err(ApiError::MissingParams(missing));
        };
        Ok(TokenRequestParams {
            input: AddressInput::Phone {
                country,
                phone_number,
            },
            client_secret,
            send_attempt,
            id_server,
        })
    }
}

/// Documented shape of the change-password body. The handler parses the raw
/// body so non-auth fields can follow the session across round trips.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PasswordChangeRequest {
    pub auth: Option<AuthDict>,
    pub new_password: Option<String>,
}

/// Documented shape of the deactivate body; `user_id` is honored for service
/// principals only.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct DeactivateRequest {
    pub auth: Option<AuthDict>,
    pub user_id: Option<Uuid>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AddThreepidRequest {
    #[serde(alias = "threePidCreds")]
    pub three_pid_creds: Option<ThreepidCredentials>,
    pub bind: Option<bool>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct DeleteThreepidRequest {
    pub medium: Option<Medium>,
    pub address: Option<String>,
}

impl DeleteThreepidRequest {
    pub(crate) fn validated(self) -> Result<(Medium, String), ApiError> {
        let mut missing = Vec::new();
        if self.medium.is_none() {
            missing.push("medium");
        }
        if self.address.is_none() {
            missing.push("address");
        }
        let (Some(medium), Some(address)) = (self.medium, self.address) else {
            return Err(ApiError::MissingParams(missing));
        };
        Ok((medium, address))
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ThreepidListResponse {
    pub threepids: Vec<ThreepidAssociation>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct WhoamiResponse {
    pub user_id: Uuid,
}

/// Split a request body into its `auth` object and the remaining params.
///
/// The remainder is what the UIA session captures on the first round trip.
pub(crate) fn split_auth(body: Value) -> Result<(Option<AuthDict>, Map<String, Value>), ApiError> {
    let Value::Object(mut params) = body else {
        return Err(ApiError::BadRequest("Body must be a JSON object".to_string()));
    };
    let auth = match params.remove("auth") {
        Some(value) => Some(
            serde_json::from_value(value)
                .map_err(|err| ApiError::BadRequest(format!("Invalid auth object: {err}")))?,
        ),
        None => None,
    };
    Ok((auth, params))
}

#[cfg(test)]
mod tests {
    use super::{
        AddThreepidRequest, DeleteThreepidRequest, EmailRequestTokenRequest,
        MsisdnRequestTokenRequest, split_auth,
    };
    use crate::error::ApiError;
    use crate::threepid::{AddressInput, Medium};
    use anyhow::{Context, Result, anyhow};
    use serde_json::json;

    #[test]
    fn email_request_reports_all_missing_params() {
        let request = EmailRequestTokenRequest {
            id_server: None,
            client_secret: Some("secret".to_string()),
            email: None,
            send_attempt: Some(1),
        };
        match request.validated() {
            Err(ApiError::MissingParams(missing)) => {
                assert_eq!(missing, vec!["id_server", "email"]);
            }
            other => panic!("expected MissingParams, got {other:?}"),
        }
    }

    #[test]
    fn msisdn_request_validates_complete_bodies() -> Result<()> {
        let request = MsisdnRequestTokenRequest {
            id_server: Some("id.example.com".to_string()),
            client_secret: Some("secret".to_string()),
            country: Some("US".to_string()),
            phone_number: Some("202 555 0143".to_string()),
            send_attempt: Some(2),
        };
        let params = request.validated().map_err(|err| anyhow!("{err}"))?;
        assert!(matches!(params.input, AddressInput::Phone { .. }));
        assert_eq!(params.send_attempt, 2);
        Ok(())
    }

    #[test]
    fn add_request_accepts_camel_case_alias() -> Result<()> {
        let request: AddThreepidRequest = serde_json::from_value(json!({
            "threePidCreds": {
                "id_server": "id.example.com",
                "sid": "1",
                "client_secret": "secret",
            },
            "bind": true,
        }))?;
        let creds = request.three_pid_creds.context("missing creds")?;
        assert_eq!(creds.sid, "1");
        assert_eq!(request.bind, Some(true));
        Ok(())
    }

    #[test]
    fn delete_request_lists_missing_params() {
        let request = DeleteThreepidRequest {
            medium: Some(Medium::Email),
            address: None,
        };
        match request.validated() {
            Err(ApiError::MissingParams(missing)) => assert_eq!(missing, vec!["address"]),
            other => panic!("expected MissingParams, got {other:?}"),
        }
    }

    #[test]
    fn split_auth_separates_auth_from_params() -> Result<()> {
        let body = json!({
            "auth": {"type": "password", "session": "s1"},
            "new_password": "hunter2",
        });
        let (auth, params) = split_auth(body).map_err(|err| anyhow!("{err}"))?;
        let auth = auth.context("auth missing")?;
        assert_eq!(auth.stage.as_deref(), Some("password"));
        assert_eq!(auth.session.as_deref(), Some("s1"));
        assert_eq!(params.get("new_password"), Some(&json!("hunter2")));
        assert!(!params.contains_key("auth"));
        Ok(())
    }

    #[test]
    fn split_auth_rejects_non_objects() {
        assert!(split_auth(json!([1, 2, 3])).is_err());
    }
}
