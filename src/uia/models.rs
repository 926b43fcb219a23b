//! UIA protocol types.

use base64::Engine;
use chrono::{DateTime, Utc};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::threepid::{ThreepidCredentials, VerifiedThreepid};

/// One verification step within an authentication flow.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
pub enum StageType {
    #[serde(rename = "password")]
    Password,
    #[serde(rename = "email.identity")]
    EmailIdentity,
    #[serde(rename = "msisdn")]
    Msisdn,
}

impl StageType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::EmailIdentity => "email.identity",
            Self::Msisdn => "msisdn",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "password" => Some(Self::Password),
            "email.identity" => Some(Self::EmailIdentity),
            "msisdn" => Some(Self::Msisdn),
            _ => None,
        }
    }
}

/// Verified payload produced by a completed stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageResult {
    /// The password stage authenticates a concrete user.
    Password { user_id: Uuid },
    /// Identity stages prove ownership of an address.
    Threepid { threepid: VerifiedThreepid },
}

/// Stage results accumulated within one session, keyed by stage type.
pub type AuthStageResult = BTreeMap<StageType, StageResult>;

/// The client's `auth` object on a UIA-gated request.
///
/// `stage` is kept as a raw string so unrecognized stage types can be
/// rejected explicitly instead of silently dropped during parsing.
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct AuthDict {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    // Password stage fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    // Identity stage fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threepid_creds: Option<ThreepidCredentials>,
}

/// One acceptable stage combination, as serialized in a 401 challenge.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct FlowDescriptor {
    pub stages: Vec<StageType>,
}

/// The 401 body prompting the client for its next stage.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct UiaChallenge {
    pub flows: Vec<FlowDescriptor>,
    pub completed: Vec<StageType>,
    pub session: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errcode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UiaChallenge {
    #[must_use]
    pub fn new(flows: &[&[StageType]], completed: &AuthStageResult, session: String) -> Self {
        Self {
            flows: flows
                .iter()
                .map(|stages| FlowDescriptor {
                    stages: stages.to_vec(),
                })
                .collect(),
            completed: completed.keys().copied().collect(),
            session,
            errcode: None,
            error: None,
        }
    }

    #[must_use]
    pub fn with_error(mut self, errcode: &str, error: &str) -> Self {
        self.errcode = Some(errcode.to_string());
        self.error = Some(error.to_string());
        self
    }
}

/// Result of one UIA evaluation.
#[derive(Clone, Debug)]
pub enum UiaOutcome {
    /// Some accepted flow is fully complete; the caller may mutate.
    Authenticated {
        completed: AuthStageResult,
        /// The non-auth request body captured on the session's first round
        /// trip (e.g. `new_password` may ride on either request).
        params: Map<String, Value>,
    },
    /// More stages are required; reply 401 with the challenge.
    Continue(UiaChallenge),
}

/// Accumulated session state persisted between round trips.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UiaSession {
    pub id: String,
    pub completed: AuthStageResult,
    pub params: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

/// Session tokens are bearer handles for in-progress auth; the raw value goes
/// to the client, so it is CSPRNG output, not a guessable sequence.
fn generate_session_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

impl UiaSession {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: generate_session_id(),
            completed: AuthStageResult::new(),
            params: Map::new(),
            created_at: Utc::now(),
        }
    }
}

impl Default for UiaSession {
    fn default() -> Self {
        Self::new()
    }
}
