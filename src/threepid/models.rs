//! Threepid wire and storage types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Kind of third-party identifier.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Medium {
    Email,
    Msisdn,
}

impl Medium {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Msisdn => "msisdn",
        }
    }

    /// Parse the persisted `threepids.medium` textual value into a typed enum.
    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "email" => Some(Self::Email),
            "msisdn" => Some(Self::Msisdn),
            _ => None,
        }
    }
}

/// A stored association between a normalized address and its owner.
///
/// The owning user is implied by the query that produced the row; at most one
/// user owns a given `(medium, address)` pair at any time.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ThreepidAssociation {
    pub medium: Medium,
    pub address: String,
    pub validated_at: DateTime<Utc>,
    pub added_at: DateTime<Utc>,
}

/// A verified ownership triple returned by the identity verifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedThreepid {
    pub medium: Medium,
    pub address: String,
    pub validated_at: DateTime<Utc>,
}

impl VerifiedThreepid {
    /// Validate an exchange response into a verified triple.
    ///
    /// The verifier must return all of `medium`, `address`, and
    /// `validated_at` (milliseconds); anything else is a server-side fault,
    /// not a client error. Email addresses are normalized here so every
    /// downstream lookup shares the store's key space.
    pub fn from_exchange(value: &serde_json::Value) -> Result<Self, crate::error::ApiError> {
        let medium = value
            .get("medium")
            .and_then(serde_json::Value::as_str)
            .and_then(Medium::from_str);
        let address = value.get("address").and_then(serde_json::Value::as_str);
        let validated_at = value
            .get("validated_at")
            .and_then(serde_json::Value::as_i64)
            .and_then(|millis| DateTime::<Utc>::from_timestamp_millis(millis));

        match (medium, address, validated_at) {
            (Some(medium), Some(address), Some(validated_at)) => {
                let address = match medium {
                    Medium::Email => super::normalize::normalize_email(address),
                    Medium::Msisdn => address.to_string(),
                };
                Ok(Self {
                    medium,
                    address,
                    validated_at,
                })
            }
            _ => Err(crate::error::ApiError::MalformedVerifierResponse),
        }
    }
}

/// Signed session credentials a client hands back after proving ownership.
///
/// Opaque to this service; they are only ever forwarded to the identity
/// verifier for exchange or binding publication.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ThreepidCredentials {
    pub id_server: String,
    pub sid: String,
    pub client_secret: String,
}

/// Ownership policy applied before issuing a verification token.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TokenRequestPolicy {
    /// The address must already belong to an account (password reset).
    PasswordReset,
    /// The address must not belong to any account (adding a threepid).
    AddThreepid,
}
