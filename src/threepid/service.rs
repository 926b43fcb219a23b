//! Threepid lifecycle orchestration.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::identity::IdentityVerifier;

use super::models::{
    Medium, ThreepidAssociation, ThreepidCredentials, TokenRequestPolicy, VerifiedThreepid,
};
use super::normalize::{canonicalize_msisdn, normalize_email, valid_email};
use super::store::{DeleteOutcome, InsertOutcome, ThreepidStore};

/// An address as submitted by a client, before canonicalization.
#[derive(Clone, Debug)]
pub enum AddressInput {
    Email { email: String },
    Phone { country: String, phone_number: String },
}

impl AddressInput {
    #[must_use]
    pub fn medium(&self) -> Medium {
        match self {
            Self::Email { .. } => Medium::Email,
            Self::Phone { .. } => Medium::Msisdn,
        }
    }

    /// Canonicalize into the store's key space.
    pub fn normalize(&self) -> Result<String, ApiError> {
        match self {
            Self::Email { email } => {
                let email = normalize_email(email);
                if !valid_email(&email) {
                    return Err(ApiError::BadRequest("Invalid email address".to_string()));
                }
                Ok(email)
            }
            Self::Phone {
                country,
                phone_number,
            } => canonicalize_msisdn(country, phone_number),
        }
    }
}

/// Whether binding publication happened after a successful add.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BindStatus {
    NotRequested,
    Published,
    /// Publication failed; the local association stands and the binding can
    /// be retried independently.
    Failed,
}

/// Orchestrates token issuance, verification exchange, and association
/// add/delete/list against the store and the identity verifier.
pub struct ThreepidService {
    store: Arc<dyn ThreepidStore>,
    verifier: Arc<dyn IdentityVerifier>,
}

impl ThreepidService {
    #[must_use]
    pub fn new(store: Arc<dyn ThreepidStore>, verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self { store, verifier }
    }

    /// Ask the identity verifier to deliver a verification token, after the
    /// ownership guard for the flow has passed.
    ///
    /// Password-reset flows require the address to already have an owner;
    /// add flows require it to have none. The guard re-reads ownership on
    /// every call and never mutates state, so repeated requests (same
    /// `client_secret`/`send_attempt`) stay idempotent end to end.
    ///
    /// # Errors
    ///
    /// `AddressNotFound` / `AddressInUse` from the guard; upstream issuance
    /// failures surface as internal errors.
    pub async fn request_token(
        &self,
        input: &AddressInput,
        client_secret: &str,
        send_attempt: u32,
        id_server: &str,
        policy: TokenRequestPolicy,
    ) -> Result<Value, ApiError> {
        let medium = input.medium();
        let address = input.normalize()?;

        let owner = self.store.get_owner(medium, &address).await?;
        match policy {
            TokenRequestPolicy::PasswordReset => {
                if owner.is_none() {
                    return Err(ApiError::AddressNotFound);
                }
            }
            TokenRequestPolicy::AddThreepid => {
                if owner.is_some() {
                    return Err(ApiError::AddressInUse);
                }
            }
        }

        // The issuance response is opaque; pass it through unmodified.
        let response = self
            .verifier
            .issue_token(medium, &address, client_secret, send_attempt, id_server)
            .await?;
        Ok(response)
    }

    /// Exchange credentials for a verified triple and associate it with the
    /// user.
    ///
    /// The insert is atomic against concurrent adds of the same address.
    /// Binding publication runs after the insert and is best-effort: a
    /// failure is logged and reflected in the returned [`BindStatus`], never
    /// rolled back.
    ///
    /// # Errors
    ///
    /// `CredentialAuthFailed` when the verifier refuses the credentials,
    /// `MalformedVerifierResponse` when its response lacks the triple,
    /// `AddressInUse` when another account owns the address.
    pub async fn add_threepid(
        &self,
        user_id: Uuid,
        creds: &ThreepidCredentials,
        bind: bool,
    ) -> Result<BindStatus, ApiError> {
        let Some(value) = self.verifier.exchange_credentials(creds).await? else {
            return Err(ApiError::CredentialAuthFailed);
        };
        let verified = VerifiedThreepid::from_exchange(&value)?;

        let outcome = self
            .store
            .insert_if_absent(
                verified.medium,
                &verified.address,
                user_id,
                verified.validated_at,
            )
            .await?;
        if outcome == InsertOutcome::Conflict {
            return Err(ApiError::AddressInUse);
        }

        if !bind {
            return Ok(BindStatus::NotRequested);
        }
        debug!(user_id = %user_id, medium = verified.medium.as_str(), "publishing threepid binding");
        match self.verifier.publish_binding(creds, user_id).await {
            Ok(()) => Ok(BindStatus::Published),
            Err(err) => {
                // Local association is the source of truth; the publication
                // can be retried independently.
                warn!("failed to publish threepid binding: {err:#}");
                Ok(BindStatus::Failed)
            }
        }
    }

    /// Remove an association the user owns.
    ///
    /// # Errors
    ///
    /// `ThreepidNotFound` when no association exists, `NotOwner` when it
    /// belongs to someone else; the store is left unchanged in both cases.
    pub async fn delete_threepid(
        &self,
        user_id: Uuid,
        medium: Medium,
        address: &str,
    ) -> Result<(), ApiError> {
        let address = Self::normalize_for_medium(medium, address);
        match self.store.delete(medium, &address, user_id).await? {
            DeleteOutcome::Deleted => Ok(()),
            DeleteOutcome::NotFound => Err(ApiError::ThreepidNotFound),
            DeleteOutcome::NotOwner => Err(ApiError::NotOwner),
        }
    }

    /// All associations owned by the user, in insertion order.
    pub async fn list_threepids(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ThreepidAssociation>, ApiError> {
        Ok(self.store.list(user_id).await?)
    }

    /// Delete shares add's key space: emails are lower-cased, msisdns are
    /// already canonical digits (a stray `+` prefix is tolerated).
    fn normalize_for_medium(medium: Medium, address: &str) -> String {
        match medium {
            Medium::Email => normalize_email(address),
            Medium::Msisdn => address.trim().trim_start_matches('+').to_string(),
        }
    }
}
