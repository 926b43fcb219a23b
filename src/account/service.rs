//! Account mutation gateway.
//!
//! Flow Overview:
//! 1) The endpoint runs interactive authentication and hands the completed
//!    stage results here.
//! 2) The gateway resolves which user the mutation targets and cross-checks
//!    it against the bearer-authenticated requester.
//! 3) Only then does the credential change or deactivation reach the store.

use secrecy::SecretString;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::ApiError;
use crate::threepid::ThreepidStore;
use crate::uia::{AuthStageResult, StageResult, StageType};

use super::store::{AccountStore, DeactivateOutcome, Principal};

/// Applies password changes and deactivation after UIA success.
pub struct AccountService {
    accounts: Arc<dyn AccountStore>,
    threepids: Arc<dyn ThreepidStore>,
}

impl AccountService {
    #[must_use]
    pub fn new(accounts: Arc<dyn AccountStore>, threepids: Arc<dyn ThreepidStore>) -> Self {
        Self {
            accounts,
            threepids,
        }
    }

    /// Change a password for the user the completed stages resolve to.
    ///
    /// A password-stage win requires the bearer-authenticated requester to be
    /// the same user: a stolen stage credential replayed against another
    /// logged-in session must not go through. A threepid-stage win resolves
    /// the target through the association store instead.
    ///
    /// # Errors
    ///
    /// `MissingToken`/`IdentityMismatch` on requester cross-check failures,
    /// `AddressNotFound` when the verified address has no owner,
    /// `UnknownAuthResult` when the stage results match no known shape.
    pub async fn change_password(
        &self,
        completed: &AuthStageResult,
        requester: Option<&Principal>,
        new_password: &SecretString,
    ) -> Result<(), ApiError> {
        let user_id = self.resolve_target(completed, requester).await?;
        self.accounts.set_password(user_id, new_password).await?;
        debug!(user_id = %user_id, "password changed");
        Ok(())
    }

    /// Deactivate an account.
    ///
    /// Service principals skip interactive auth and may deactivate accounts
    /// they administer (`explicit_target`), defaulting to their own user.
    /// Everyone else must have completed the password stage as themselves.
    /// Deactivation is terminal and idempotent: repeating it succeeds.
    ///
    /// # Errors
    ///
    /// `MissingToken` when no bearer identity accompanies a password-stage
    /// result, `IdentityMismatch` when it names a different user.
    pub async fn deactivate(
        &self,
        requester: Option<&Principal>,
        completed: Option<&AuthStageResult>,
        explicit_target: Option<Uuid>,
    ) -> Result<(), ApiError> {
        let target = match requester {
            Some(principal) if principal.service => {
                explicit_target.unwrap_or(principal.user_id)
            }
            _ => {
                let completed = completed.ok_or(ApiError::UnknownAuthResult)?;
                let Some(StageResult::Password { user_id }) =
                    completed.get(&StageType::Password)
                else {
                    error!("auth succeeded with no password stage result");
                    return Err(ApiError::UnknownAuthResult);
                };
                let principal = requester.ok_or(ApiError::MissingToken)?;
                if principal.user_id != *user_id {
                    return Err(ApiError::IdentityMismatch);
                }
                *user_id
            }
        };

        match self.accounts.deactivate(target).await? {
            DeactivateOutcome::Deactivated => Ok(()),
            DeactivateOutcome::AlreadyDeactivated => {
                // Terminal state; repeating the request is a success.
                debug!(user_id = %target, "account already deactivated");
                Ok(())
            }
            DeactivateOutcome::NotFound => Err(ApiError::UserNotFound),
        }
    }

    /// Exactly one resolution path applies: password stage or threepid stage.
    /// Anything else means the engine and the endpoint disagree about flows,
    /// which is our fault, not the client's.
    async fn resolve_target(
        &self,
        completed: &AuthStageResult,
        requester: Option<&Principal>,
    ) -> Result<Uuid, ApiError> {
        if let Some(StageResult::Password { user_id }) = completed.get(&StageType::Password) {
            let principal = requester.ok_or(ApiError::MissingToken)?;
            if principal.user_id != *user_id {
                return Err(ApiError::IdentityMismatch);
            }
            return Ok(*user_id);
        }

        let threepid = completed
            .get(&StageType::EmailIdentity)
            .or_else(|| completed.get(&StageType::Msisdn));
        if let Some(StageResult::Threepid { threepid }) = threepid {
            let owner = self
                .threepids
                .get_owner(threepid.medium, &threepid.address)
                .await?;
            return owner.ok_or(ApiError::AddressNotFound);
        }

        error!("auth succeeded with no known stage result");
        Err(ApiError::UnknownAuthResult)
    }
}

#[cfg(test)]
mod tests {
    use super::AccountService;
    use crate::account::store::{AccountStore, MemoryAccountStore, Principal};
    use crate::error::ApiError;
    use crate::threepid::store::{MemoryThreepidStore, ThreepidStore};
    use crate::threepid::{Medium, VerifiedThreepid};
    use crate::uia::{AuthStageResult, StageResult, StageType};
    use anyhow::{Result, anyhow};
    use chrono::Utc;
    use secrecy::SecretString;
    use std::sync::Arc;
    use uuid::Uuid;

    struct Fixture {
        service: AccountService,
        accounts: Arc<MemoryAccountStore>,
        threepids: Arc<MemoryThreepidStore>,
    }

    fn fixture() -> Fixture {
        let accounts = Arc::new(MemoryAccountStore::new());
        let threepids = Arc::new(MemoryThreepidStore::new());
        let service = AccountService::new(accounts.clone(), threepids.clone());
        Fixture {
            service,
            accounts,
            threepids,
        }
    }

    fn password_result(user_id: Uuid) -> AuthStageResult {
        let mut completed = AuthStageResult::new();
        completed.insert(StageType::Password, StageResult::Password { user_id });
        completed
    }

    fn email_result(address: &str) -> AuthStageResult {
        let mut completed = AuthStageResult::new();
        completed.insert(
            StageType::EmailIdentity,
            StageResult::Threepid {
                threepid: VerifiedThreepid {
                    medium: Medium::Email,
                    address: address.to_string(),
                    validated_at: Utc::now(),
                },
            },
        );
        completed
    }

    fn principal(user_id: Uuid) -> Principal {
        Principal {
            user_id,
            service: false,
        }
    }

    #[tokio::test]
    async fn password_stage_requires_matching_requester() -> Result<()> {
        let fx = fixture();
        let user = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        fx.accounts.add_user(user, "old-password").await;
        fx.accounts.add_user(stranger, "other-password").await;

        let outcome = fx
            .service
            .change_password(
                &password_result(user),
                Some(&principal(stranger)),
                &SecretString::from("new-password"),
            )
            .await;
        assert!(matches!(outcome, Err(ApiError::IdentityMismatch)));
        // The credential must be untouched.
        assert_eq!(
            fx.accounts.current_password(user).await.as_deref(),
            Some("old-password")
        );
        Ok(())
    }

    #[tokio::test]
    async fn password_stage_requires_a_bearer_identity() -> Result<()> {
        let fx = fixture();
        let user = Uuid::new_v4();
        fx.accounts.add_user(user, "old-password").await;

        let outcome = fx
            .service
            .change_password(
                &password_result(user),
                None,
                &SecretString::from("new-password"),
            )
            .await;
        assert!(matches!(outcome, Err(ApiError::MissingToken)));
        Ok(())
    }

    #[tokio::test]
    async fn password_stage_changes_own_credential() -> Result<()> {
        let fx = fixture();
        let user = Uuid::new_v4();
        fx.accounts.add_user(user, "old-password").await;

        fx.service
            .change_password(
                &password_result(user),
                Some(&principal(user)),
                &SecretString::from("new-password"),
            )
            .await
            .map_err(|err| anyhow!("{err}"))?;
        assert!(
            fx.accounts
                .verify_password(user, &SecretString::from("new-password"))
                .await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn threepid_stage_resolves_owner() -> Result<()> {
        let fx = fixture();
        let user = Uuid::new_v4();
        fx.accounts.add_user(user, "old-password").await;
        fx.threepids
            .insert_if_absent(Medium::Email, "a@b.com", user, Utc::now())
            .await?;

        fx.service
            .change_password(
                &email_result("a@b.com"),
                None,
                &SecretString::from("reset-password"),
            )
            .await
            .map_err(|err| anyhow!("{err}"))?;
        assert!(
            fx.accounts
                .verify_password(user, &SecretString::from("reset-password"))
                .await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn threepid_stage_without_owner_is_not_found() -> Result<()> {
        let fx = fixture();
        let outcome = fx
            .service
            .change_password(
                &email_result("nobody@b.com"),
                None,
                &SecretString::from("reset-password"),
            )
            .await;
        assert!(matches!(outcome, Err(ApiError::AddressNotFound)));
        Ok(())
    }

    #[tokio::test]
    async fn empty_stage_results_are_a_server_fault() -> Result<()> {
        let fx = fixture();
        let outcome = fx
            .service
            .change_password(
                &AuthStageResult::new(),
                None,
                &SecretString::from("whatever"),
            )
            .await;
        assert!(matches!(outcome, Err(ApiError::UnknownAuthResult)));
        Ok(())
    }

    #[tokio::test]
    async fn service_principal_deactivates_without_uia() -> Result<()> {
        let fx = fixture();
        let managed = Uuid::new_v4();
        let robot = Uuid::new_v4();
        fx.accounts.add_user(managed, "password").await;
        fx.accounts.add_user(robot, "password").await;

        fx.service
            .deactivate(
                Some(&Principal {
                    user_id: robot,
                    service: true,
                }),
                None,
                Some(managed),
            )
            .await
            .map_err(|err| anyhow!("{err}"))?;
        assert!(
            !fx.accounts
                .verify_password(managed, &SecretString::from("password"))
                .await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn plain_principal_needs_password_stage() -> Result<()> {
        let fx = fixture();
        let user = Uuid::new_v4();
        fx.accounts.add_user(user, "password").await;

        // Matching requester and password stage: success, twice (idempotent).
        fx.service
            .deactivate(
                Some(&principal(user)),
                Some(&password_result(user)),
                None,
            )
            .await
            .map_err(|err| anyhow!("{err}"))?;
        fx.service
            .deactivate(
                Some(&principal(user)),
                Some(&password_result(user)),
                None,
            )
            .await
            .map_err(|err| anyhow!("{err}"))?;
        Ok(())
    }

    #[tokio::test]
    async fn deactivation_cross_checks_requester() -> Result<()> {
        let fx = fixture();
        let user = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        fx.accounts.add_user(user, "password").await;
        fx.accounts.add_user(stranger, "password").await;

        let outcome = fx
            .service
            .deactivate(
                Some(&principal(stranger)),
                Some(&password_result(user)),
                None,
            )
            .await;
        assert!(matches!(outcome, Err(ApiError::IdentityMismatch)));

        let outcome = fx
            .service
            .deactivate(None, Some(&password_result(user)), None)
            .await;
        assert!(matches!(outcome, Err(ApiError::MissingToken)));
        Ok(())
    }
}
