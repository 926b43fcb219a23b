//! The stage-selection engine.

use secrecy::SecretString;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

use crate::account::AccountStore;
use crate::error::ApiError;
use crate::identity::IdentityVerifier;
use crate::threepid::{Medium, VerifiedThreepid};

use super::models::{AuthDict, StageResult, StageType, UiaChallenge, UiaOutcome, UiaSession};
use super::store::UiaSessionStore;

enum StageAttempt {
    Complete(StageResult),
    Failed {
        errcode: &'static str,
        error: &'static str,
    },
}

/// Evaluates interactive-auth payloads against the stage combinations an
/// endpoint accepts.
pub struct UiaService {
    accounts: Arc<dyn AccountStore>,
    verifier: Arc<dyn IdentityVerifier>,
    sessions: Arc<dyn UiaSessionStore>,
}

impl UiaService {
    #[must_use]
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        verifier: Arc<dyn IdentityVerifier>,
        sessions: Arc<dyn UiaSessionStore>,
    ) -> Self {
        Self {
            accounts,
            verifier,
            sessions,
        }
    }

    /// Evaluate one round trip of interactive authentication.
    ///
    /// `flows` is the endpoint's ordered list of acceptable stage sets;
    /// authentication succeeds once every stage of some flow is complete.
    /// `params` is the request body minus its `auth` object; the first round
    /// trip's params are kept on the session for later ones.
    ///
    /// A failed stage is session-scoped: the challenge carries an error but
    /// prior completions survive and the client may retry.
    ///
    /// # Errors
    ///
    /// `UnknownStageType` for unrecognized stage tags, `MissingParams` when a
    /// stage payload is incomplete, `MalformedVerifierResponse` when the
    /// identity verifier returns an unusable triple.
    pub async fn check_auth(
        &self,
        flows: &[&[StageType]],
        auth: Option<AuthDict>,
        params: Map<String, Value>,
    ) -> Result<UiaOutcome, ApiError> {
        let mut session = match auth.as_ref().and_then(|auth| auth.session.as_deref()) {
            Some(id) => self.sessions.load(id).await?.unwrap_or_default(),
            None => UiaSession::new(),
        };

        // The first non-empty body wins; later round trips usually carry only
        // the auth object and reuse what the session captured.
        if session.params.is_empty() && !params.is_empty() {
            session.params = params;
        }

        let mut stage_failure = None;
        if let Some(auth) = auth {
            if let Some(tag) = auth.stage.as_deref() {
                let Some(stage) = StageType::from_str(tag) else {
                    return Err(ApiError::UnknownStageType(tag.to_string()));
                };
                // Already-completed stages are not re-verified: verifiers may
                // consume one-time tokens, and retries must be no-ops.
                if session.completed.contains_key(&stage) {
                    debug!(stage = stage.as_str(), "stage already complete, skipping");
                } else {
                    match self.verify_stage(stage, &auth).await? {
                        StageAttempt::Complete(result) => {
                            session.completed.insert(stage, result);
                        }
                        StageAttempt::Failed { errcode, error } => {
                            stage_failure = Some((errcode, error));
                        }
                    }
                }
            }
        }

        self.sessions.save(&session).await?;

        let satisfied = flows
            .iter()
            .any(|flow| flow.iter().all(|stage| session.completed.contains_key(stage)));
        if satisfied {
            return Ok(UiaOutcome::Authenticated {
                completed: session.completed,
                params: session.params,
            });
        }

        let mut challenge = UiaChallenge::new(flows, &session.completed, session.id);
        if let Some((errcode, error)) = stage_failure {
            challenge = challenge.with_error(errcode, error);
        }
        Ok(UiaOutcome::Continue(challenge))
    }

    async fn verify_stage(
        &self,
        stage: StageType,
        auth: &AuthDict,
    ) -> Result<StageAttempt, ApiError> {
        match stage {
            StageType::Password => {
                let mut missing = Vec::new();
                if auth.user_id.is_none() {
                    missing.push("user_id");
                }
                if auth.password.is_none() {
                    missing.push("password");
                }
                let (Some(user_id), Some(password)) = (auth.user_id, auth.password.as_deref())
                else {
                    return Err(ApiError::MissingParams(missing));
                };
                let password = SecretString::from(password);
                if self.accounts.verify_password(user_id, &password).await? {
                    Ok(StageAttempt::Complete(StageResult::Password { user_id }))
                } else {
                    // Same answer for wrong password and unknown/deactivated
                    // user; the distinction is an oracle.
                    Ok(StageAttempt::Failed {
                        errcode: "FORBIDDEN",
                        error: "Invalid credentials",
                    })
                }
            }
            StageType::EmailIdentity | StageType::Msisdn => {
                let Some(creds) = auth.threepid_creds.as_ref() else {
                    return Err(ApiError::MissingParams(vec!["threepid_creds"]));
                };
                let Some(value) = self.verifier.exchange_credentials(creds).await? else {
                    return Ok(StageAttempt::Failed {
                        errcode: "CREDENTIAL_AUTH_FAILED",
                        error: "Identity server refused the credentials",
                    });
                };
                let verified = VerifiedThreepid::from_exchange(&value)?;
                let expected = match stage {
                    StageType::EmailIdentity => Medium::Email,
                    _ => Medium::Msisdn,
                };
                if verified.medium != expected {
                    return Err(ApiError::BadRequest(format!(
                        "Stage {} cannot verify a {} address",
                        stage.as_str(),
                        verified.medium.as_str()
                    )));
                }
                Ok(StageAttempt::Complete(StageResult::Threepid {
                    threepid: verified,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::UiaService;
    use crate::account::MemoryAccountStore;
    use crate::error::ApiError;
    use crate::identity::IdentityVerifier;
    use crate::threepid::{Medium, ThreepidCredentials};
    use crate::uia::models::{AuthDict, StageResult, StageType, UiaOutcome};
    use crate::uia::store::MemoryUiaSessionStore;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use serde_json::{Map, Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct StubVerifier {
        exchange_response: Option<Value>,
        exchange_calls: AtomicUsize,
    }

    impl StubVerifier {
        fn refusing() -> Self {
            Self {
                exchange_response: None,
                exchange_calls: AtomicUsize::new(0),
            }
        }

        fn verifying(value: Value) -> Self {
            Self {
                exchange_response: Some(value),
                exchange_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl IdentityVerifier for StubVerifier {
        async fn issue_token(
            &self,
            _medium: Medium,
            _address: &str,
            _client_secret: &str,
            _send_attempt: u32,
            _id_server: &str,
        ) -> Result<Value> {
            Ok(json!({"sid": "1"}))
        }

        async fn exchange_credentials(
            &self,
            _creds: &ThreepidCredentials,
        ) -> Result<Option<Value>> {
            self.exchange_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.exchange_response.clone())
        }

        async fn publish_binding(
            &self,
            _creds: &ThreepidCredentials,
            _user_id: Uuid,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn creds() -> ThreepidCredentials {
        ThreepidCredentials {
            id_server: "id.example.com".to_string(),
            sid: "1".to_string(),
            client_secret: "secret".to_string(),
        }
    }

    async fn service_with(verifier: StubVerifier) -> (UiaService, Arc<MemoryAccountStore>, Uuid) {
        let accounts = Arc::new(MemoryAccountStore::new());
        let user = Uuid::new_v4();
        accounts.add_user(user, "hunter2").await;
        let service = UiaService::new(
            accounts.clone(),
            Arc::new(verifier),
            Arc::new(MemoryUiaSessionStore::new()),
        );
        (service, accounts, user)
    }

    fn password_auth(user: Uuid, password: &str, session: Option<String>) -> AuthDict {
        AuthDict {
            stage: Some("password".to_string()),
            session,
            user_id: Some(user),
            password: Some(password.to_string()),
            threepid_creds: None,
        }
    }

    #[tokio::test]
    async fn no_auth_yields_challenge_with_session() -> Result<()> {
        let (service, _, _) = service_with(StubVerifier::refusing()).await;
        let outcome = service
            .check_auth(&[&[StageType::Password]], None, Map::new())
            .await
            .map_err(|err| anyhow!("{err}"))?;
        match outcome {
            UiaOutcome::Continue(challenge) => {
                assert!(!challenge.session.is_empty());
                assert!(challenge.completed.is_empty());
                assert_eq!(challenge.flows.len(), 1);
            }
            UiaOutcome::Authenticated { .. } => return Err(anyhow!("must not authenticate")),
        }
        Ok(())
    }

    #[tokio::test]
    async fn partial_flow_is_not_authenticated() -> Result<()> {
        // Flows [[password, email.identity], [msisdn]]: password alone is not
        // enough.
        let (service, _, user) = service_with(StubVerifier::refusing()).await;
        let flows: &[&[StageType]] = &[
            &[StageType::Password, StageType::EmailIdentity],
            &[StageType::Msisdn],
        ];
        let outcome = service
            .check_auth(flows, Some(password_auth(user, "hunter2", None)), Map::new())
            .await
            .map_err(|err| anyhow!("{err}"))?;
        match outcome {
            UiaOutcome::Continue(challenge) => {
                assert_eq!(challenge.completed, vec![StageType::Password]);
            }
            UiaOutcome::Authenticated { .. } => return Err(anyhow!("must not authenticate")),
        }
        Ok(())
    }

    #[tokio::test]
    async fn completing_a_full_flow_authenticates() -> Result<()> {
        let exchange = json!({
            "medium": "email",
            "address": "User@Example.com",
            "validated_at": 1_700_000_000_000_i64,
        });
        let (service, _, user) = service_with(StubVerifier::verifying(exchange)).await;
        let flows: &[&[StageType]] = &[
            &[StageType::Password, StageType::EmailIdentity],
            &[StageType::Msisdn],
        ];

        let mut params = Map::new();
        params.insert("new_password".to_string(), json!("s3cr3t"));
        let outcome = service
            .check_auth(flows, Some(password_auth(user, "hunter2", None)), params)
            .await
            .map_err(|err| anyhow!("{err}"))?;
        let UiaOutcome::Continue(challenge) = outcome else {
            return Err(anyhow!("one stage must not be enough"));
        };

        let auth = AuthDict {
            stage: Some("email.identity".to_string()),
            session: Some(challenge.session),
            user_id: None,
            password: None,
            threepid_creds: Some(creds()),
        };
        let outcome = service
            .check_auth(flows, Some(auth), Map::new())
            .await
            .map_err(|err| anyhow!("{err}"))?;
        match outcome {
            UiaOutcome::Authenticated { completed, params } => {
                assert!(completed.contains_key(&StageType::Password));
                let Some(StageResult::Threepid { threepid }) =
                    completed.get(&StageType::EmailIdentity)
                else {
                    return Err(anyhow!("missing email stage result"));
                };
                assert_eq!(threepid.address, "user@example.com");
                // Params captured on the first round trip are still there.
                assert_eq!(params.get("new_password"), Some(&json!("s3cr3t")));
            }
            UiaOutcome::Continue(_) => return Err(anyhow!("both stages were completed")),
        }
        Ok(())
    }

    #[tokio::test]
    async fn single_stage_alternative_authenticates_alone() -> Result<()> {
        let exchange = json!({
            "medium": "msisdn",
            "address": "12025550143",
            "validated_at": 1_700_000_000_000_i64,
        });
        let (service, _, _) = service_with(StubVerifier::verifying(exchange)).await;
        let flows: &[&[StageType]] = &[
            &[StageType::Password, StageType::EmailIdentity],
            &[StageType::Msisdn],
        ];
        let auth = AuthDict {
            stage: Some("msisdn".to_string()),
            session: None,
            user_id: None,
            password: None,
            threepid_creds: Some(creds()),
        };
        let outcome = service
            .check_auth(flows, Some(auth), Map::new())
            .await
            .map_err(|err| anyhow!("{err}"))?;
        assert!(matches!(outcome, UiaOutcome::Authenticated { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_stage_type_is_rejected() -> Result<()> {
        let (service, _, _) = service_with(StubVerifier::refusing()).await;
        let auth = AuthDict {
            stage: Some("oauth2".to_string()),
            ..AuthDict::default()
        };
        let err = service
            .check_auth(&[&[StageType::Password]], Some(auth), Map::new())
            .await
            .err()
            .ok_or_else(|| anyhow!("expected an error"))?;
        assert!(matches!(err, ApiError::UnknownStageType(_)));
        Ok(())
    }

    #[tokio::test]
    async fn wrong_password_keeps_session_and_reports_failure() -> Result<()> {
        let (service, _, user) = service_with(StubVerifier::refusing()).await;
        let outcome = service
            .check_auth(
                &[&[StageType::Password]],
                Some(password_auth(user, "wrong", None)),
                Map::new(),
            )
            .await
            .map_err(|err| anyhow!("{err}"))?;
        match outcome {
            UiaOutcome::Continue(challenge) => {
                assert_eq!(challenge.errcode.as_deref(), Some("FORBIDDEN"));
                assert!(challenge.completed.is_empty());
            }
            UiaOutcome::Authenticated { .. } => return Err(anyhow!("must not authenticate")),
        }
        Ok(())
    }

    #[tokio::test]
    async fn resubmitted_stage_is_not_reverified() -> Result<()> {
        let exchange = json!({
            "medium": "email",
            "address": "a@b.com",
            "validated_at": 1_700_000_000_000_i64,
        });
        let verifier = StubVerifier::verifying(exchange);
        let accounts = Arc::new(MemoryAccountStore::new());
        let verifier = Arc::new(verifier);
        let service = UiaService::new(
            accounts,
            verifier.clone(),
            Arc::new(MemoryUiaSessionStore::new()),
        );
        let flows: &[&[StageType]] = &[&[StageType::Password, StageType::EmailIdentity]];

        let auth = AuthDict {
            stage: Some("email.identity".to_string()),
            session: None,
            user_id: None,
            password: None,
            threepid_creds: Some(creds()),
        };
        let outcome = service
            .check_auth(flows, Some(auth.clone()), Map::new())
            .await
            .map_err(|err| anyhow!("{err}"))?;
        let UiaOutcome::Continue(challenge) = outcome else {
            return Err(anyhow!("password stage still missing"));
        };

        // Same stage again within the same session: the stored result is
        // reused, the verifier is not called twice.
        let auth = AuthDict {
            session: Some(challenge.session),
            ..auth
        };
        let _ = service
            .check_auth(flows, Some(auth), Map::new())
            .await
            .map_err(|err| anyhow!("{err}"))?;
        assert_eq!(verifier.exchange_calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn refused_credentials_report_stage_failure() -> Result<()> {
        let (service, _, _) = service_with(StubVerifier::refusing()).await;
        let auth = AuthDict {
            stage: Some("email.identity".to_string()),
            session: None,
            user_id: None,
            password: None,
            threepid_creds: Some(creds()),
        };
        let outcome = service
            .check_auth(&[&[StageType::EmailIdentity]], Some(auth), Map::new())
            .await
            .map_err(|err| anyhow!("{err}"))?;
        match outcome {
            UiaOutcome::Continue(challenge) => {
                assert_eq!(challenge.errcode.as_deref(), Some("CREDENTIAL_AUTH_FAILED"));
            }
            UiaOutcome::Authenticated { .. } => return Err(anyhow!("must not authenticate")),
        }
        Ok(())
    }

    #[tokio::test]
    async fn malformed_exchange_is_a_server_fault() -> Result<()> {
        let (service, _, _) =
            service_with(StubVerifier::verifying(json!({"medium": "email"}))).await;
        let auth = AuthDict {
            stage: Some("email.identity".to_string()),
            session: None,
            user_id: None,
            password: None,
            threepid_creds: Some(creds()),
        };
        let err = service
            .check_auth(&[&[StageType::EmailIdentity]], Some(auth), Map::new())
            .await
            .err()
            .ok_or_else(|| anyhow!("expected an error"))?;
        assert!(matches!(err, ApiError::MalformedVerifierResponse));
        Ok(())
    }
}
