//! Shared state and configuration for account endpoints.

use std::sync::Arc;

use crate::account::{AccountService, AccountStore};
use crate::error::ApiError;
use crate::identity::IdentityVerifier;
use crate::threepid::{ThreepidService, ThreepidStore};
use crate::uia::{UiaService, UiaSessionStore};

/// Service configuration loaded at startup.
#[derive(Clone, Debug, Default)]
pub struct AppConfig {
    trusted_id_servers: Vec<String>,
}

impl AppConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict which identity servers clients may name in token requests.
    /// An empty list trusts any.
    #[must_use]
    pub fn with_trusted_id_servers(mut self, servers: Vec<String>) -> Self {
        self.trusted_id_servers = servers;
        self
    }

    #[must_use]
    pub fn trusted_id_servers(&self) -> &[String] {
        &self.trusted_id_servers
    }

    pub(crate) fn check_id_server(&self, id_server: &str) -> Result<(), ApiError> {
        if self.trusted_id_servers.is_empty()
            || self.trusted_id_servers.iter().any(|s| s == id_server)
        {
            Ok(())
        } else {
            Err(ApiError::BadRequest(format!(
                "Untrusted identity server: {id_server}"
            )))
        }
    }
}

/// Collaborators and services wired once at startup and shared by handlers.
pub struct AppState {
    config: AppConfig,
    accounts: Arc<dyn AccountStore>,
    uia: UiaService,
    threepids: ThreepidService,
    gateway: AccountService,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: AppConfig,
        accounts: Arc<dyn AccountStore>,
        threepid_store: Arc<dyn ThreepidStore>,
        verifier: Arc<dyn IdentityVerifier>,
        sessions: Arc<dyn UiaSessionStore>,
    ) -> Self {
        let uia = UiaService::new(accounts.clone(), verifier.clone(), sessions);
        let threepids = ThreepidService::new(threepid_store.clone(), verifier);
        let gateway = AccountService::new(accounts.clone(), threepid_store);
        Self {
            config,
            accounts,
            uia,
            threepids,
            gateway,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub(crate) fn accounts(&self) -> &dyn AccountStore {
        self.accounts.as_ref()
    }

    #[must_use]
    pub fn uia(&self) -> &UiaService {
        &self.uia
    }

    #[must_use]
    pub fn threepids(&self) -> &ThreepidService {
        &self.threepids
    }

    #[must_use]
    pub fn gateway(&self) -> &AccountService {
        &self.gateway
    }
}

#[cfg(test)]
mod tests {
    use super::AppConfig;

    #[test]
    fn empty_allowlist_trusts_any_id_server() {
        let config = AppConfig::new();
        assert!(config.check_id_server("id.example.com").is_ok());
    }

    #[test]
    fn allowlist_rejects_unknown_id_servers() {
        let config =
            AppConfig::new().with_trusted_id_servers(vec!["id.example.com".to_string()]);
        assert!(config.check_id_server("id.example.com").is_ok());
        assert!(config.check_id_server("rogue.example.com").is_err());
    }
}
