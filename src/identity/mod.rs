//! Identity verifier contract and HTTP adapter.
//!
//! The identity server owns token delivery (mail/SMS), credential validation,
//! and the public binding directory. This service only ever forwards opaque
//! payloads to it and interprets three results: a token-issuance receipt, a
//! verified `{medium, address, validated_at}` triple, or a refusal.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::threepid::{Medium, ThreepidCredentials};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound contract to the identity server.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Ask the identity server to deliver a verification token to an address.
    ///
    /// The response is opaque to this service and passed through to clients.
    /// Retries with the same `(client_secret, send_attempt)` are deduplicated
    /// by the identity server, not here.
    async fn issue_token(
        &self,
        medium: Medium,
        address: &str,
        client_secret: &str,
        send_attempt: u32,
        id_server: &str,
    ) -> Result<Value>;

    /// Exchange signed session credentials for a verified triple.
    ///
    /// `Ok(None)` means the identity server refused the credentials; `Err` is
    /// reserved for transport-level failures.
    async fn exchange_credentials(&self, creds: &ThreepidCredentials) -> Result<Option<Value>>;

    /// Publish a `threepid -> user` binding to the identity server directory.
    async fn publish_binding(&self, creds: &ThreepidCredentials, user_id: Uuid) -> Result<()>;
}

/// reqwest-backed verifier talking to trusted identity servers.
#[derive(Clone)]
pub struct HttpIdentityVerifier {
    client: Client,
}

impl HttpIdentityVerifier {
    /// Build the adapter with a bounded request timeout so callers are never
    /// blocked past it; guard checks always run before any outbound call.
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .context("failed to build identity verifier client")?;
        Ok(Self { client })
    }

    fn base_url(id_server: &str) -> String {
        // Bare hostnames default to https; an explicit scheme wins.
        if id_server.starts_with("http://") || id_server.starts_with("https://") {
            id_server.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", id_server.trim_end_matches('/'))
        }
    }
}

#[async_trait]
impl IdentityVerifier for HttpIdentityVerifier {
    async fn issue_token(
        &self,
        medium: Medium,
        address: &str,
        client_secret: &str,
        send_attempt: u32,
        id_server: &str,
    ) -> Result<Value> {
        let url = format!(
            "{}/v1/validate/{}/request-token",
            Self::base_url(id_server),
            medium.as_str()
        );
        let body = json!({
            "medium": medium.as_str(),
            "address": address,
            "client_secret": client_secret,
            "send_attempt": send_attempt,
        });
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("identity server unreachable: {url}"))?
            .error_for_status()
            .context("identity server rejected token request")?;
        response
            .json()
            .await
            .context("invalid json from identity server")
    }

    async fn exchange_credentials(&self, creds: &ThreepidCredentials) -> Result<Option<Value>> {
        let url = format!(
            "{}/v1/threepid/get-validated",
            Self::base_url(&creds.id_server)
        );
        let body = json!({
            "sid": creds.sid,
            "client_secret": creds.client_secret,
        });
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("identity server unreachable: {url}"))?;

        if response.status().is_client_error() {
            debug!(id_server = %creds.id_server, "identity server refused credentials");
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .context("identity server failed during credential exchange")?;
        let value = response
            .json()
            .await
            .context("invalid json from identity server")?;
        Ok(Some(value))
    }

    async fn publish_binding(&self, creds: &ThreepidCredentials, user_id: Uuid) -> Result<()> {
        let url = format!("{}/v1/threepid/bind", Self::base_url(&creds.id_server));
        let body = json!({
            "sid": creds.sid,
            "client_secret": creds.client_secret,
            "user_id": user_id,
        });
        self.client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("identity server unreachable: {url}"))?
            .error_for_status()
            .context("identity server rejected binding")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::HttpIdentityVerifier;

    #[test]
    fn base_url_defaults_to_https() {
        assert_eq!(
            HttpIdentityVerifier::base_url("id.example.com"),
            "https://id.example.com"
        );
    }

    #[test]
    fn base_url_keeps_explicit_scheme() {
        assert_eq!(
            HttpIdentityVerifier::base_url("http://localhost:8090/"),
            "http://localhost:8090"
        );
    }
}
