//! Account storage contract and adapters.

use anyhow::{Context, Result, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use async_trait::async_trait;
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

/// Requester identity resolved from a bearer access token.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Principal {
    pub user_id: Uuid,
    /// Trusted automated principals may act on accounts they administer
    /// without interactive authentication.
    pub service: bool,
}

/// Outcome of a deactivation request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeactivateOutcome {
    Deactivated,
    AlreadyDeactivated,
    NotFound,
}

/// Storage contract for account credentials and bearer tokens.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Check a password against the stored credential.
    ///
    /// Deactivated and unknown users always fail.
    async fn verify_password(&self, user_id: Uuid, password: &SecretString) -> Result<bool>;

    /// Replace the stored credential for a user.
    async fn set_password(&self, user_id: Uuid, new_password: &SecretString) -> Result<()>;

    /// Mark an account deactivated and revoke its access tokens.
    ///
    /// Deactivation is terminal; repeating it reports `AlreadyDeactivated`.
    async fn deactivate(&self, user_id: Uuid) -> Result<DeactivateOutcome>;

    /// Resolve a hashed bearer token into a principal, skipping deactivated
    /// accounts.
    async fn lookup_access_token(&self, token_hash: &[u8]) -> Result<Option<Principal>>;
}

fn hash_password(password: &SecretString) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.expose_secret().as_bytes(), &salt)
        .map_err(|_| anyhow!("failed to hash password"))?
        .to_string();
    Ok(hash)
}

fn password_matches(password: &SecretString, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.expose_secret().as_bytes(), &parsed)
        .is_ok()
}

/// Postgres-backed account store; credentials are Argon2id hashes.
#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn verify_password(&self, user_id: Uuid, password: &SecretString) -> Result<bool> {
        let query = "SELECT password_hash FROM users WHERE id = $1 AND status = 'active'";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup password hash")?;

        let Some(row) = row else {
            return Ok(false);
        };
        let stored_hash: String = row.get("password_hash");
        Ok(password_matches(password, &stored_hash))
    }

    async fn set_password(&self, user_id: Uuid, new_password: &SecretString) -> Result<()> {
        let password_hash = hash_password(new_password)?;
        let query = r"
            UPDATE users
            SET password_hash = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'active'
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to set password")?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("no active user to set password for: {user_id}"));
        }
        Ok(())
    }

    async fn deactivate(&self, user_id: Uuid) -> Result<DeactivateOutcome> {
        // Flip the status and revoke tokens in one transaction so a failure
        // never leaves the account half-disabled.
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin deactivate transaction")?;

        let query = "SELECT status::text AS status FROM users WHERE id = $1 FOR UPDATE";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await
            .context("failed to lookup user for deactivation")?;

        let Some(row) = row else {
            tx.rollback().await.ok();
            return Ok(DeactivateOutcome::NotFound);
        };
        let status: String = row.get("status");
        if status == "deactivated" {
            tx.rollback().await.ok();
            return Ok(DeactivateOutcome::AlreadyDeactivated);
        }

        let query = r"
            UPDATE users
            SET status = 'deactivated', updated_at = NOW()
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to deactivate user")?;

        let query = "DELETE FROM access_tokens WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to revoke access tokens")?;

        tx.commit().await.context("commit deactivate transaction")?;
        Ok(DeactivateOutcome::Deactivated)
    }

    async fn lookup_access_token(&self, token_hash: &[u8]) -> Result<Option<Principal>> {
        let query = r"
            SELECT users.id, access_tokens.service
            FROM access_tokens
            JOIN users ON users.id = access_tokens.user_id
            WHERE access_tokens.token_hash = $1
              AND users.status = 'active'
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup access token")?;

        Ok(row.map(|row| Principal {
            user_id: row.get("id"),
            service: row.get("service"),
        }))
    }
}

#[derive(Default)]
struct MemoryAccounts {
    passwords: HashMap<Uuid, String>,
    deactivated: HashMap<Uuid, bool>,
    tokens: HashMap<Vec<u8>, Principal>,
}

/// Ephemeral store for tests and local development. Passwords are kept in
/// plain text; never use outside a dev process.
#[derive(Default)]
pub struct MemoryAccountStore {
    inner: Mutex<MemoryAccounts>,
}

impl MemoryAccountStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, user_id: Uuid, password: &str) {
        let mut inner = self.inner.lock().await;
        inner.passwords.insert(user_id, password.to_string());
        inner.deactivated.insert(user_id, false);
    }

    pub async fn add_token(&self, token_hash: Vec<u8>, user_id: Uuid, service: bool) {
        let mut inner = self.inner.lock().await;
        inner.tokens.insert(token_hash, Principal { user_id, service });
    }

    pub async fn current_password(&self, user_id: Uuid) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.passwords.get(&user_id).cloned()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn verify_password(&self, user_id: Uuid, password: &SecretString) -> Result<bool> {
        let inner = self.inner.lock().await;
        if inner.deactivated.get(&user_id).copied().unwrap_or(true) {
            return Ok(false);
        }
        Ok(inner
            .passwords
            .get(&user_id)
            .is_some_and(|stored| stored == password.expose_secret()))
    }

    async fn set_password(&self, user_id: Uuid, new_password: &SecretString) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.deactivated.get(&user_id).copied().unwrap_or(true) {
            return Err(anyhow!("no active user to set password for: {user_id}"));
        }
        inner
            .passwords
            .insert(user_id, new_password.expose_secret().to_string());
        Ok(())
    }

    async fn deactivate(&self, user_id: Uuid) -> Result<DeactivateOutcome> {
        let mut inner = self.inner.lock().await;
        match inner.deactivated.get(&user_id).copied() {
            None => Ok(DeactivateOutcome::NotFound),
            Some(true) => Ok(DeactivateOutcome::AlreadyDeactivated),
            Some(false) => {
                inner.deactivated.insert(user_id, true);
                inner
                    .tokens
                    .retain(|_, principal| principal.user_id != user_id);
                Ok(DeactivateOutcome::Deactivated)
            }
        }
    }

    async fn lookup_access_token(&self, token_hash: &[u8]) -> Result<Option<Principal>> {
        let inner = self.inner.lock().await;
        let Some(principal) = inner.tokens.get(token_hash) else {
            return Ok(None);
        };
        if inner
            .deactivated
            .get(&principal.user_id)
            .copied()
            .unwrap_or(true)
        {
            return Ok(None);
        }
        Ok(Some(principal.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::{AccountStore, DeactivateOutcome, MemoryAccountStore, hash_password, password_matches};
    use anyhow::Result;
    use secrecy::SecretString;
    use uuid::Uuid;

    #[test]
    fn argon2_round_trip() -> Result<()> {
        let password = SecretString::from("CorrectHorseBatteryStaple");
        let hash = hash_password(&password)?;
        assert!(password_matches(&password, &hash));
        assert!(!password_matches(&SecretString::from("wrong"), &hash));
        Ok(())
    }

    #[test]
    fn malformed_hash_never_matches() {
        assert!(!password_matches(
            &SecretString::from("anything"),
            "not-a-phc-string"
        ));
    }

    #[tokio::test]
    async fn deactivation_is_terminal() -> Result<()> {
        let store = MemoryAccountStore::new();
        let user = Uuid::new_v4();
        store.add_user(user, "hunter2").await;
        store.add_token(vec![1, 2, 3], user, false).await;

        assert_eq!(store.deactivate(user).await?, DeactivateOutcome::Deactivated);
        assert_eq!(
            store.deactivate(user).await?,
            DeactivateOutcome::AlreadyDeactivated
        );

        // Terminal: credentials and tokens are both rejected afterwards.
        let password = SecretString::from("hunter2");
        assert!(!store.verify_password(user, &password).await?);
        assert!(store.lookup_access_token(&[1, 2, 3]).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() -> Result<()> {
        let store = MemoryAccountStore::new();
        assert_eq!(
            store.deactivate(Uuid::new_v4()).await?,
            DeactivateOutcome::NotFound
        );
        Ok(())
    }
}
