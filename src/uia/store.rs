//! UIA session storage contract and adapters.
//!
//! Session state is external mutable state scoped by session token: the
//! engine loads and saves it once per evaluation and never caches between
//! requests. Expiry policy belongs to the store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::Instrument;

use super::models::UiaSession;

const DEFAULT_SESSION_TTL_SECONDS: i64 = 30 * 60;

/// Storage contract for in-progress authentication sessions.
#[async_trait]
pub trait UiaSessionStore: Send + Sync {
    /// Load a live session; expired or unknown ids return `None`.
    async fn load(&self, session_id: &str) -> Result<Option<UiaSession>>;

    /// Persist the session, refreshing its inactivity window.
    async fn save(&self, session: &UiaSession) -> Result<()>;
}

/// In-process store for tests and single-node development setups.
pub struct MemoryUiaSessionStore {
    ttl: Duration,
    sessions: Mutex<HashMap<String, UiaSession>>,
}

impl MemoryUiaSessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl_seconds(DEFAULT_SESSION_TTL_SECONDS)
    }

    #[must_use]
    pub fn with_ttl_seconds(seconds: i64) -> Self {
        Self {
            ttl: Duration::seconds(seconds),
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryUiaSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UiaSessionStore for MemoryUiaSessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<UiaSession>> {
        let sessions = self.sessions.lock().await;
        Ok(sessions
            .get(session_id)
            .filter(|session| Utc::now() - session.created_at < self.ttl)
            .cloned())
    }

    async fn save(&self, session: &UiaSession) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let ttl = self.ttl;
        sessions.retain(|_, entry| Utc::now() - entry.created_at < ttl);
        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }
}

/// Postgres-backed store; session state is one jsonb column so the engine
/// round-trips it as an opaque document.
#[derive(Clone)]
pub struct PgUiaSessionStore {
    pool: PgPool,
    ttl_seconds: i64,
}

impl PgUiaSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_ttl_seconds(mut self, seconds: i64) -> Self {
        self.ttl_seconds = seconds;
        self
    }
}

#[async_trait]
impl UiaSessionStore for PgUiaSessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<UiaSession>> {
        let query = r"
            SELECT state
            FROM uia_sessions
            WHERE session_id = $1
              AND expires_at > NOW()
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to load uia session")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let state: serde_json::Value = row.get("state");
        let session =
            serde_json::from_value(state).context("invalid uia session state in database")?;
        Ok(Some(session))
    }

    async fn save(&self, session: &UiaSession) -> Result<()> {
        let state = serde_json::to_value(session).context("failed to serialize uia session")?;
        // Saving refreshes the inactivity window.
        let query = r"
            INSERT INTO uia_sessions (session_id, state, expires_at)
            VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
            ON CONFLICT (session_id)
            DO UPDATE SET state = EXCLUDED.state,
                          expires_at = EXCLUDED.expires_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(&session.id)
            .bind(state)
            .bind(self.ttl_seconds)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to save uia session")?;
        Ok(())
    }
}
