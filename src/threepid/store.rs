//! Threepid storage contract and adapters.
//!
//! The store must provide per-key atomicity: `insert_if_absent` is a single
//! primitive (unique index in Postgres, one map entry in memory), never a
//! read-then-write performed by callers. Concurrent inserts of the same
//! normalized address therefore yield exactly one success.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

use super::models::{Medium, ThreepidAssociation};

/// Outcome of an atomic insert-if-absent.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InsertOutcome {
    Inserted,
    Conflict,
}

/// Outcome of an owner-checked delete.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    NotOwner,
}

/// Storage contract for `(medium, address) -> user` associations.
#[async_trait]
pub trait ThreepidStore: Send + Sync {
    /// Current owner of a normalized address, if any.
    async fn get_owner(&self, medium: Medium, address: &str) -> Result<Option<Uuid>>;

    /// Atomically associate an address with a user unless one already exists.
    async fn insert_if_absent(
        &self,
        medium: Medium,
        address: &str,
        user_id: Uuid,
        validated_at: DateTime<Utc>,
    ) -> Result<InsertOutcome>;

    /// Remove an association only when `expected_owner` currently holds it.
    async fn delete(
        &self,
        medium: Medium,
        address: &str,
        expected_owner: Uuid,
    ) -> Result<DeleteOutcome>;

    /// All associations owned by a user, in insertion order.
    async fn list(&self, user_id: Uuid) -> Result<Vec<ThreepidAssociation>>;
}

/// Postgres-backed store. Uniqueness rides on the `(medium, address)` unique
/// index; a 23505 on insert is reported as `Conflict`, not an error.
#[derive(Clone)]
pub struct PgThreepidStore {
    pool: PgPool,
}

impl PgThreepidStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[async_trait]
impl ThreepidStore for PgThreepidStore {
    async fn get_owner(&self, medium: Medium, address: &str) -> Result<Option<Uuid>> {
        let query = "SELECT user_id FROM threepids WHERE medium = $1 AND address = $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(medium.as_str())
            .bind(address)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup threepid owner")?;
        Ok(row.map(|row| row.get("user_id")))
    }

    async fn insert_if_absent(
        &self,
        medium: Medium,
        address: &str,
        user_id: Uuid,
        validated_at: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        let query = r"
            INSERT INTO threepids (user_id, medium, address, validated_at)
            VALUES ($1, $2, $3, $4)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(medium.as_str())
            .bind(address)
            .bind(validated_at)
            .execute(&self.pool)
            .instrument(span)
            .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert threepid"),
        }
    }

    async fn delete(
        &self,
        medium: Medium,
        address: &str,
        expected_owner: Uuid,
    ) -> Result<DeleteOutcome> {
        // Owner-guarded delete; a miss is classified afterwards.
        let query = r"
            DELETE FROM threepids
            WHERE medium = $1 AND address = $2 AND user_id = $3
            RETURNING user_id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let deleted = sqlx::query(query)
            .bind(medium.as_str())
            .bind(address)
            .bind(expected_owner)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete threepid")?;

        if deleted.is_some() {
            return Ok(DeleteOutcome::Deleted);
        }

        match self.get_owner(medium, address).await? {
            Some(_) => Ok(DeleteOutcome::NotOwner),
            None => Ok(DeleteOutcome::NotFound),
        }
    }

    async fn list(&self, user_id: Uuid) -> Result<Vec<ThreepidAssociation>> {
        let query = r"
            SELECT medium, address, validated_at, added_at
            FROM threepids
            WHERE user_id = $1
            ORDER BY id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list threepids")?;

        rows.into_iter()
            .map(|row| {
                let medium: String = row.get("medium");
                let medium = Medium::from_str(&medium)
                    .with_context(|| format!("invalid threepids.medium value: {medium}"))?;
                Ok(ThreepidAssociation {
                    medium,
                    address: row.get("address"),
                    validated_at: row.get("validated_at"),
                    added_at: row.get("added_at"),
                })
            })
            .collect()
    }
}

struct MemoryEntry {
    user_id: Uuid,
    validated_at: DateTime<Utc>,
    added_at: DateTime<Utc>,
    seq: u64,
}

/// Ephemeral store for tests and local development.
#[derive(Default)]
pub struct MemoryThreepidStore {
    entries: Mutex<BTreeMap<(Medium, String), MemoryEntry>>,
}

impl MemoryThreepidStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThreepidStore for MemoryThreepidStore {
    async fn get_owner(&self, medium: Medium, address: &str) -> Result<Option<Uuid>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(&(medium, address.to_string()))
            .map(|entry| entry.user_id))
    }

    async fn insert_if_absent(
        &self,
        medium: Medium,
        address: &str,
        user_id: Uuid,
        validated_at: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        let mut entries = self.entries.lock().await;
        let key = (medium, address.to_string());
        if entries.contains_key(&key) {
            return Ok(InsertOutcome::Conflict);
        }
        let seq = entries.values().map(|entry| entry.seq + 1).max().unwrap_or(0);
        entries.insert(
            key,
            MemoryEntry {
                user_id,
                validated_at,
                added_at: Utc::now(),
                seq,
            },
        );
        Ok(InsertOutcome::Inserted)
    }

    async fn delete(
        &self,
        medium: Medium,
        address: &str,
        expected_owner: Uuid,
    ) -> Result<DeleteOutcome> {
        let mut entries = self.entries.lock().await;
        let key = (medium, address.to_string());
        match entries.get(&key) {
            None => Ok(DeleteOutcome::NotFound),
            Some(entry) if entry.user_id != expected_owner => Ok(DeleteOutcome::NotOwner),
            Some(_) => {
                entries.remove(&key);
                Ok(DeleteOutcome::Deleted)
            }
        }
    }

    async fn list(&self, user_id: Uuid) -> Result<Vec<ThreepidAssociation>> {
        let entries = self.entries.lock().await;
        let mut owned: Vec<_> = entries
            .iter()
            .filter(|(_, entry)| entry.user_id == user_id)
            .map(|((medium, address), entry)| {
                (
                    entry.seq,
                    ThreepidAssociation {
                        medium: *medium,
                        address: address.clone(),
                        validated_at: entry.validated_at,
                        added_at: entry.added_at,
                    },
                )
            })
            .collect();
        owned.sort_by_key(|(seq, _)| *seq);
        Ok(owned.into_iter().map(|(_, assoc)| assoc).collect())
    }
}
