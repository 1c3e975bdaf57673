//! Token revocation: per-token blacklist plus subject tombstones.
//!
//! Tokens are stored by SHA-256 hash, never raw. A per-token record outlives
//! its usefulness once the token itself expires, so rows carry the token's
//! natural expiry and the sweeper prunes them afterwards.
//!
//! Revoking "all sessions" from one device cannot enumerate tokens held by
//! other devices, so it writes a subject tombstone instead: any token whose
//! `iat` predates `revoked_before` counts as revoked. Every verification path
//! checks both.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::token::{TokenClass, REFRESH_TTL_SECONDS};

#[derive(Clone)]
pub struct RevocationStore {
    pool: PgPool,
}

impl RevocationStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Blacklist one token by hash. Idempotent: revoking the same token
    /// twice leaves a single record.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn revoke(
        &self,
        token_hash: &[u8],
        subject_id: Uuid,
        username: &str,
        token_class: TokenClass,
        natural_expiry: DateTime<Utc>,
        reason: &str,
    ) -> Result<()> {
        let query = r"
            INSERT INTO revoked_tokens
                (token_hash, subject_id, username, token_class, reason, natural_expiry)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (token_hash) DO NOTHING
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token_hash)
            .bind(subject_id)
            .bind(username)
            .bind(token_class.as_str())
            .bind(reason)
            .bind(natural_expiry)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert revocation record")?;
        Ok(())
    }

    /// Check both revocation mechanisms in one round trip: the per-token
    /// hash record (still within its natural expiry) and the subject
    /// tombstone (token issued before `revoked_before`).
    ///
    /// Signature validity alone never suffices; callers run this on every
    /// access and refresh verification.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails; the caller decides whether to
    /// fail open or closed.
    pub async fn is_revoked(
        &self,
        token_hash: &[u8],
        subject_id: Uuid,
        issued_at: DateTime<Utc>,
    ) -> Result<bool> {
        let query = r"
            SELECT EXISTS (
                SELECT 1 FROM revoked_tokens
                WHERE token_hash = $1 AND natural_expiry > NOW()
            ) OR EXISTS (
                SELECT 1 FROM subject_tombstones
                WHERE subject_id = $2 AND revoked_before > $3
            ) AS revoked
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(token_hash)
            .bind(subject_id)
            .bind(issued_at)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to check revocation state")?;
        Ok(row.get("revoked"))
    }

    /// Tombstone the subject: every token issued before now is revoked,
    /// including tokens this instance has never seen.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub async fn revoke_all_for_subject(
        &self,
        subject_id: Uuid,
        username: &str,
        reason: &str,
    ) -> Result<()> {
        let query = r"
            INSERT INTO subject_tombstones (subject_id, username, reason, revoked_before)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (subject_id) DO UPDATE
            SET revoked_before = EXCLUDED.revoked_before,
                username = EXCLUDED.username,
                reason = EXCLUDED.reason
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(subject_id)
            .bind(username)
            .bind(reason)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to upsert subject tombstone")?;
        Ok(())
    }

    /// Drop records that can no longer affect any verification: revocation
    /// rows past the token's own expiry, and tombstones old enough that no
    /// pre-tombstone refresh token can still be alive.
    ///
    /// Deletes are idempotent; overlapping sweeps are harmless.
    ///
    /// # Errors
    ///
    /// Returns an error if either delete fails.
    pub async fn prune_expired(&self) -> Result<u64> {
        let query = "DELETE FROM revoked_tokens WHERE natural_expiry < NOW()";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let tokens = sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to prune revocation records")?
            .rows_affected();

        let horizon = Utc::now() - Duration::seconds(REFRESH_TTL_SECONDS);
        let query = "DELETE FROM subject_tombstones WHERE revoked_before < $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let tombstones = sqlx::query(query)
            .bind(horizon)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to prune subject tombstones")?
            .rows_affected();

        Ok(tokens + tombstones)
    }
}
