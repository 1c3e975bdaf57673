//! Multi-device session registry backed by `auth_sessions`.
//!
//! One row per refresh token. The table carries a partial unique index on
//! `refresh_token_hash WHERE is_active`, and `create_or_touch` upserts
//! against it, so concurrent registrations of the same token converge to a
//! single row. `is_active = false` is terminal: no statement in this module
//! updates an inactive row, and a hash or id collision with a revoked row
//! produces a fresh row instead of resurrecting the old one.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::device::DeviceInfo;
use super::utils::is_unique_violation;

pub const DEFAULT_SESSION_RETENTION_DAYS: i64 = 30;

/// One device session as stored, plus the `current` annotation computed at
/// list time.
#[derive(Debug, Clone)]
pub struct SessionRow {
    pub session_id: Uuid,
    pub subject_id: Uuid,
    pub username: String,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub device_class: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub current: bool,
}

/// Deterministic session id for a `(subject, refresh token)` pair, so that
/// re-registering the same token updates rather than duplicates a session.
#[must_use]
pub fn derive_session_id(subject_id: Uuid, refresh_token_hash: &[u8]) -> Uuid {
    let mut name = Vec::with_capacity(16 + refresh_token_hash.len());
    name.extend_from_slice(subject_id.as_bytes());
    name.extend_from_slice(refresh_token_hash);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, &name)
}

#[derive(Clone)]
pub struct SessionRegistry {
    pool: PgPool,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register a session for a refresh token, or bump `last_activity_at`
    /// if an active row for that token already exists.
    ///
    /// The upsert targets the partial unique index on active hashes, so
    /// concurrent calls for the same token converge to one row. A primary
    /// key violation means the deterministic id collides with an inactive
    /// row from a rotated-away token; that row stays untouched and the
    /// insert is retried once with a random id.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails, including when the active row
    /// holding this hash belongs to a different subject. A foreign row is
    /// never touched or returned.
    pub async fn create_or_touch(
        &self,
        subject_id: Uuid,
        username: &str,
        refresh_token_hash: &[u8],
        device: &DeviceInfo,
        ip_address: &str,
    ) -> Result<Uuid> {
        let session_id = derive_session_id(subject_id, refresh_token_hash);
        match self
            .upsert(session_id, subject_id, username, refresh_token_hash, device, ip_address)
            .await
        {
            Ok(id) => Ok(id),
            Err(err) if is_unique_violation(&err) => {
                let fallback_id = Uuid::new_v4();
                self.upsert(
                    fallback_id,
                    subject_id,
                    username,
                    refresh_token_hash,
                    device,
                    ip_address,
                )
                .await
                .context("failed to register session after id collision")
            }
            Err(err) => Err(err).context("failed to register session"),
        }
    }

    async fn upsert(
        &self,
        session_id: Uuid,
        subject_id: Uuid,
        username: &str,
        refresh_token_hash: &[u8],
        device: &DeviceInfo,
        ip_address: &str,
    ) -> Result<Uuid, sqlx::Error> {
        let query = r"
            INSERT INTO auth_sessions
                (id, subject_id, username, refresh_token_hash,
                 user_agent, browser, os, device_class, ip_address,
                 is_active, created_at, last_activity_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, TRUE, NOW(), NOW())
            ON CONFLICT (refresh_token_hash) WHERE is_active DO UPDATE
            SET last_activity_at = NOW(),
                ip_address = EXCLUDED.ip_address,
                user_agent = EXCLUDED.user_agent,
                browser = EXCLUDED.browser,
                os = EXCLUDED.os,
                device_class = EXCLUDED.device_class
            WHERE auth_sessions.subject_id = EXCLUDED.subject_id
            RETURNING id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(session_id)
            .bind(subject_id)
            .bind(username)
            .bind(refresh_token_hash)
            .bind((!device.user_agent_raw.is_empty()).then_some(device.user_agent_raw.as_str()))
            .bind(device.browser.as_deref())
            .bind(device.os.as_deref())
            .bind(device.device_class.as_deref())
            .bind(ip_address)
            .fetch_one(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.get("id"))
    }

    /// All active sessions for a subject, most recent activity first. The
    /// row matching `current_hash` is annotated as the current session.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_active(
        &self,
        subject_id: Uuid,
        current_hash: Option<&[u8]>,
    ) -> Result<Vec<SessionRow>> {
        let query = r"
            SELECT id, subject_id, username, refresh_token_hash,
                   user_agent, browser, os, device_class, ip_address,
                   created_at, last_activity_at
            FROM auth_sessions
            WHERE subject_id = $1 AND is_active
            ORDER BY last_activity_at DESC
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(subject_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list sessions")?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let hash: Vec<u8> = row.get("refresh_token_hash");
                SessionRow {
                    session_id: row.get("id"),
                    subject_id: row.get("subject_id"),
                    username: row.get("username"),
                    browser: row.get("browser"),
                    os: row.get("os"),
                    device_class: row.get("device_class"),
                    user_agent: row.get("user_agent"),
                    ip_address: row.get("ip_address"),
                    created_at: row.get("created_at"),
                    last_activity_at: row.get("last_activity_at"),
                    current: current_hash.is_some_and(|current| current == hash.as_slice()),
                }
            })
            .collect())
    }

    /// Session state for a refresh token: `None` when the token was never
    /// registered (refresh proceeds; tracking is an enhancement),
    /// `Some(false)` when every row holding the hash is inactive (the one
    /// case that blocks an otherwise-valid refresh).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn session_state(&self, refresh_token_hash: &[u8]) -> Result<Option<bool>> {
        let query = r"
            SELECT bool_or(is_active) AS active
            FROM auth_sessions
            WHERE refresh_token_hash = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(refresh_token_hash)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to check session state")?;
        Ok(row.get("active"))
    }

    /// Deactivate one session, but only if the subject owns it. Returns
    /// `false` for not-found and not-owned alike.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn revoke_one(&self, session_id: Uuid, subject_id: Uuid) -> Result<bool> {
        let query = r"
            UPDATE auth_sessions
            SET is_active = FALSE
            WHERE id = $1 AND subject_id = $2 AND is_active
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(session_id)
            .bind(subject_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to revoke session")?;
        Ok(result.rows_affected() > 0)
    }

    /// Deactivate every active session for the subject except the one
    /// holding `except_hash` (pass `None` to deactivate all). Returns the
    /// number of sessions affected.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn revoke_all_except(
        &self,
        subject_id: Uuid,
        except_hash: Option<&[u8]>,
    ) -> Result<u64> {
        let query = r"
            UPDATE auth_sessions
            SET is_active = FALSE
            WHERE subject_id = $1 AND is_active
              AND ($2::bytea IS NULL OR refresh_token_hash <> $2)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(subject_id)
            .bind(except_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to revoke sessions")?;
        Ok(result.rows_affected())
    }

    /// Deactivate the session holding this refresh token, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn deactivate_by_hash(&self, refresh_token_hash: &[u8]) -> Result<bool> {
        let query = r"
            UPDATE auth_sessions
            SET is_active = FALSE
            WHERE refresh_token_hash = $1 AND is_active
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(refresh_token_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to deactivate session")?;
        Ok(result.rows_affected() > 0)
    }

    /// Logout fallback when the refresh token itself is unavailable:
    /// deactivate active sessions matching the caller's IP and User-Agent.
    /// Heuristic by nature — shared NATs and identical browsers can match
    /// more than one session, or none. Callers treat this as best effort.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn deactivate_matching_device(
        &self,
        subject_id: Uuid,
        ip_address: &str,
        user_agent: Option<&str>,
    ) -> Result<u64> {
        let query = r"
            UPDATE auth_sessions
            SET is_active = FALSE
            WHERE subject_id = $1 AND is_active
              AND ip_address = $2
              AND user_agent IS NOT DISTINCT FROM $3
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(subject_id)
            .bind(ip_address)
            .bind(user_agent)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to deactivate matching sessions")?;
        Ok(result.rows_affected())
    }

    /// Hard-delete inactive sessions idle past the retention window.
    /// Active sessions are never deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn garbage_collect(&self, retention_days: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let query = r"
            DELETE FROM auth_sessions
            WHERE NOT is_active AND last_activity_at < $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(cutoff)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to garbage collect sessions")?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_is_deterministic_per_subject_and_hash() {
        let subject = Uuid::new_v4();
        let hash = crate::api::handlers::auth::utils::hash_token("refresh-token");

        assert_eq!(derive_session_id(subject, &hash), derive_session_id(subject, &hash));
        assert_ne!(
            derive_session_id(subject, &hash),
            derive_session_id(Uuid::new_v4(), &hash)
        );
        assert_ne!(
            derive_session_id(subject, &hash),
            derive_session_id(subject, b"other-hash")
        );
    }

    #[test]
    fn session_id_is_a_name_based_uuid() {
        let id = derive_session_id(Uuid::new_v4(), b"hash");
        assert_eq!(id.get_version_num(), 5);
    }
}
