//! Collaborator interfaces: the user record store and the unlock mailer.
//!
//! The auth core does not own user profiles. It reaches the user store only
//! through [`UserDirectory`] and owns no field beyond [`LockoutState`]. Email
//! delivery is likewise behind [`UnlockMailer`]; delivery failures are the
//! dispatcher's concern, not ours.

use anyhow::{Context, Result};
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{info, Instrument};
use uuid::Uuid;

/// Lockout bookkeeping embedded in the subject record.
///
/// `locked_until` present means a time-based auto-unlock; `is_locked` with no
/// `locked_until` means unlock requires the emailed token flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockoutState {
    pub is_locked: bool,
    pub failed_login_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub unlock_token_hash: Option<Vec<u8>>,
    pub unlock_token_expires_at: Option<DateTime<Utc>>,
    pub last_failed_login_at: Option<DateTime<Utc>>,
}

/// The slice of a user record the auth core is allowed to see.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub subject_id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub lockout: LockoutState,
}

/// Read/write access to the external user record store.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Look up a user by username or email.
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<UserRecord>>;

    /// Check credentials; `Ok(Some)` only on a full match.
    async fn verify_credentials(&self, identifier: &str, password: &str)
        -> Result<Option<UserRecord>>;

    /// Persist the lockout slice of the subject record.
    async fn update_lockout_state(&self, subject_id: Uuid, state: &LockoutState) -> Result<()>;
}

/// Outbound unlock-email dispatch, fire-and-forget from the core's view.
#[async_trait]
pub trait UnlockMailer: Send + Sync {
    async fn send_unlock_email(&self, email: &str, unlock_token: &str) -> Result<()>;
}

/// Default mailer: logs instead of delivering. Deployments plug in a real
/// dispatcher behind the same trait.
#[derive(Clone, Debug)]
pub struct LogUnlockMailer;

#[async_trait]
impl UnlockMailer for LogUnlockMailer {
    async fn send_unlock_email(&self, email: &str, unlock_token: &str) -> Result<()> {
        info!("Unlock email for {email}: token {unlock_token}");
        Ok(())
    }
}

/// Postgres-backed directory over the collaborator `users` table.
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, identifier: &str) -> Result<Option<(UserRecord, String)>> {
        let query = r"
            SELECT id, username, email, password_hash,
                   is_locked, failed_login_attempts, locked_until,
                   unlock_token_hash, unlock_token_expires_at, last_failed_login_at
            FROM users
            WHERE username = $1 OR email = $1
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(identifier)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user")?;

        Ok(row.map(|row| {
            let record = UserRecord {
                subject_id: row.get("id"),
                username: row.get("username"),
                email: row.get("email"),
                lockout: LockoutState {
                    is_locked: row.get("is_locked"),
                    failed_login_attempts: row.get("failed_login_attempts"),
                    locked_until: row.get("locked_until"),
                    unlock_token_hash: row.get("unlock_token_hash"),
                    unlock_token_expires_at: row.get("unlock_token_expires_at"),
                    last_failed_login_at: row.get("last_failed_login_at"),
                },
            };
            (record, row.get("password_hash"))
        }))
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<UserRecord>> {
        Ok(self.fetch(identifier).await?.map(|(record, _)| record))
    }

    async fn verify_credentials(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<Option<UserRecord>> {
        let Some((record, password_hash)) = self.fetch(identifier).await? else {
            return Ok(None);
        };

        let parsed = match PasswordHash::new(&password_hash) {
            Ok(parsed) => parsed,
            Err(_) => return Ok(None),
        };
        if Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_err()
        {
            return Ok(None);
        }

        Ok(Some(record))
    }

    async fn update_lockout_state(&self, subject_id: Uuid, state: &LockoutState) -> Result<()> {
        let query = r"
            UPDATE users
            SET is_locked = $2,
                failed_login_attempts = $3,
                locked_until = $4,
                unlock_token_hash = $5,
                unlock_token_expires_at = $6,
                last_failed_login_at = $7
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(subject_id)
            .bind(state.is_locked)
            .bind(state.failed_login_attempts)
            .bind(state.locked_until)
            .bind(state.unlock_token_hash.as_deref())
            .bind(state.unlock_token_expires_at)
            .bind(state.last_failed_login_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update lockout state")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lockout_state_default_is_unlocked() {
        let state = LockoutState::default();
        assert!(!state.is_locked);
        assert_eq!(state.failed_login_attempts, 0);
        assert_eq!(state.locked_until, None);
        assert_eq!(state.unlock_token_hash, None);
    }

    #[tokio::test]
    async fn log_unlock_mailer_accepts_dispatch() {
        let mailer = LogUnlockMailer;
        let result = mailer
            .send_unlock_email("alice@example.com", "token")
            .await;
        assert!(result.is_ok());
    }
}
