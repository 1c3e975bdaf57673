//! Account lockout policy: consecutive-failure counting with escalation.
//!
//! Escalation is explicit and configurable:
//!
//! - `threshold` consecutive failures (default 5) arm a timed lock of
//!   `lock_duration_seconds` (default 15 minutes). Failures past the
//!   threshold re-arm the timed lock.
//! - `2 × threshold` failures mean the abuse continued after a timed lock
//!   ran out: the lock becomes indefinite, `locked_until` is cleared, and an
//!   unlock token is generated, stored hashed, and mailed to the subject.
//!
//! A successful login or a successful unlock resets the counter to zero.
//! The policy touches the outside world only through the `UserDirectory`
//! and `UnlockMailer` collaborator traits.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use super::directory::{UnlockMailer, UserDirectory, UserRecord};
use super::error::AuthError;
use super::utils::{generate_unlock_token, hash_token, unlock_token_matches};

pub const DEFAULT_LOCKOUT_THRESHOLD: i32 = 5;
pub const DEFAULT_LOCK_DURATION_SECONDS: i64 = 15 * 60;
pub const DEFAULT_UNLOCK_TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;

/// Outcome of recording one failed login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutDecision {
    NotLocked { remaining_attempts: i32 },
    LockedTimed { locked_until: DateTime<Utc> },
    LockedPendingUnlock,
}

#[derive(Debug, Clone)]
pub struct LockoutPolicy {
    threshold: i32,
    lock_duration_seconds: i64,
    unlock_token_ttl_seconds: i64,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_LOCKOUT_THRESHOLD,
            lock_duration_seconds: DEFAULT_LOCK_DURATION_SECONDS,
            unlock_token_ttl_seconds: DEFAULT_UNLOCK_TOKEN_TTL_SECONDS,
        }
    }
}

impl LockoutPolicy {
    #[must_use]
    pub fn new(threshold: i32, lock_duration_seconds: i64, unlock_token_ttl_seconds: i64) -> Self {
        Self {
            threshold,
            lock_duration_seconds,
            unlock_token_ttl_seconds,
        }
    }

    /// Gate a login attempt against the current lockout state.
    ///
    /// A timed lock whose `locked_until` has passed no longer blocks; the
    /// failure counter is left alone so continued abuse escalates.
    ///
    /// # Errors
    ///
    /// `LockedTimed` with the remaining wait, or `LockedPendingUnlock` when
    /// only the emailed token can unlock.
    pub fn check(&self, record: &UserRecord, now: DateTime<Utc>) -> Result<(), AuthError> {
        if !record.lockout.is_locked {
            return Ok(());
        }
        match record.lockout.locked_until {
            Some(locked_until) if locked_until > now => Err(AuthError::LockedTimed {
                remaining_seconds: (locked_until - now).num_seconds(),
                locked_until,
            }),
            Some(_) => Ok(()),
            None => Err(AuthError::LockedPendingUnlock),
        }
    }

    /// Record one failed login and decide whether (and how) to lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the user store write fails; the caller treats
    /// that as a critical-path store failure.
    pub async fn record_failure(
        &self,
        directory: &dyn UserDirectory,
        mailer: &dyn UnlockMailer,
        record: &UserRecord,
        now: DateTime<Utc>,
    ) -> Result<LockoutDecision> {
        let mut state = record.lockout.clone();
        state.failed_login_attempts += 1;
        state.last_failed_login_at = Some(now);
        let attempts = state.failed_login_attempts;

        let decision = if attempts >= self.threshold * 2 {
            // Sustained abuse: the timed lock already ran out once and the
            // failures kept coming. Only the emailed token unlocks now.
            state.is_locked = true;
            state.locked_until = None;

            let unlock_token = generate_unlock_token()?;
            state.unlock_token_hash = Some(hash_token(&unlock_token));
            state.unlock_token_expires_at =
                Some(now + Duration::seconds(self.unlock_token_ttl_seconds));

            match &record.email {
                Some(email) => {
                    if let Err(err) = mailer.send_unlock_email(email, &unlock_token).await {
                        // Fire-and-forget: delivery is the dispatcher's concern.
                        warn!("Failed to dispatch unlock email: {err:#}");
                    }
                }
                None => warn!(
                    "Account {} locked pending unlock but has no email on file",
                    record.username
                ),
            }

            LockoutDecision::LockedPendingUnlock
        } else if attempts >= self.threshold {
            let locked_until = now + Duration::seconds(self.lock_duration_seconds);
            state.is_locked = true;
            state.locked_until = Some(locked_until);
            LockoutDecision::LockedTimed { locked_until }
        } else {
            LockoutDecision::NotLocked {
                remaining_attempts: self.threshold - attempts,
            }
        };

        directory
            .update_lockout_state(record.subject_id, &state)
            .await?;
        Ok(decision)
    }

    /// Check an unlock-token candidate: constant-time hash comparison plus
    /// expiry.
    #[must_use]
    pub fn verify_unlock_token(
        &self,
        record: &UserRecord,
        token: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(stored_hash) = record.lockout.unlock_token_hash.as_deref() else {
            return false;
        };
        let Some(expires_at) = record.lockout.unlock_token_expires_at else {
            return false;
        };
        if expires_at <= now {
            return false;
        }
        unlock_token_matches(token, stored_hash)
    }

    /// Clear the lockout entirely.
    ///
    /// # Errors
    ///
    /// Returns an error if the user store write fails.
    pub async fn unlock(
        &self,
        directory: &dyn UserDirectory,
        record: &UserRecord,
        reason: &str,
    ) -> Result<()> {
        let mut state = record.lockout.clone();
        state.is_locked = false;
        state.failed_login_attempts = 0;
        state.locked_until = None;
        state.unlock_token_hash = None;
        state.unlock_token_expires_at = None;

        directory
            .update_lockout_state(record.subject_id, &state)
            .await?;
        info!("Account {} unlocked: {reason}", record.username);
        Ok(())
    }

    /// Reset the failure counter after a successful login.
    ///
    /// # Errors
    ///
    /// Returns an error if the user store write fails.
    pub async fn record_success(
        &self,
        directory: &dyn UserDirectory,
        record: &UserRecord,
    ) -> Result<()> {
        // Skip the write when there is nothing to reset.
        if record.lockout.failed_login_attempts == 0 && !record.lockout.is_locked {
            return Ok(());
        }

        let mut state = record.lockout.clone();
        state.is_locked = false;
        state.failed_login_attempts = 0;
        state.locked_until = None;

        directory
            .update_lockout_state(record.subject_id, &state)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::directory::LockoutState;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// In-memory stand-in for the external user store.
    struct MemoryDirectory {
        records: Mutex<HashMap<Uuid, UserRecord>>,
    }

    impl MemoryDirectory {
        fn with_user(record: UserRecord) -> Self {
            let mut records = HashMap::new();
            records.insert(record.subject_id, record);
            Self {
                records: Mutex::new(records),
            }
        }

        fn get(&self, subject_id: Uuid) -> UserRecord {
            self.records
                .lock()
                .expect("lock")
                .get(&subject_id)
                .cloned()
                .expect("record")
        }
    }

    #[async_trait]
    impl UserDirectory for MemoryDirectory {
        async fn find_by_identifier(&self, identifier: &str) -> anyhow::Result<Option<UserRecord>> {
            Ok(self
                .records
                .lock()
                .expect("lock")
                .values()
                .find(|record| record.username == identifier)
                .cloned())
        }

        async fn verify_credentials(
            &self,
            _identifier: &str,
            _password: &str,
        ) -> anyhow::Result<Option<UserRecord>> {
            Ok(None)
        }

        async fn update_lockout_state(
            &self,
            subject_id: Uuid,
            state: &LockoutState,
        ) -> anyhow::Result<()> {
            let mut records = self.records.lock().expect("lock");
            if let Some(record) = records.get_mut(&subject_id) {
                record.lockout = state.clone();
            }
            Ok(())
        }
    }

    /// Captures outbound unlock tokens instead of sending mail.
    struct RecordingMailer {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingMailer {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
            }
        }

        fn last_token(&self) -> Option<String> {
            self.sent
                .lock()
                .expect("lock")
                .last()
                .map(|(_, token)| token.clone())
        }
    }

    #[async_trait]
    impl UnlockMailer for RecordingMailer {
        async fn send_unlock_email(&self, email: &str, unlock_token: &str) -> anyhow::Result<()> {
            self.sent
                .lock()
                .expect("lock")
                .push((email.to_string(), unlock_token.to_string()));
            Ok(())
        }
    }

    fn user() -> UserRecord {
        UserRecord {
            subject_id: Uuid::new_v4(),
            username: "alice".to_string(),
            email: Some("alice@example.com".to_string()),
            lockout: LockoutState::default(),
        }
    }

    fn policy() -> LockoutPolicy {
        LockoutPolicy::new(3, 60, 3600)
    }

    #[tokio::test]
    async fn locks_at_exactly_the_threshold() {
        let record = user();
        let subject_id = record.subject_id;
        let directory = MemoryDirectory::with_user(record);
        let mailer = RecordingMailer::new();
        let policy = policy();
        let now = Utc::now();

        for expected_remaining in [2, 1] {
            let record = directory.get(subject_id);
            let decision = policy
                .record_failure(&directory, &mailer, &record, now)
                .await
                .expect("decision");
            assert_eq!(
                decision,
                LockoutDecision::NotLocked {
                    remaining_attempts: expected_remaining
                }
            );
        }

        let record = directory.get(subject_id);
        let decision = policy
            .record_failure(&directory, &mailer, &record, now)
            .await
            .expect("decision");
        assert!(matches!(decision, LockoutDecision::LockedTimed { .. }));

        let record = directory.get(subject_id);
        assert!(record.lockout.is_locked);
        assert!(record.lockout.locked_until.is_some());
        assert!(policy.check(&record, now).is_err());
    }

    #[tokio::test]
    async fn success_before_threshold_resets_counter() {
        let record = user();
        let subject_id = record.subject_id;
        let directory = MemoryDirectory::with_user(record);
        let mailer = RecordingMailer::new();
        let policy = policy();
        let now = Utc::now();

        for _ in 0..2 {
            let record = directory.get(subject_id);
            policy
                .record_failure(&directory, &mailer, &record, now)
                .await
                .expect("decision");
        }

        let record = directory.get(subject_id);
        assert_eq!(record.lockout.failed_login_attempts, 2);
        policy
            .record_success(&directory, &record)
            .await
            .expect("reset");

        let record = directory.get(subject_id);
        assert_eq!(record.lockout.failed_login_attempts, 0);
        assert!(!record.lockout.is_locked);
        assert!(policy.check(&record, now).is_ok());
    }

    #[tokio::test]
    async fn timed_lock_blocks_with_remaining_wait_then_expires() {
        let mut record = user();
        record.lockout.is_locked = true;
        record.lockout.failed_login_attempts = 3;
        let now = Utc::now();
        record.lockout.locked_until = Some(now + Duration::seconds(60));

        let policy = policy();
        match policy.check(&record, now) {
            Err(AuthError::LockedTimed {
                remaining_seconds, ..
            }) => assert_eq!(remaining_seconds, 60),
            other => panic!("expected timed lock, got {other:?}"),
        }

        // Past locked_until the gate opens again.
        assert!(policy.check(&record, now + Duration::seconds(61)).is_ok());
    }

    #[tokio::test]
    async fn sustained_abuse_escalates_to_unlock_token() {
        let record = user();
        let subject_id = record.subject_id;
        let directory = MemoryDirectory::with_user(record);
        let mailer = RecordingMailer::new();
        let policy = policy();
        let now = Utc::now();

        for _ in 0..6 {
            let record = directory.get(subject_id);
            policy
                .record_failure(&directory, &mailer, &record, now)
                .await
                .expect("decision");
        }

        let record = directory.get(subject_id);
        assert!(record.lockout.is_locked);
        // No locked_until: only the emailed token unlocks.
        assert_eq!(record.lockout.locked_until, None);
        assert!(record.lockout.unlock_token_hash.is_some());
        assert!(matches!(
            policy.check(&record, now),
            Err(AuthError::LockedPendingUnlock)
        ));

        let token = mailer.last_token().expect("unlock token mailed");
        assert!(policy.verify_unlock_token(&record, &token, now));
        assert!(!policy.verify_unlock_token(&record, "wrong-token", now));
        // Expired tokens never match.
        assert!(!policy.verify_unlock_token(
            &record,
            &token,
            now + Duration::seconds(3601)
        ));
    }

    #[tokio::test]
    async fn unlock_clears_all_lockout_fields() {
        let record = user();
        let subject_id = record.subject_id;
        let directory = MemoryDirectory::with_user(record);
        let mailer = RecordingMailer::new();
        let policy = policy();
        let now = Utc::now();

        for _ in 0..6 {
            let record = directory.get(subject_id);
            policy
                .record_failure(&directory, &mailer, &record, now)
                .await
                .expect("decision");
        }

        let record = directory.get(subject_id);
        policy
            .unlock(&directory, &record, "unlock token verified")
            .await
            .expect("unlock");

        let record = directory.get(subject_id);
        assert!(!record.lockout.is_locked);
        assert_eq!(record.lockout.failed_login_attempts, 0);
        assert_eq!(record.lockout.locked_until, None);
        assert_eq!(record.lockout.unlock_token_hash, None);
        assert_eq!(record.lockout.unlock_token_expires_at, None);
        assert!(policy.check(&record, now).is_ok());
    }
}
