//! Shared state for the auth handlers.

use std::sync::Arc;

use secrecy::SecretString;
use sqlx::PgPool;

use super::directory::{PgUserDirectory, UnlockMailer, UserDirectory};
use super::lockout::LockoutPolicy;
use super::registry::{SessionRegistry, DEFAULT_SESSION_RETENTION_DAYS};
use super::revocation::RevocationStore;
use super::token::TokenCodec;

pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 15 * 60;

/// Static configuration for the auth core: issuer identity, signing
/// secrets, and cookie scope.
#[derive(Clone)]
pub struct AuthConfig {
    base_url: String,
    access_secret: SecretString,
    refresh_secret: SecretString,
    cookie_domain: Option<String>,
    session_retention_days: i64,
    sweep_interval_seconds: u64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(base_url: String, access_secret: SecretString, refresh_secret: SecretString) -> Self {
        Self {
            base_url,
            access_secret,
            refresh_secret,
            cookie_domain: None,
            session_retention_days: DEFAULT_SESSION_RETENTION_DAYS,
            sweep_interval_seconds: DEFAULT_SWEEP_INTERVAL_SECONDS,
        }
    }

    /// Scope cookies to a parent domain so sibling origins can share them.
    #[must_use]
    pub fn with_cookie_domain(mut self, domain: String) -> Self {
        self.cookie_domain = Some(domain);
        self
    }

    #[must_use]
    pub fn with_session_retention_days(mut self, days: i64) -> Self {
        self.session_retention_days = days;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn cookie_domain(&self) -> Option<&str> {
        self.cookie_domain.as_deref()
    }

    /// `Secure` cookies whenever the service itself is served over TLS.
    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.base_url.starts_with("https://")
    }

    #[must_use]
    pub fn session_retention_days(&self) -> i64 {
        self.session_retention_days
    }

    #[must_use]
    pub fn sweep_interval_seconds(&self) -> u64 {
        self.sweep_interval_seconds
    }

    /// Both tokens carry the service base URL as issuer and audience.
    #[must_use]
    pub fn token_codec(&self) -> TokenCodec {
        TokenCodec::new(
            self.base_url.clone(),
            self.base_url.clone(),
            self.access_secret.clone(),
            self.refresh_secret.clone(),
        )
    }
}

/// Everything a request handler needs, cloned per request by axum.
#[derive(Clone)]
pub struct AuthState {
    pub config: AuthConfig,
    pub codec: TokenCodec,
    pub revocation: RevocationStore,
    pub registry: SessionRegistry,
    pub directory: Arc<dyn UserDirectory>,
    pub mailer: Arc<dyn UnlockMailer>,
    pub lockout: LockoutPolicy,
}

impl AuthState {
    /// Wire the default Postgres-backed stack.
    #[must_use]
    pub fn new(
        pool: PgPool,
        config: AuthConfig,
        mailer: Arc<dyn UnlockMailer>,
    ) -> Self {
        let codec = config.token_codec();
        Self {
            config,
            codec,
            revocation: RevocationStore::new(pool.clone()),
            registry: SessionRegistry::new(pool.clone()),
            directory: Arc::new(PgUserDirectory::new(pool)),
            mailer,
            lockout: LockoutPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> AuthConfig {
        AuthConfig::new(
            base_url.to_string(),
            SecretString::from("access".to_string()),
            SecretString::from("refresh".to_string()),
        )
    }

    #[test]
    fn cookie_secure_follows_scheme() {
        assert!(config("https://auth.example.com").cookie_secure());
        assert!(!config("http://localhost:8080").cookie_secure());
    }

    #[test]
    fn cookie_domain_defaults_to_none() {
        let base = config("https://auth.example.com");
        assert_eq!(base.cookie_domain(), None);

        let scoped = config("https://auth.example.com").with_cookie_domain("example.com".into());
        assert_eq!(scoped.cookie_domain(), Some("example.com"));
    }

    #[test]
    fn retention_defaults_to_thirty_days() {
        assert_eq!(config("http://localhost").session_retention_days(), 30);
    }
}
