//! Authenticated-request guard.
//!
//! Every protected endpoint goes through [`authenticate`]: extract the
//! access token (cookie preferred, bearer header fallback), verify it, then
//! check revocation. All failures collapse to 401 on the wire; even a store
//! outage denies with 401 rather than leaking a 5xx from the auth gate.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use super::error::AuthError;
use super::state::AuthState;
use super::token::{now_unix_seconds, Claims};
use super::utils::{extract_access_token, hash_token};

/// The verified caller identity attached to a request.
#[derive(Debug, Clone)]
pub struct Principal {
    pub subject_id: Uuid,
    pub username: String,
    pub email: Option<String>,
    /// Raw access token, kept for revocation on logout.
    pub access_token: String,
    pub issued_at: DateTime<Utc>,
}

impl Principal {
    fn from_claims(claims: &Claims, access_token: String) -> Self {
        Self {
            subject_id: claims.sub,
            username: claims.name.clone(),
            email: claims.email.clone(),
            access_token,
            issued_at: DateTime::from_timestamp(claims.iat, 0).unwrap_or_else(Utc::now),
        }
    }
}

/// Authenticate the request or refuse with 401.
///
/// # Errors
///
/// `MalformedToken` when no token is presented or verification fails,
/// `ExpiredToken` past expiry, `RevokedToken` when the blacklist or a
/// subject tombstone matches. A revocation-store failure also denies with
/// `RevokedToken`; this gate never answers 5xx.
pub async fn authenticate(state: &AuthState, headers: &HeaderMap) -> Result<Principal, AuthError> {
    let token = extract_access_token(headers).ok_or(AuthError::MalformedToken)?;
    let claims = state.codec.verify_access(&token, now_unix_seconds())?;

    let token_hash = hash_token(&token);
    let issued_at = DateTime::from_timestamp(claims.iat, 0).unwrap_or_else(Utc::now);
    let revoked = match state
        .revocation
        .is_revoked(&token_hash, claims.sub, issued_at)
        .await
    {
        Ok(revoked) => revoked,
        Err(err) => {
            warn!("Revocation check unavailable, denying request: {err:#}");
            true
        }
    };
    if revoked {
        return Err(AuthError::RevokedToken);
    }

    Ok(Principal::from_claims(&claims, token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::token::TokenClass;

    #[test]
    fn principal_carries_claims_identity() {
        let claims = Claims {
            v: 1,
            iss: "http://localhost".to_string(),
            aud: "http://localhost".to_string(),
            sub: Uuid::new_v4(),
            name: "alice".to_string(),
            email: Some("alice@example.com".to_string()),
            cls: TokenClass::Access,
            iat: 1_700_000_000,
            exp: 1_700_000_900,
            jti: Uuid::now_v7().to_string(),
        };
        let principal = Principal::from_claims(&claims, "raw-token".to_string());

        assert_eq!(principal.subject_id, claims.sub);
        assert_eq!(principal.username, "alice");
        assert_eq!(principal.email.as_deref(), Some("alice@example.com"));
        assert_eq!(principal.access_token, "raw-token");
        assert_eq!(principal.issued_at.timestamp(), 1_700_000_000);
    }
}
