//! Error taxonomy for the auth core and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde_json::json;

use super::token::TokenError;

/// Everything the auth protocols can refuse with.
///
/// Token, revocation, and session errors all collapse to 401 on the wire: a
/// caller learns only "unauthenticated", never which check failed. Lockout
/// errors are 403 with machine-readable fields so a client can render the
/// right UI. `StoreUnavailable` is internal-only and surfaces as a plain 500.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Token expired")]
    ExpiredToken,
    #[error("Invalid token")]
    MalformedToken,
    #[error("Wrong token class")]
    WrongTokenClass,
    #[error("Token has been revoked")]
    RevokedToken,
    #[error("Session revoked, sign in again")]
    SessionInactive,
    #[error("Account locked, try again in {remaining_seconds} seconds")]
    LockedTimed {
        remaining_seconds: i64,
        locked_until: DateTime<Utc>,
    },
    #[error("Account locked, check your email for the unlock link")]
    LockedPendingUnlock,
    #[error("Session not found")]
    SessionNotFound,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error(transparent)]
    StoreUnavailable(#[from] anyhow::Error),
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => Self::ExpiredToken,
            TokenError::WrongTokenClass => Self::WrongTokenClass,
            _ => Self::MalformedToken,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match &self {
            Self::ExpiredToken
            | Self::MalformedToken
            | Self::WrongTokenClass
            | Self::RevokedToken
            | Self::SessionInactive
            | Self::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": self.to_string() })),
            )
                .into_response(),
            Self::LockedTimed {
                remaining_seconds,
                locked_until,
            } => (
                StatusCode::FORBIDDEN,
                Json(json!({
                    "error": self.to_string(),
                    "requires_unlock": false,
                    "locked_until": locked_until.to_rfc3339(),
                    "remaining_seconds": remaining_seconds,
                })),
            )
                .into_response(),
            Self::LockedPendingUnlock => (
                StatusCode::FORBIDDEN,
                Json(json!({
                    "error": self.to_string(),
                    "requires_unlock": true,
                })),
            )
                .into_response(),
            // Not-found and not-owned are deliberately indistinguishable.
            Self::SessionNotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": self.to_string() })),
            )
                .into_response(),
            Self::StoreUnavailable(err) => {
                tracing::error!("Store unavailable: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_errors_map_to_auth_errors() {
        assert!(matches!(
            AuthError::from(TokenError::Expired),
            AuthError::ExpiredToken
        ));
        assert!(matches!(
            AuthError::from(TokenError::WrongTokenClass),
            AuthError::WrongTokenClass
        ));
        assert!(matches!(
            AuthError::from(TokenError::InvalidSignature),
            AuthError::MalformedToken
        ));
        assert!(matches!(
            AuthError::from(TokenError::TokenFormat),
            AuthError::MalformedToken
        ));
    }

    #[test]
    fn unauthenticated_errors_are_401() {
        for err in [
            AuthError::ExpiredToken,
            AuthError::MalformedToken,
            AuthError::RevokedToken,
            AuthError::SessionInactive,
            AuthError::InvalidCredentials,
        ] {
            let response = err.into_response();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn lockout_errors_are_403() {
        let response = AuthError::LockedTimed {
            remaining_seconds: 120,
            locked_until: Utc::now(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = AuthError::LockedPendingUnlock.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn store_errors_are_500_without_details() {
        let response = AuthError::StoreUnavailable(anyhow::anyhow!("pool timed out")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
