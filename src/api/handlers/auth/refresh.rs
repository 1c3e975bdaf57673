//! Refresh-token rotation.
//!
//! Failure policy differs per check and is deliberate:
//!
//! - revocation lookup failure fails **closed** (500): rotating while blind
//!   to the blacklist could resurrect a revoked token;
//! - session-state lookup failure fails **open** (proceed with a warning):
//!   session tracking is an enhancement and an outage must not sign every
//!   device out.
//!
//! On the wire every refusal answers identically; only the server logs know
//! which check fired.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ConnectInfo;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use tracing::warn;

use super::cookies::set_token_pair;
use super::device::{fingerprint, public_ip};
use super::error::AuthError;
use super::state::AuthState;
use super::token::{now_unix_seconds, TokenClass};
use super::types::TokenPairResponse;
use super::utils::{extract_refresh_token, hash_token};

/// Collapse every refusal on the rotation path to one answer. A caller who
/// presents a bad refresh token learns only that a fresh sign-in is
/// required, never which check rejected it. Store outages stay 500.
fn uniform_rejection(err: AuthError) -> AuthError {
    match err {
        AuthError::StoreUnavailable(_) => err,
        _ => AuthError::SessionInactive,
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    responses(
        (status = 200, description = "Token pair rotated", body = TokenPairResponse),
        (status = 401, description = "Refresh token missing, invalid, revoked, or session inactive")
    ),
    tag = "auth"
)]
pub async fn refresh(
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthError> {
    rotate(headers, addr, state).await.map_err(uniform_rejection)
}

async fn rotate(
    headers: HeaderMap,
    addr: SocketAddr,
    state: Extension<Arc<AuthState>>,
) -> Result<(HeaderMap, Json<TokenPairResponse>), AuthError> {
    let old_token = extract_refresh_token(&headers).ok_or(AuthError::MalformedToken)?;

    let now_seconds = now_unix_seconds();
    let claims = state.codec.verify_refresh(&old_token, now_seconds)?;
    let old_hash = hash_token(&old_token);
    let issued_at = DateTime::from_timestamp(claims.iat, 0).unwrap_or_else(Utc::now);

    // Fail closed: the `?` surfaces a store outage as 500.
    if state
        .revocation
        .is_revoked(&old_hash, claims.sub, issued_at)
        .await?
    {
        return Err(AuthError::RevokedToken);
    }

    // Fail open: only an explicit inactive row blocks rotation.
    match state.registry.session_state(&old_hash).await {
        Ok(Some(false)) => return Err(AuthError::SessionInactive),
        Ok(_) => {}
        Err(err) => warn!("Session state check unavailable, proceeding: {err:#}"),
    }

    // Rotation: the old token becomes permanently unusable before the new
    // pair exists. Failing here leaves the caller with a still-valid token.
    let natural_expiry = DateTime::from_timestamp(claims.exp, 0).unwrap_or_else(Utc::now);
    state
        .revocation
        .revoke(
            &old_hash,
            claims.sub,
            &claims.name,
            TokenClass::Refresh,
            natural_expiry,
            "rotated",
        )
        .await?;

    // The old-hash row is done; the new token gets its own row below. Best
    // effort, like the session-state check above.
    if let Err(err) = state.registry.deactivate_by_hash(&old_hash).await {
        warn!("Failed to retire rotated session row: {err:#}");
    }

    let access_token = state.codec.mint_access(
        claims.sub,
        &claims.name,
        claims.email.as_deref(),
        now_seconds,
    )?;
    let refresh_token = state.codec.mint_refresh(
        claims.sub,
        &claims.name,
        claims.email.as_deref(),
        now_seconds,
    )?;

    let device = fingerprint(&headers);
    let ip_address = public_ip(&headers, Some(addr));
    if let Err(err) = state
        .registry
        .create_or_touch(
            claims.sub,
            &claims.name,
            &hash_token(&refresh_token),
            &device,
            &ip_address,
        )
        .await
    {
        warn!("Failed to register rotated session: {err:#}");
    }

    let mut response_headers = HeaderMap::new();
    set_token_pair(&mut response_headers, &state.config, &access_token, &refresh_token)
        .map_err(|err| AuthError::StoreUnavailable(anyhow::Error::new(err)))?;

    Ok((
        response_headers,
        Json(TokenPairResponse {
            subject_id: claims.sub,
            username: claims.name,
            email: claims.email,
            access_token,
            refresh_token,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_rejection_reads_the_same() {
        for err in [
            AuthError::MalformedToken,
            AuthError::ExpiredToken,
            AuthError::WrongTokenClass,
            AuthError::RevokedToken,
            AuthError::SessionInactive,
        ] {
            assert!(matches!(
                uniform_rejection(err),
                AuthError::SessionInactive
            ));
        }
    }

    #[test]
    fn store_outages_are_not_masked() {
        let mapped = uniform_rejection(AuthError::StoreUnavailable(anyhow::anyhow!(
            "pool timed out"
        )));
        assert!(matches!(mapped, AuthError::StoreUnavailable(_)));
    }
}
