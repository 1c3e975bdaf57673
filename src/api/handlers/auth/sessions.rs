//! Session enumeration and revocation endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use super::cookies::clear_token_pair;
use super::device::{fingerprint, public_ip};
use super::error::AuthError;
use super::principal::{authenticate, Principal};
use super::state::AuthState;
use super::token::{now_unix_seconds, TokenClass};
use super::types::{RevokedCountResponse, SessionListResponse, SessionResponse};
use super::utils::{extract_refresh_token, hash_token};

/// The caller's verified refresh token, if one accompanies the request and
/// belongs to the authenticated subject. Used for the `current` annotation
/// and the revoke-all-except carve-out.
fn current_refresh_token(
    state: &AuthState,
    headers: &HeaderMap,
    principal: &Principal,
) -> Option<String> {
    let token = extract_refresh_token(headers)?;
    let claims = state.codec.verify_refresh(&token, now_unix_seconds()).ok()?;
    if claims.sub != principal.subject_id {
        return None;
    }
    Some(token)
}

#[utoipa::path(
    get,
    path = "/v1/auth/sessions",
    responses(
        (status = 200, description = "Active sessions, most recent first", body = SessionListResponse),
        (status = 401, description = "Unauthenticated")
    ),
    tag = "auth"
)]
pub async fn list_sessions(
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    state: Extension<Arc<AuthState>>,
) -> Result<Json<SessionListResponse>, AuthError> {
    let principal = authenticate(&state, &headers).await?;
    let refresh_token = current_refresh_token(&state, &headers, &principal);
    let current_hash = refresh_token.as_deref().map(hash_token);

    let mut rows = state
        .registry
        .list_active(principal.subject_id, current_hash.as_deref())
        .await?;

    // Lazy backfill: a login whose session write failed leaves the list
    // empty. One registration attempt, then a single retry.
    if rows.is_empty() {
        if let (Some(_), Some(hash)) = (&refresh_token, &current_hash) {
            let device = fingerprint(&headers);
            let ip_address = public_ip(&headers, Some(addr));
            match state
                .registry
                .create_or_touch(principal.subject_id, &principal.username, hash, &device, &ip_address)
                .await
            {
                Ok(_) => {
                    rows = state
                        .registry
                        .list_active(principal.subject_id, current_hash.as_deref())
                        .await?;
                }
                Err(err) => warn!("Session backfill failed: {err:#}"),
            }
        }
    }

    Ok(Json(SessionListResponse {
        sessions: rows.into_iter().map(SessionResponse::from).collect(),
    }))
}

#[utoipa::path(
    delete,
    path = "/v1/auth/sessions/{session_id}",
    params(("session_id" = Uuid, Path, description = "Session to revoke")),
    responses(
        (status = 204, description = "Session revoked"),
        (status = 401, description = "Unauthenticated"),
        (status = 404, description = "Session not found")
    ),
    tag = "auth"
)]
pub async fn revoke_session(
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
    state: Extension<Arc<AuthState>>,
) -> Result<StatusCode, AuthError> {
    let principal = authenticate(&state, &headers).await?;

    // Ownership is enforced in the query; a foreign session id comes back
    // as not-found.
    if !state
        .registry
        .revoke_one(session_id, principal.subject_id)
        .await?
    {
        return Err(AuthError::SessionNotFound);
    }
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/v1/auth/sessions",
    responses(
        (status = 200, description = "Other sessions revoked", body = RevokedCountResponse),
        (status = 401, description = "Unauthenticated")
    ),
    tag = "auth"
)]
pub async fn revoke_other_sessions(
    headers: HeaderMap,
    state: Extension<Arc<AuthState>>,
) -> Result<Json<RevokedCountResponse>, AuthError> {
    let principal = authenticate(&state, &headers).await?;
    let current_hash = current_refresh_token(&state, &headers, &principal)
        .as_deref()
        .map(hash_token);

    let revoked = state
        .registry
        .revoke_all_except(principal.subject_id, current_hash.as_deref())
        .await?;
    Ok(Json(RevokedCountResponse { revoked }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/revoke-all-sessions",
    responses(
        (status = 200, description = "All sessions revoked, caller signed out", body = RevokedCountResponse),
        (status = 401, description = "Unauthenticated")
    ),
    tag = "auth"
)]
pub async fn revoke_all_sessions(
    headers: HeaderMap,
    state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthError> {
    let principal = authenticate(&state, &headers).await?;

    // Blacklist the caller's own tokens first; the tombstone below covers
    // them anyway, so failures here are logged and tolerated.
    let access_expiry = expiry_of(&principal.access_token);
    if let Err(err) = state
        .revocation
        .revoke(
            &hash_token(&principal.access_token),
            principal.subject_id,
            &principal.username,
            TokenClass::Access,
            access_expiry,
            "revoke-all",
        )
        .await
    {
        warn!("Failed to blacklist current access token: {err:#}");
    }
    if let Some(refresh) = extract_refresh_token(&headers) {
        if let Err(err) = state
            .revocation
            .revoke(
                &hash_token(&refresh),
                principal.subject_id,
                &principal.username,
                TokenClass::Refresh,
                expiry_of(&refresh),
                "revoke-all",
            )
            .await
        {
            warn!("Failed to blacklist current refresh token: {err:#}");
        }
    }

    // The tombstone is the core promise: every outstanding token dies on
    // its next revocation check. This write fails closed.
    state
        .revocation
        .revoke_all_for_subject(principal.subject_id, &principal.username, "revoke-all")
        .await?;

    let revoked = state
        .registry
        .revoke_all_except(principal.subject_id, None)
        .await?;
    info!(
        "Revoked all sessions for {} ({revoked} active)",
        principal.username
    );

    let mut response_headers = HeaderMap::new();
    clear_token_pair(&mut response_headers, &state.config);
    Ok((response_headers, Json(RevokedCountResponse { revoked })))
}

fn expiry_of(token: &str) -> DateTime<Utc> {
    super::token::peek(token)
        .ok()
        .and_then(|claims| DateTime::from_timestamp(claims.exp, 0))
        .unwrap_or_else(Utc::now)
}
