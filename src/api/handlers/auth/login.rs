//! Login and account-unlock endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ConnectInfo;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::Utc;
use tracing::{debug, info, warn};

use super::cookies::set_token_pair;
use super::device::{fingerprint, public_ip};
use super::error::AuthError;
use super::lockout::LockoutDecision;
use super::state::AuthState;
use super::token::now_unix_seconds;
use super::types::{LoginRequest, MessageResponse, TokenPairResponse, UnlockAccountRequest};
use super::utils::hash_token;

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated, token pair issued", body = TokenPairResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account locked")
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    state: Extension<Arc<AuthState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AuthError> {
    // The lockout gate runs before the password check so a locked account
    // cannot be probed.
    let record = state
        .directory
        .find_by_identifier(&payload.identifier)
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

    let now = Utc::now();
    state.lockout.check(&record, now)?;

    let verified = state
        .directory
        .verify_credentials(&payload.identifier, &payload.password)
        .await?;

    let Some(record) = verified else {
        let decision = state
            .lockout
            .record_failure(&*state.directory, &*state.mailer, &record, now)
            .await?;
        return Err(match decision {
            LockoutDecision::LockedTimed { locked_until } => {
                info!("Account {} locked until {locked_until}", record.username);
                AuthError::LockedTimed {
                    remaining_seconds: (locked_until - now).num_seconds(),
                    locked_until,
                }
            }
            LockoutDecision::LockedPendingUnlock => {
                info!("Account {} locked pending email unlock", record.username);
                AuthError::LockedPendingUnlock
            }
            LockoutDecision::NotLocked { .. } => AuthError::InvalidCredentials,
        });
    };

    state.lockout.record_success(&*state.directory, &record).await?;

    let now_seconds = now_unix_seconds();
    let access_token = state.codec.mint_access(
        record.subject_id,
        &record.username,
        record.email.as_deref(),
        now_seconds,
    )?;
    let refresh_token = state.codec.mint_refresh(
        record.subject_id,
        &record.username,
        record.email.as_deref(),
        now_seconds,
    )?;

    // Session tracking is an enhancement: a failed write must not fail the
    // login. The sessions endpoint lazily backfills on first use.
    let device = fingerprint(&headers);
    let ip_address = public_ip(&headers, Some(addr));
    if let Err(err) = state
        .registry
        .create_or_touch(
            record.subject_id,
            &record.username,
            &hash_token(&refresh_token),
            &device,
            &ip_address,
        )
        .await
    {
        warn!("Failed to register session at login: {err:#}");
    } else {
        debug!("Registered session for {} from {ip_address}", record.username);
    }

    let mut response_headers = HeaderMap::new();
    set_token_pair(&mut response_headers, &state.config, &access_token, &refresh_token)
        .map_err(|err| AuthError::StoreUnavailable(anyhow::Error::new(err)))?;

    Ok((
        response_headers,
        Json(TokenPairResponse {
            subject_id: record.subject_id,
            username: record.username,
            email: record.email,
            access_token,
            refresh_token,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/v1/auth/unlock-account",
    request_body = UnlockAccountRequest,
    responses(
        (status = 200, description = "Account unlocked", body = MessageResponse),
        (status = 401, description = "Invalid identifier or unlock token")
    ),
    tag = "auth"
)]
pub async fn unlock_account(
    state: Extension<Arc<AuthState>>,
    Json(payload): Json<UnlockAccountRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    let record = state
        .directory
        .find_by_identifier(&payload.identifier)
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

    // Bad identifier and bad token are indistinguishable to the caller.
    if !state
        .lockout
        .verify_unlock_token(&record, &payload.token, Utc::now())
    {
        return Err(AuthError::InvalidCredentials);
    }

    state
        .lockout
        .unlock(&*state.directory, &record, "unlock token verified")
        .await?;

    Ok(Json(MessageResponse {
        message: "Account unlocked, you can sign in again".to_string(),
    }))
}
