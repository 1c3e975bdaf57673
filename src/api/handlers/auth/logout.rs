//! Logout: best effort everywhere, 204 always.
//!
//! A logout must never strand the user in a signed-in state because a store
//! was slow, so both blacklist writes are time-boxed and run concurrently,
//! and the response clears the cookies no matter what happened server-side.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::cookies::clear_token_pair;
use super::device::public_ip;
use super::revocation::RevocationStore;
use super::state::AuthState;
use super::token::peek;
use super::utils::{extract_access_token, extract_refresh_token, hash_token};

const BLACKLIST_TIMEOUT: Duration = Duration::from_secs(3);

/// Blacklist one token by hash, time-boxed. Claims come from an unverified
/// peek: even an expired token still identifies what to blacklist.
async fn blacklist(revocation: &RevocationStore, token: &str, label: &str) {
    let Ok(claims) = peek(token) else {
        debug!("Skipping {label} blacklist, token is malformed");
        return;
    };
    let token_hash = hash_token(token);
    let natural_expiry = DateTime::from_timestamp(claims.exp, 0).unwrap_or_else(Utc::now);

    match tokio::time::timeout(
        BLACKLIST_TIMEOUT,
        revocation.revoke(
            &token_hash,
            claims.sub,
            &claims.name,
            claims.cls,
            natural_expiry,
            "logout",
        ),
    )
    .await
    {
        Ok(Ok(())) => debug!("Blacklisted {label} token"),
        Ok(Err(err)) => warn!("Failed to blacklist {label} token: {err:#}"),
        Err(_) => warn!("Timed out blacklisting {label} token"),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Signed out, cookies cleared")
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let access_token = extract_access_token(&headers);
    let refresh_token = extract_refresh_token(&headers);

    match (&access_token, &refresh_token) {
        (Some(access), Some(refresh)) => {
            tokio::join!(
                blacklist(&state.revocation, access, "access"),
                blacklist(&state.revocation, refresh, "refresh"),
            );
        }
        (Some(access), None) => blacklist(&state.revocation, access, "access").await,
        (None, Some(refresh)) => blacklist(&state.revocation, refresh, "refresh").await,
        (None, None) => {}
    }

    // Session deactivation: exact by refresh-token hash when we have it,
    // device/IP heuristic otherwise.
    if let Some(refresh) = &refresh_token {
        if let Err(err) = state.registry.deactivate_by_hash(&hash_token(refresh)).await {
            warn!("Failed to deactivate session: {err:#}");
        }
    } else if let Some(claims) = access_token.as_deref().and_then(|token| peek(token).ok()) {
        let ip_address = public_ip(&headers, Some(addr));
        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|value| value.to_str().ok());
        match state
            .registry
            .deactivate_matching_device(claims.sub, &ip_address, user_agent)
            .await
        {
            Ok(count) => debug!("Deactivated {count} session(s) by device match"),
            Err(err) => warn!("Failed to deactivate sessions by device match: {err:#}"),
        }
    }

    let mut response_headers = HeaderMap::new();
    clear_token_pair(&mut response_headers, &state.config);
    (StatusCode::NO_CONTENT, response_headers)
}
