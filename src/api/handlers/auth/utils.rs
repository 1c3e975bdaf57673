//! Small helpers shared across the auth handlers.

use anyhow::{Context, Result};
use axum::http::{header::AUTHORIZATION, HeaderMap};
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

use super::cookies::{ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME};

/// One-way hash of a raw bearer token.
///
/// Revocation records and session rows are keyed by this hash; raw tokens
/// never touch the database.
#[must_use]
pub fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Create a random unlock token for the email-unlock flow.
/// The raw value is only mailed to the user; the database stores a hash.
///
/// # Errors
///
/// Returns an error if the system RNG fails.
pub fn generate_unlock_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate unlock token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Compare an unlock-token candidate against a stored hash without leaking
/// timing. Hashing both sides first makes the final comparison length-fixed
/// and input-independent.
#[must_use]
pub fn unlock_token_matches(candidate: &str, stored_hash: &[u8]) -> bool {
    let candidate_hash = hash_token(candidate);
    if candidate_hash.len() != stored_hash.len() {
        return false;
    }
    candidate_hash
        .iter()
        .zip(stored_hash.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Extract the access token: cookie preferred, bearer header fallback.
#[must_use]
pub fn extract_access_token(headers: &HeaderMap) -> Option<String> {
    extract_cookie(headers, ACCESS_COOKIE_NAME).or_else(|| extract_bearer_token(headers))
}

/// Extract the refresh token: cookie preferred, bearer header fallback.
#[must_use]
pub fn extract_refresh_token(headers: &HeaderMap) -> Option<String> {
    extract_cookie(headers, REFRESH_COOKIE_NAME).or_else(|| extract_bearer_token(headers))
}

fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(axum::http::header::COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == name && !val.is_empty() {
            return Some(val.to_string());
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
