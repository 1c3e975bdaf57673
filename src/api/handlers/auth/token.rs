//! HS256 bearer-token codec for access and refresh tokens.
//!
//! Claims are a fixed, versioned schema (`deny_unknown_fields`) so a forged
//! payload cannot smuggle extra fields past verification. Access and refresh
//! tokens are signed with distinct secrets: compromising the access key must
//! not allow forging refresh tokens.
//!
//! Expiry is compared against an explicit `now_unix_seconds` with no leeway,
//! so boundary behavior is exact and testable.

use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const CLAIMS_VERSION: u8 = 1;
pub const ACCESS_TTL_SECONDS: i64 = 15 * 60;
pub const REFRESH_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

/// Current Unix time in seconds, the clock every handler passes in.
#[must_use]
pub fn now_unix_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

/// The two token classes this core issues. There are no others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenClass {
    Access,
    Refresh,
}

impl TokenClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct TokenHeader {
    alg: String,
    typ: String,
}

impl TokenHeader {
    fn hs256() -> Self {
        Self {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        }
    }
}

/// Fixed claim schema; unknown fields are rejected on decode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Claims {
    pub v: u8,
    pub iss: String,
    pub aud: String,
    pub sub: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub cls: TokenClass,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("invalid issuer")]
    InvalidIssuer,
    #[error("invalid audience")]
    InvalidAudience,
    #[error("invalid token version")]
    InvalidVersion,
    #[error("wrong token class")]
    WrongTokenClass,
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, TokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| TokenError::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn split_token(token: &str) -> Result<(&str, &str, &str), TokenError> {
    let mut parts = token.split('.');
    let header_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
    let claims_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
    let sig_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
    if parts.next().is_some() {
        return Err(TokenError::TokenFormat);
    }
    Ok((header_b64, claims_b64, sig_b64))
}

/// Decode claims without verifying signature or expiry.
///
/// Used on best-effort paths (logout audit metadata) where an expired or
/// even forged token still identifies what to blacklist. Never use the
/// result to grant access.
///
/// # Errors
///
/// Returns an error if the token is structurally malformed.
pub fn peek(token: &str) -> Result<Claims, TokenError> {
    let (_, claims_b64, _) = split_token(token)?;
    b64d_json(claims_b64)
}

/// Signs and verifies the two token classes against distinct secrets.
#[derive(Clone)]
pub struct TokenCodec {
    issuer: String,
    audience: String,
    access_secret: SecretString,
    refresh_secret: SecretString,
}

impl TokenCodec {
    #[must_use]
    pub fn new(
        issuer: String,
        audience: String,
        access_secret: SecretString,
        refresh_secret: SecretString,
    ) -> Self {
        Self {
            issuer,
            audience,
            access_secret,
            refresh_secret,
        }
    }

    /// Mint a 15-minute access token.
    ///
    /// # Errors
    ///
    /// Returns an error if claim encoding or signing fails.
    pub fn mint_access(
        &self,
        subject_id: Uuid,
        username: &str,
        email: Option<&str>,
        now_unix_seconds: i64,
    ) -> Result<String, TokenError> {
        self.mint(
            TokenClass::Access,
            ACCESS_TTL_SECONDS,
            subject_id,
            username,
            email,
            now_unix_seconds,
        )
    }

    /// Mint a 7-day refresh token.
    ///
    /// # Errors
    ///
    /// Returns an error if claim encoding or signing fails.
    pub fn mint_refresh(
        &self,
        subject_id: Uuid,
        username: &str,
        email: Option<&str>,
        now_unix_seconds: i64,
    ) -> Result<String, TokenError> {
        self.mint(
            TokenClass::Refresh,
            REFRESH_TTL_SECONDS,
            subject_id,
            username,
            email,
            now_unix_seconds,
        )
    }

    /// Verify an access token and return its claims.
    ///
    /// # Errors
    ///
    /// `Expired` past `exp`, `WrongTokenClass` if a refresh-class token was
    /// somehow signed with the access secret, and signature/issuer/audience
    /// failures otherwise. A refresh token presented here normally fails
    /// with `InvalidSignature` because the secrets differ.
    pub fn verify_access(
        &self,
        token: &str,
        now_unix_seconds: i64,
    ) -> Result<Claims, TokenError> {
        let claims = self.verify(token, &self.access_secret, now_unix_seconds)?;
        if claims.cls != TokenClass::Access {
            return Err(TokenError::WrongTokenClass);
        }
        Ok(claims)
    }

    /// Verify a refresh token and return its claims.
    ///
    /// The embedded class is checked *before* the signature so an access
    /// token presented here fails with `WrongTokenClass` rather than a
    /// generic signature error, even though the secrets differ.
    ///
    /// # Errors
    ///
    /// `WrongTokenClass`, `Expired`, or signature/issuer/audience failures.
    pub fn verify_refresh(
        &self,
        token: &str,
        now_unix_seconds: i64,
    ) -> Result<Claims, TokenError> {
        let unverified = peek(token)?;
        if unverified.cls != TokenClass::Refresh {
            return Err(TokenError::WrongTokenClass);
        }
        self.verify(token, &self.refresh_secret, now_unix_seconds)
    }

    fn mint(
        &self,
        class: TokenClass,
        ttl_seconds: i64,
        subject_id: Uuid,
        username: &str,
        email: Option<&str>,
        now_unix_seconds: i64,
    ) -> Result<String, TokenError> {
        let claims = Claims {
            v: CLAIMS_VERSION,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            sub: subject_id,
            name: username.to_string(),
            email: email.map(str::to_string),
            cls: class,
            iat: now_unix_seconds,
            exp: now_unix_seconds + ttl_seconds,
            jti: Uuid::now_v7().to_string(),
        };

        let header_b64 = b64e_json(&TokenHeader::hs256())?;
        let claims_b64 = b64e_json(&claims)?;
        let signing_input = format!("{header_b64}.{claims_b64}");

        let secret = match class {
            TokenClass::Access => &self.access_secret,
            TokenClass::Refresh => &self.refresh_secret,
        };
        let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
            .map_err(|_| TokenError::InvalidSignature)?;
        mac.update(signing_input.as_bytes());
        let signature_b64 = Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes());

        Ok(format!("{signing_input}.{signature_b64}"))
    }

    fn verify(
        &self,
        token: &str,
        secret: &SecretString,
        now_unix_seconds: i64,
    ) -> Result<Claims, TokenError> {
        let (header_b64, claims_b64, sig_b64) = split_token(token)?;

        let header: TokenHeader = b64d_json(header_b64)?;
        if header.alg != "HS256" {
            return Err(TokenError::UnsupportedAlg(header.alg));
        }

        let signing_input = format!("{header_b64}.{claims_b64}");
        let signature_bytes =
            Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| TokenError::Base64)?;
        let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
            .map_err(|_| TokenError::InvalidSignature)?;
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature_bytes)
            .map_err(|_| TokenError::InvalidSignature)?;

        let claims: Claims = b64d_json(claims_b64)?;
        if claims.v != CLAIMS_VERSION {
            return Err(TokenError::InvalidVersion);
        }
        if claims.iss != self.issuer {
            return Err(TokenError::InvalidIssuer);
        }
        if claims.aud != self.audience {
            return Err(TokenError::InvalidAudience);
        }
        // No leeway: exp == now is already expired.
        if claims.exp <= now_unix_seconds {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}
