//! Cookie construction for the token pair.
//!
//! Same-origin deployments get `SameSite=Strict` with no `Domain` attribute.
//! Multi-origin deployments (an explicit cookie domain is configured) get
//! `SameSite=Lax` with `Domain=<domain>` so sibling origins can share the
//! cookies. `Secure` follows the configured base URL scheme.

use axum::http::{
    header::{InvalidHeaderValue, SET_COOKIE},
    HeaderMap, HeaderValue,
};

use super::state::AuthConfig;
use super::token::{ACCESS_TTL_SECONDS, REFRESH_TTL_SECONDS};

pub const ACCESS_COOKIE_NAME: &str = "access_token";
pub const REFRESH_COOKIE_NAME: &str = "refresh_token";

fn build(
    config: &AuthConfig,
    name: &str,
    value: &str,
    max_age_seconds: i64,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{name}={value}; Path=/; HttpOnly; Max-Age={max_age_seconds}");

    match config.cookie_domain() {
        Some(domain) => {
            cookie.push_str("; SameSite=Lax; Domain=");
            cookie.push_str(domain);
        }
        None => cookie.push_str("; SameSite=Strict"),
    }

    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }

    HeaderValue::from_str(&cookie)
}

/// Append `Set-Cookie` headers for a freshly minted token pair.
///
/// # Errors
///
/// Returns an error if a token produces an invalid header value.
pub fn set_token_pair(
    headers: &mut HeaderMap,
    config: &AuthConfig,
    access_token: &str,
    refresh_token: &str,
) -> Result<(), InvalidHeaderValue> {
    headers.append(
        SET_COOKIE,
        build(config, ACCESS_COOKIE_NAME, access_token, ACCESS_TTL_SECONDS)?,
    );
    headers.append(
        SET_COOKIE,
        build(
            config,
            REFRESH_COOKIE_NAME,
            refresh_token,
            REFRESH_TTL_SECONDS,
        )?,
    );
    Ok(())
}

/// Append expired `Set-Cookie` headers clearing both tokens.
///
/// Infallible in practice; cookie values are empty and attributes are ours.
pub fn clear_token_pair(headers: &mut HeaderMap, config: &AuthConfig) {
    for name in [ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME] {
        if let Ok(cookie) = build(config, name, "", 0) {
            headers.append(SET_COOKIE, cookie);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn config(base_url: &str) -> AuthConfig {
        AuthConfig::new(
            base_url.to_string(),
            SecretString::from("access-secret".to_string()),
            SecretString::from("refresh-secret".to_string()),
        )
    }

    fn cookie_values(headers: &HeaderMap) -> Vec<String> {
        headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok().map(str::to_string))
            .collect()
    }

    #[test]
    fn same_origin_cookies_are_strict() {
        let mut headers = HeaderMap::new();
        set_token_pair(&mut headers, &config("https://auth.example.com"), "at", "rt")
            .expect("cookies");
        let cookies = cookie_values(&headers);

        assert_eq!(cookies.len(), 2);
        assert!(cookies[0].starts_with("access_token=at; Path=/; HttpOnly; Max-Age=900"));
        assert!(cookies[0].contains("SameSite=Strict"));
        assert!(cookies[0].contains("Secure"));
        assert!(!cookies[0].contains("Domain="));
        assert!(cookies[1].starts_with("refresh_token=rt; Path=/; HttpOnly; Max-Age=604800"));
    }

    #[test]
    fn cross_domain_cookies_are_lax_with_domain() {
        let mut headers = HeaderMap::new();
        let config = config("https://auth.example.com").with_cookie_domain("example.com".into());
        set_token_pair(&mut headers, &config, "at", "rt").expect("cookies");
        let cookies = cookie_values(&headers);

        assert!(cookies[0].contains("SameSite=Lax"));
        assert!(cookies[0].contains("Domain=example.com"));
        assert!(!cookies[0].contains("SameSite=Strict"));
    }

    #[test]
    fn plain_http_omits_secure() {
        let mut headers = HeaderMap::new();
        set_token_pair(&mut headers, &config("http://localhost:8080"), "at", "rt")
            .expect("cookies");
        let cookies = cookie_values(&headers);
        assert!(!cookies[0].contains("Secure"));
    }

    #[test]
    fn clear_token_pair_expires_both() {
        let mut headers = HeaderMap::new();
        clear_token_pair(&mut headers, &config("https://auth.example.com"));
        let cookies = cookie_values(&headers);

        assert_eq!(cookies.len(), 2);
        assert!(cookies[0].starts_with("access_token=; Path=/; HttpOnly; Max-Age=0"));
        assert!(cookies[1].starts_with("refresh_token=; Path=/; HttpOnly; Max-Age=0"));
    }
}
