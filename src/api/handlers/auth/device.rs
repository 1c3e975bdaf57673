//! Coarse device fingerprinting and client IP resolution.
//!
//! Both functions are pure over request metadata: no I/O, no state. The
//! fingerprint is intentionally coarse (browser family, OS, device class),
//! enough for a user to recognize "their" sessions in an enumeration, not a
//! tracking identifier.

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use utoipa::ToSchema;

/// Value object derived from the `User-Agent` header; persisted only as part
/// of a session row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DeviceInfo {
    pub user_agent_raw: String,
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub os: Option<String>,
    pub platform: Option<String>,
    pub device_class: Option<String>,
}

impl DeviceInfo {
    /// Short human-readable label for session listings.
    #[must_use]
    pub fn label(&self) -> String {
        match (&self.browser, &self.os) {
            (Some(browser), Some(os)) => format!("{browser} on {os}"),
            (Some(browser), None) => browser.clone(),
            (None, Some(os)) => os.clone(),
            (None, None) => "Unknown device".to_string(),
        }
    }
}

/// Derive a coarse device descriptor from request headers.
#[must_use]
pub fn fingerprint(headers: &HeaderMap) -> DeviceInfo {
    let user_agent_raw = headers
        .get("user-agent")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let ua = user_agent_raw.to_lowercase();

    let (browser, browser_version) = browser_family(&ua);
    let (os, platform) = os_family(&ua);
    let device_class = device_class(&ua);

    DeviceInfo {
        user_agent_raw,
        browser,
        browser_version,
        os,
        platform,
        device_class,
    }
}

// Ordering matters: Edge and Opera embed "Chrome", Chrome embeds "Safari".
fn browser_family(ua: &str) -> (Option<String>, Option<String>) {
    let families = [
        ("edg/", "Edge"),
        ("opr/", "Opera"),
        ("firefox/", "Firefox"),
        ("chrome/", "Chrome"),
        ("version/", "Safari"),
    ];

    for (needle, name) in families {
        if let Some(version) = version_after(ua, needle) {
            // "version/" only means Safari when Safari itself is present.
            if name == "Safari" && !ua.contains("safari") {
                continue;
            }
            return (Some(name.to_string()), Some(version));
        }
    }

    if ua.contains("safari") {
        return (Some("Safari".to_string()), None);
    }
    (None, None)
}

fn version_after(ua: &str, needle: &str) -> Option<String> {
    let start = ua.find(needle)? + needle.len();
    let rest = &ua[start..];
    let version: String = rest
        .chars()
        .take_while(|ch| ch.is_ascii_digit() || *ch == '.')
        .collect();
    if version.is_empty() {
        None
    } else {
        Some(version)
    }
}

fn os_family(ua: &str) -> (Option<String>, Option<String>) {
    // iOS before macOS: iPads report "like Mac OS X".
    if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ipod") {
        return (Some("iOS".to_string()), Some("Apple".to_string()));
    }
    if ua.contains("android") {
        return (Some("Android".to_string()), Some("Linux".to_string()));
    }
    if ua.contains("windows nt") || ua.contains("windows") {
        return (Some("Windows".to_string()), Some("Windows".to_string()));
    }
    if ua.contains("mac os x") || ua.contains("macintosh") {
        return (Some("macOS".to_string()), Some("Apple".to_string()));
    }
    if ua.contains("linux") {
        return (Some("Linux".to_string()), Some("Linux".to_string()));
    }
    (None, None)
}

fn device_class(ua: &str) -> Option<String> {
    if ua.is_empty() {
        return None;
    }
    if ua.contains("bot") || ua.contains("crawler") || ua.contains("spider") {
        return Some("bot".to_string());
    }
    if ua.contains("ipad") || ua.contains("tablet") {
        return Some("tablet".to_string());
    }
    if ua.contains("mobi") || ua.contains("iphone") || ua.contains("android") {
        return Some("mobile".to_string());
    }
    Some("desktop".to_string())
}

/// Resolve the best-effort public client IP.
///
/// Resolution order: CDN connecting-IP header, forwarded chain (first public
/// hop), generic proxy headers, then the socket address. Private-range and
/// loopback candidates are deprioritized but kept as a fallback so local
/// development still yields a value. Returns `"unknown"` only when nothing
/// is available at all.
#[must_use]
pub fn public_ip(headers: &HeaderMap, socket_address: Option<SocketAddr>) -> String {
    let mut fallback: Option<String> = None;

    let mut consider = |candidate: &str| -> Option<String> {
        let trimmed = candidate.trim();
        if trimmed.is_empty() {
            return None;
        }
        match trimmed.parse::<IpAddr>() {
            Ok(ip) if !is_private(ip) => Some(trimmed.to_string()),
            Ok(_) => {
                fallback.get_or_insert_with(|| trimmed.to_string());
                None
            }
            Err(_) => None,
        }
    };

    if let Some(value) = header_str(headers, "cf-connecting-ip") {
        if let Some(ip) = consider(value) {
            return ip;
        }
    }

    if let Some(value) = header_str(headers, "x-forwarded-for") {
        for hop in value.split(',') {
            if let Some(ip) = consider(hop) {
                return ip;
            }
        }
    }

    if let Some(value) = header_str(headers, "x-real-ip") {
        if let Some(ip) = consider(value) {
            return ip;
        }
    }

    if let Some(value) = header_str(headers, "forwarded") {
        for element in value.split(',') {
            if let Some(candidate) = forwarded_for(element) {
                if let Some(ip) = consider(&candidate) {
                    return ip;
                }
            }
        }
    }

    if let Some(address) = socket_address {
        if let Some(ip) = consider(&address.ip().to_string()) {
            return ip;
        }
    }

    fallback.unwrap_or_else(|| "unknown".to_string())
}

// RFC 7239 `for=` pair: possibly quoted, v6 bracketed, v4 may carry a port.
fn forwarded_for(element: &str) -> Option<String> {
    let value = element.split(';').map(str::trim).find_map(|pair| {
        pair.strip_prefix("for=")
            .or_else(|| pair.strip_prefix("For="))
    })?;
    let candidate = value.trim_matches('"');
    if let Some(rest) = candidate.strip_prefix('[') {
        return Some(rest.split(']').next().unwrap_or(rest).to_string());
    }
    Some(candidate.split(':').next().unwrap_or(candidate).to_string())
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const CHROME_MAC: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
         AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    const SAFARI_IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) \
         AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
    const FIREFOX_LINUX: &str =
        "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";
    const EDGE_WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
         AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.2210.91";

    fn headers_with_ua(ua: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_str(ua).expect("ua"));
        headers
    }

    #[test]
    fn fingerprint_classifies_chrome_on_macos() {
        let info = fingerprint(&headers_with_ua(CHROME_MAC));
        assert_eq!(info.browser.as_deref(), Some("Chrome"));
        assert_eq!(info.browser_version.as_deref(), Some("120.0.0.0"));
        assert_eq!(info.os.as_deref(), Some("macOS"));
        assert_eq!(info.device_class.as_deref(), Some("desktop"));
        assert_eq!(info.label(), "Chrome on macOS");
    }

    #[test]
    fn fingerprint_classifies_safari_on_iphone() {
        let info = fingerprint(&headers_with_ua(SAFARI_IPHONE));
        assert_eq!(info.browser.as_deref(), Some("Safari"));
        assert_eq!(info.os.as_deref(), Some("iOS"));
        assert_eq!(info.device_class.as_deref(), Some("mobile"));
    }

    #[test]
    fn fingerprint_classifies_firefox_on_linux() {
        let info = fingerprint(&headers_with_ua(FIREFOX_LINUX));
        assert_eq!(info.browser.as_deref(), Some("Firefox"));
        assert_eq!(info.browser_version.as_deref(), Some("121.0"));
        assert_eq!(info.os.as_deref(), Some("Linux"));
    }

    #[test]
    fn fingerprint_prefers_edge_over_embedded_chrome() {
        let info = fingerprint(&headers_with_ua(EDGE_WINDOWS));
        assert_eq!(info.browser.as_deref(), Some("Edge"));
        assert_eq!(info.os.as_deref(), Some("Windows"));
    }

    #[test]
    fn fingerprint_handles_missing_user_agent() {
        let info = fingerprint(&HeaderMap::new());
        assert!(info.user_agent_raw.is_empty());
        assert_eq!(info.browser, None);
        assert_eq!(info.device_class, None);
        assert_eq!(info.label(), "Unknown device");
    }

    #[test]
    fn public_ip_prefers_cdn_header() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", HeaderValue::from_static("203.0.113.7"));
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("198.51.100.1, 10.0.0.1"),
        );
        assert_eq!(public_ip(&headers, None), "203.0.113.7");
    }

    #[test]
    fn public_ip_takes_first_public_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("10.0.0.5, 198.51.100.1, 192.168.1.1"),
        );
        assert_eq!(public_ip(&headers, None), "198.51.100.1");
    }

    #[test]
    fn public_ip_falls_back_to_real_ip_then_socket() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.9"));
        assert_eq!(public_ip(&headers, None), "198.51.100.9");

        let socket: SocketAddr = "203.0.113.20:443".parse().expect("socket");
        assert_eq!(public_ip(&HeaderMap::new(), Some(socket)), "203.0.113.20");
    }

    #[test]
    fn public_ip_parses_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "forwarded",
            HeaderValue::from_static("for=10.0.0.2;proto=https, for=\"198.51.100.4:4711\""),
        );
        assert_eq!(public_ip(&headers, None), "198.51.100.4");

        let mut headers = HeaderMap::new();
        headers.insert(
            "forwarded",
            HeaderValue::from_static("for=\"[2001:db8::1]:443\""),
        );
        assert_eq!(public_ip(&headers, None), "2001:db8::1");
    }

    #[test]
    fn public_ip_keeps_private_candidate_as_fallback() {
        // Development behind a local proxy still gets a value.
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("192.168.1.50"));
        assert_eq!(public_ip(&headers, None), "192.168.1.50");

        let socket: SocketAddr = "127.0.0.1:8080".parse().expect("socket");
        assert_eq!(public_ip(&HeaderMap::new(), Some(socket)), "127.0.0.1");
    }

    #[test]
    fn public_ip_unknown_when_nothing_present() {
        assert_eq!(public_ip(&HeaderMap::new(), None), "unknown");
    }
}
