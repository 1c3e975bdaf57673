//! Request/response bodies for the auth endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::registry::SessionRow;

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Username or email.
    pub identifier: String,
    pub password: String,
}

/// Token pair is returned in the body for bearer-header clients; browser
/// clients rely on the cookies and may ignore it.
#[derive(Debug, Serialize, ToSchema)]
pub struct TokenPairResponse {
    pub subject_id: Uuid,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UnlockAccountRequest {
    /// Username or email; the unlock token alone does not identify the
    /// account.
    pub identifier: String,
    pub token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub session_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    pub ip_address: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub current: bool,
}

impl From<SessionRow> for SessionResponse {
    fn from(row: SessionRow) -> Self {
        Self {
            session_id: row.session_id,
            browser: row.browser,
            os: row.os,
            device_class: row.device_class,
            ip_address: row.ip_address,
            created_at: row.created_at,
            last_activity_at: row.last_activity_at,
            current: row.current,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionResponse>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RevokedCountResponse {
    pub revoked: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_response_drops_missing_device_fields() {
        let response = SessionResponse {
            session_id: Uuid::new_v4(),
            browser: None,
            os: None,
            device_class: None,
            ip_address: "203.0.113.9".to_string(),
            created_at: Utc::now(),
            last_activity_at: Utc::now(),
            current: true,
        };
        let json = serde_json::to_value(&response).expect("json");
        assert!(json.get("browser").is_none());
        assert_eq!(json["current"], true);
    }

    #[test]
    fn token_pair_response_keeps_both_tokens() {
        let response = TokenPairResponse {
            subject_id: Uuid::new_v4(),
            username: "alice".to_string(),
            email: None,
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
        };
        let json = serde_json::to_value(&response).expect("json");
        assert_eq!(json["access_token"], "at");
        assert_eq!(json["refresh_token"], "rt");
        assert!(json.get("email").is_none());
    }
}
