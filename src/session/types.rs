use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::models::SessionStatus;

/// JWT claims structure containing session information
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    pub iss: String, // Application id
    pub aud: String, // Banking API base URL
    pub sub: String, // Privacy hash of the client id
    pub session_id: String,
    pub bank_id: String,
    pub iat: i64, // Issued at, Unix seconds
    pub exp: i64, // Expiration, Unix seconds
}

/// Request body for session creation endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateSessionRequest {
    pub client_id: String,
    pub bank_id: String,
}

/// Response for session creation and refresh endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionResponse {
    pub session_id: String,
    pub bank_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// One entry of a client's active session listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveSession {
    pub bank_id: String,
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Inspection view of a session record. Never carries the token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionView {
    pub session_id: String,
    pub bank_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: SessionStatus,
}

/// Point-in-time counts over the session store
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub expired_sessions: usize,
    pub revoked_sessions: usize,
    pub banks_with_active_sessions: usize,
}
