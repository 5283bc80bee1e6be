use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::{Display, EnumIter, EnumString};

use super::types::SessionView;
use crate::shared::mask_sensitive;

/// Lifecycle state of a session record.
///
/// Transitions only go `Active -> Expired` (time-driven) or `Active -> Revoked` (explicit).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Expired,
    Revoked,
}

/// One authenticated connection from a client to one bank
#[derive(Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub session_id: String,
    pub client_id: String,
    pub bank_id: String,
    pub token: String, // Signed JWT, claims fixed at issuance
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub status_changed_at: Option<DateTime<Utc>>, // Set on the terminal transition
}

impl SessionRecord {
    /// Creates a new active record
    pub fn new(
        session_id: String,
        client_id: String,
        bank_id: String,
        token: String,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        debug_assert!(issued_at < expires_at, "session must expire after issuance");

        Self {
            session_id,
            client_id,
            bank_id,
            token,
            issued_at,
            expires_at,
            status: SessionStatus::Active,
            status_changed_at: None,
        }
    }

    /// Strict expiry: valid on `[issued_at, expires_at)`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Status as observed at `now`, applying lazy expiry to active records
    pub fn effective_status(&self, now: DateTime<Utc>) -> SessionStatus {
        match self.status {
            SessionStatus::Active if self.is_expired(now) => SessionStatus::Expired,
            status => status,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now) == SessionStatus::Active
    }

    /// When the record became terminal, or `None` while it is still active
    pub fn terminal_since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.status {
            SessionStatus::Active if self.is_expired(now) => Some(self.expires_at),
            SessionStatus::Active => None,
            SessionStatus::Expired => Some(self.status_changed_at.unwrap_or(self.expires_at)),
            SessionStatus::Revoked => Some(self.status_changed_at.unwrap_or(now)),
        }
    }

    /// Persists a lazily observed expiry into the stored status
    pub(crate) fn settle(&mut self, now: DateTime<Utc>) {
        if self.status == SessionStatus::Active && self.is_expired(now) {
            self.status = SessionStatus::Expired;
            self.status_changed_at = Some(self.expires_at);
        }
    }

    /// Marks the record revoked if it is still active. Returns whether it changed.
    pub(crate) fn revoke(&mut self, now: DateTime<Utc>) -> bool {
        self.settle(now);
        if self.status != SessionStatus::Active {
            return false;
        }

        self.status = SessionStatus::Revoked;
        self.status_changed_at = Some(now);
        true
    }

    pub fn view(&self, now: DateTime<Utc>) -> SessionView {
        SessionView {
            session_id: self.session_id.clone(),
            bank_id: self.bank_id.clone(),
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            status: self.effective_status(now),
        }
    }
}

impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecord")
            .field("session_id", &self.session_id)
            .field("client_id", &self.client_id)
            .field("bank_id", &self.bank_id)
            .field("token", &mask_sensitive(&self.token))
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("status", &self.status)
            .field("status_changed_at", &self.status_changed_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(seconds, 0).unwrap()
    }

    fn record() -> SessionRecord {
        SessionRecord::new(
            "session-1".to_string(),
            "client-a".to_string(),
            "bank-x".to_string(),
            "header.payload.signature".to_string(),
            at(1000),
            at(1600),
        )
    }

    #[test]
    fn test_new_record_is_active() {
        let record = record();
        assert_eq!(record.status, SessionStatus::Active);
        assert!(record.is_active(at(1000)));
        assert!(record.is_active(at(1599)));
        assert_eq!(record.terminal_since(at(1599)), None);
    }

    #[test]
    fn test_expiry_is_strict() {
        let record = record();
        assert_eq!(record.effective_status(at(1600)), SessionStatus::Expired);
        assert_eq!(record.effective_status(at(1601)), SessionStatus::Expired);
        assert_eq!(record.terminal_since(at(1700)), Some(at(1600)));
        // Stored status is untouched until settled
        assert_eq!(record.status, SessionStatus::Active);
    }

    #[test]
    fn test_revoke_only_from_active() {
        let mut record = record();
        assert!(record.revoke(at(1200)));
        assert_eq!(record.status, SessionStatus::Revoked);
        assert_eq!(record.status_changed_at, Some(at(1200)));

        // Second revoke changes nothing
        assert!(!record.revoke(at(1300)));
        assert_eq!(record.status_changed_at, Some(at(1200)));
    }

    #[test]
    fn test_revoke_after_expiry_keeps_expired() {
        let mut record = record();
        assert!(!record.revoke(at(1700)));
        assert_eq!(record.status, SessionStatus::Expired);
        assert_eq!(record.status_changed_at, Some(at(1600)));
    }

    #[test]
    fn test_debug_masks_token() {
        let debug = format!("{:?}", record());
        assert!(!debug.contains("header.payload.signature"));
        assert!(debug.contains("head"));
    }

    #[test]
    fn test_status_names_round_trip() {
        for status in SessionStatus::iter() {
            let name = status.to_string();
            assert_eq!(name, name.to_uppercase());
            assert_eq!(SessionStatus::from_str(&name).unwrap(), status);
        }
    }
}
