//! Session identity and credential models.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::util::unix_timestamp_ms;

/// Identifier of a stored session.
///
/// The well-known guest session id is [`SessionId::GUEST`]; the guest session
/// always exists and is the terminal fallback state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// The well-known guest session id.
    pub const GUEST: &'static str = "guest";

    /// Wrap an existing session id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The guest session id.
    #[must_use]
    pub fn guest() -> Self {
        Self(Self::GUEST.to_string())
    }

    /// Mint a fresh session id (UUID v7, time-sortable).
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    /// Whether this is the guest session id.
    #[must_use]
    pub fn is_guest(&self) -> bool {
        self.0 == Self::GUEST
    }

    /// String form of the id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lightweight stored session record: identity and display info only.
///
/// Credentials live in the secure token store and are never serialized
/// together with this record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub account_id: String,
    pub display_name: String,
    pub email: String,
    /// Last login timestamp (Unix ms).
    pub last_login_at: i64,
}

impl SessionInfo {
    /// Build a session record for a freshly authenticated account.
    pub fn new(
        session_id: SessionId,
        account_id: impl Into<String>,
        display_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            account_id: account_id.into(),
            display_name: display_name.into(),
            email: email.into(),
            last_login_at: unix_timestamp_ms(),
        }
    }

    /// The always-available guest identity.
    #[must_use]
    pub fn guest() -> Self {
        Self {
            session_id: SessionId::guest(),
            account_id: SessionId::GUEST.to_string(),
            display_name: "Guest".to_string(),
            email: String::new(),
            last_login_at: unix_timestamp_ms(),
        }
    }

    /// Whether this record describes the guest session.
    #[must_use]
    pub fn is_guest(&self) -> bool {
        self.session_id.is_guest()
    }
}

/// Access/refresh token pair for an authenticated session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
}

impl SessionTokens {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl fmt::Debug for SessionTokens {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SessionTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_id_round_trip() {
        let id = SessionId::guest();
        assert!(id.is_guest());
        assert_eq!(id.as_str(), "guest");
        assert!(!SessionId::generate().is_guest());
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }

    #[test]
    fn tokens_debug_redacts_values() {
        let tokens = SessionTokens::new("secret-access-token", "secret-refresh-token");
        let rendered = format!("{tokens:?}");
        assert!(!rendered.contains("secret-access-token"));
        assert!(!rendered.contains("secret-refresh-token"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn guest_info_has_no_email() {
        let info = SessionInfo::guest();
        assert!(info.is_guest());
        assert!(info.email.is_empty());
    }
}
