//! JWT signing key record and its four-phase lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Legal states of a JWT signing key. `PENDING -> ACTIVE -> RETIRED -> DELETED`
/// is the only legal progression; skipping or reversing is forbidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum KeyStatus {
    Pending,
    Active,
    Retired,
    Deleted,
}

impl KeyStatus {
    /// Whether `self -> next` is a legal single-step transition.
    pub fn can_transition_to(self, next: KeyStatus) -> bool {
        matches!(
            (self, next),
            (KeyStatus::Pending, KeyStatus::Active)
                | (KeyStatus::Active, KeyStatus::Retired)
                | (KeyStatus::Retired, KeyStatus::Deleted)
        )
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyStatus::Pending => "PENDING",
            KeyStatus::Active => "ACTIVE",
            KeyStatus::Retired => "RETIRED",
            KeyStatus::Deleted => "DELETED",
        };
        write!(f, "{s}")
    }
}

/// A JWT signing key record, as stored by the Key Store.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JwtSigningKey {
    pub key_id: String,
    pub private_key_encrypted: String,
    pub public_key_pem: String,
    pub algorithm: String,
    pub key_size: i32,
    pub status: KeyStatus,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub retired_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}

impl JwtSigningKey {
    /// Age used to decide rotation/grace-period eligibility: time since the
    /// key was last activated, or since creation if never activated.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.activated_at.unwrap_or(self.created_at)
    }
}

/// Append-only audit event kinds, one row per key state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum KeyAuditEvent {
    Generated,
    Activated,
    Retired,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct KeyAuditRecord {
    pub id: i64,
    pub key_id: String,
    pub event: KeyAuditEvent,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions() {
        assert!(KeyStatus::Pending.can_transition_to(KeyStatus::Active));
        assert!(KeyStatus::Active.can_transition_to(KeyStatus::Retired));
        assert!(KeyStatus::Retired.can_transition_to(KeyStatus::Deleted));
    }

    #[test]
    fn illegal_transitions_rejected() {
        assert!(!KeyStatus::Pending.can_transition_to(KeyStatus::Retired));
        assert!(!KeyStatus::Pending.can_transition_to(KeyStatus::Deleted));
        assert!(!KeyStatus::Active.can_transition_to(KeyStatus::Pending));
        assert!(!KeyStatus::Active.can_transition_to(KeyStatus::Deleted));
        assert!(!KeyStatus::Retired.can_transition_to(KeyStatus::Active));
        assert!(!KeyStatus::Deleted.can_transition_to(KeyStatus::Active));
        assert!(!KeyStatus::Active.can_transition_to(KeyStatus::Active));
    }
}
