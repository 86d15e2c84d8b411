//! Credential record — one attested authenticator bound to one user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored WebAuthn credential row.
///
/// `credential_id` and `user_handle` are stored as the raw authenticator
/// bytes; callers base64url-encode them at the API boundary. `signature_count`
/// is monotonic non-decreasing — enforced by the credential store, not here.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Credential {
    pub credential_id: Vec<u8>,
    pub user_handle: Vec<u8>,
    pub username: String,
    pub display_name: String,
    pub public_key_cose: Vec<u8>,
    pub signature_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Input for inserting a newly-registered credential.
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub credential_id: Vec<u8>,
    pub user_handle: Vec<u8>,
    pub username: String,
    pub display_name: String,
    pub public_key_cose: Vec<u8>,
    pub signature_count: i64,
}

impl From<NewCredential> for Credential {
    fn from(input: NewCredential) -> Self {
        Self {
            credential_id: input.credential_id,
            user_handle: input.user_handle,
            username: input.username,
            display_name: input.display_name,
            public_key_cose: input.public_key_cose,
            signature_count: input.signature_count,
            created_at: Utc::now(),
        }
    }
}
