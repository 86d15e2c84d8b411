//! Domain models for credentials and JWT signing keys.

pub mod credential;
pub mod key;

pub use credential::{Credential, NewCredential};
pub use key::{JwtSigningKey, KeyAuditEvent, KeyAuditRecord, KeyStatus};
