//! Data access layer (Repository pattern): Credential Store (C2) and Key
//! Store (C3), both backed by Postgres via `sqlx`.

pub mod credential_store;
pub mod key_store;

pub use credential_store::{CredentialRepository, PgCredentialRepository};
pub use key_store::{KeyRepository, PgKeyRepository};
