//! WebAuthn relying-party service: passkey registration/authentication
//! ceremonies, durable credential storage, and RS256 bearer-token issuance
//! backed by a self-managed, rotating signing-key store.

pub mod ceremony;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod jwt;
pub mod keys;
pub mod migration;
pub mod model;
pub mod repository;
pub mod server;
pub mod state;
pub mod telemetry;
pub mod webauthn;

pub use config::Config;
pub use error::{AppError, Result};
