//! Cryptographic utilities

pub mod envelope;

pub use envelope::{decrypt_from_string, encrypt_to_string, EnvelopeError, MasterKey};
