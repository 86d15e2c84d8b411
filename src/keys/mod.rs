//! JWT signing-key lifecycle: rotation engine (C5), scheduler (C6), and
//! JWKS publisher (C7).

pub mod jwks;
pub mod rotation;
pub mod scheduler;

pub use jwks::{Jwk, Jwks, JwksPublisher};
pub use rotation::{KeyRotationEngine, SigningKeyPair, BOOTSTRAP_KEY_ID};
pub use scheduler::RotationScheduler;
