//! RS256 bearer-token issuance (C8).

pub mod signer;

pub use signer::{Claims, TokenSigner};
