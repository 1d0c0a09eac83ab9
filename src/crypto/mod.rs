//! Signing primitives
//!
//! - `identity`: Ed25519 identities and the `Signer` capability
//! - `error`: signing and key errors

pub mod error;
pub mod identity;

pub use error::{CryptoError, CryptoResult};
pub use identity::{Identity, PublicKey, SignatureBytes, Signer};

/// Generate cryptographically secure random bytes
pub fn random_bytes<const N: usize>() -> [u8; N] {
    use rand::RngCore;
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Generate a fresh transaction id
pub fn new_tx_id() -> String {
    hex::encode(random_bytes::<16>())
}
