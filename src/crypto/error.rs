//! Signing and key error types

use thiserror::Error;

/// Errors that can occur while signing or verifying
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The provided key has an invalid length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length in bytes
        expected: usize,
        /// Actual key length in bytes
        actual: usize,
    },

    /// The provided signature has an invalid length
    #[error("invalid signature length: expected {expected}, got {actual}")]
    InvalidSignatureLength {
        /// Expected signature length in bytes
        expected: usize,
        /// Actual signature length in bytes
        actual: usize,
    },

    /// Signature verification failed
    #[error("signature verification failed")]
    SignatureVerificationFailed,

    /// The signer could not produce a signature
    #[error("signer unavailable: {0}")]
    SignerUnavailable(String),

    /// The public key format is invalid
    #[error("invalid public key format")]
    InvalidPublicKey,

    /// The secret key format is invalid
    #[error("invalid secret key format")]
    InvalidSecretKey,
}

/// Result type for signing operations
pub type CryptoResult<T> = Result<T, CryptoError>;
