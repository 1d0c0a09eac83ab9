//! Signed envelope composition
//!
//! A payload is serialized once, the signer signs exactly those bytes, and
//! the same bytes are what the server re-derives when it checks the
//! signature. serde_json keeps struct fields in declaration order and every
//! collection in a payload is built from an ordered set, so a logical
//! transaction has exactly one byte representation.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::crypto::{CryptoResult, PublicKey, Signer};
use crate::error::{BcdbError, BcdbResult};
use crate::types::Envelope;

/// Canonical bytes of a payload
pub fn canonical_bytes<P: Serialize>(payload: &P) -> BcdbResult<Vec<u8>> {
    serde_json::to_vec(payload).map_err(|e| BcdbError::Encoding(e.to_string()))
}

/// Sign `payload` and wrap it into an envelope.
///
/// Nothing is sent anywhere; a signing failure leaves no trace.
pub fn compose<P: Serialize>(payload: P, signer: &dyn Signer) -> BcdbResult<Envelope<P>> {
    let bytes = canonical_bytes(&payload)?;
    let signature = signer.sign(&bytes)?;
    Ok(Envelope { payload, signature })
}

/// Serialize an envelope for the wire
pub fn encode<P: Serialize>(envelope: &Envelope<P>) -> BcdbResult<Vec<u8>> {
    serde_json::to_vec(envelope).map_err(|e| BcdbError::Encoding(e.to_string()))
}

/// Decode an envelope received on the wire
pub fn decode<P: DeserializeOwned>(bytes: &[u8]) -> serde_json::Result<Envelope<P>> {
    serde_json::from_slice(bytes)
}

/// Check an envelope's signature against the signer's public key
pub fn verify<P: Serialize>(envelope: &Envelope<P>, key: &PublicKey) -> CryptoResult<()> {
    let bytes = serde_json::to_vec(&envelope.payload)
        .map_err(|_| crate::crypto::CryptoError::SignatureVerificationFailed)?;
    key.verify(&bytes, &envelope.signature)
}
