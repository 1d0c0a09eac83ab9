//! Ed25519 identities and the signer capability
//!
//! Every request a session sends is signed by the identity bound to it.
//! The server verifies the signature against the certificate it holds for
//! the user id, so a signer is the only key material the client touches.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::error::{CryptoError, CryptoResult};

/// Size of a public key in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of a secret key in bytes
pub const SECRET_KEY_SIZE: usize = 32;

/// Size of a signature in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Produces a deterministic signature over a serialized payload.
///
/// Implementations must sign exactly the bytes they are given; the caller
/// sends those same bytes next to the signature.
pub trait Signer: Send + Sync {
    /// Sign `payload`
    fn sign(&self, payload: &[u8]) -> CryptoResult<SignatureBytes>;
}

/// A public key used to verify request signatures
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: PUBLIC_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; PUBLIC_KEY_SIZE];
        arr.copy_from_slice(bytes);
        Ok(PublicKey(arr))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    /// Convert to hex string for display
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Verify a signature against this public key
    pub fn verify(&self, message: &[u8], signature: &SignatureBytes) -> CryptoResult<()> {
        let verifying_key =
            VerifyingKey::from_bytes(&self.0).map_err(|_| CryptoError::InvalidPublicKey)?;

        let sig = Signature::from_bytes(&signature.0);

        verifying_key
            .verify(message, &sig)
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({}...)", &self.to_hex()[..16])
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A signature produced by a signer
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SignatureBytes(pub [u8; SIGNATURE_SIZE]);

// Arrays >32 don't auto-derive; base64 matches the rest of the wire format
impl serde::Serialize for SignatureBytes {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> serde::Deserialize<'de> for SignatureBytes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

impl SignatureBytes {
    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != SIGNATURE_SIZE {
            return Err(CryptoError::InvalidSignatureLength {
                expected: SIGNATURE_SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; SIGNATURE_SIZE];
        arr.copy_from_slice(bytes);
        Ok(SignatureBytes(arr))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }

    /// Encode as base64, the form used in request headers
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Decode from base64
    pub fn from_base64(s: &str) -> CryptoResult<Self> {
        let bytes = BASE64
            .decode(s)
            .map_err(|_| CryptoError::SignatureVerificationFailed)?;
        Self::from_bytes(&bytes)
    }
}

impl std::fmt::Debug for SignatureBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({}...)", &hex::encode(self.0)[..16])
    }
}

/// An Ed25519 keypair bound to a user
///
/// The secret key is automatically zeroized when dropped.
#[derive(ZeroizeOnDrop)]
pub struct Identity {
    #[zeroize(skip)]
    public_key: PublicKey,
    secret_key: [u8; SECRET_KEY_SIZE],
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(&signing_key)
    }

    /// Create from a seed (deterministic generation)
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::from_signing_key(&SigningKey::from_bytes(seed))
    }

    fn from_signing_key(signing_key: &SigningKey) -> Self {
        Identity {
            public_key: PublicKey(signing_key.verifying_key().to_bytes()),
            secret_key: signing_key.to_bytes(),
        }
    }

    /// Get the public key
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// The certificate bytes the server stores for this identity
    pub fn certificate(&self) -> Vec<u8> {
        self.public_key.0.to_vec()
    }

    /// Verify a signature (convenience method)
    pub fn verify(&self, message: &[u8], signature: &SignatureBytes) -> CryptoResult<()> {
        self.public_key.verify(message, signature)
    }

    /// Export identity to bytes
    ///
    /// WARNING: This exposes the secret key. Handle with extreme care.
    pub fn to_bytes(&self) -> [u8; SECRET_KEY_SIZE + PUBLIC_KEY_SIZE] {
        let mut bytes = [0u8; SECRET_KEY_SIZE + PUBLIC_KEY_SIZE];
        bytes[..SECRET_KEY_SIZE].copy_from_slice(&self.secret_key);
        bytes[SECRET_KEY_SIZE..].copy_from_slice(&self.public_key.0);
        bytes
    }

    /// Import identity from bytes
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != SECRET_KEY_SIZE + PUBLIC_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: SECRET_KEY_SIZE + PUBLIC_KEY_SIZE,
                actual: bytes.len(),
            });
        }

        let mut secret_key = [0u8; SECRET_KEY_SIZE];
        secret_key.copy_from_slice(&bytes[..SECRET_KEY_SIZE]);

        let public_key = PublicKey::from_bytes(&bytes[SECRET_KEY_SIZE..])?;

        let derived_public = SigningKey::from_bytes(&secret_key).verifying_key().to_bytes();
        if derived_public != public_key.0 {
            secret_key.zeroize();
            return Err(CryptoError::InvalidSecretKey);
        }

        Ok(Identity {
            public_key,
            secret_key,
        })
    }
}

impl Signer for Identity {
    fn sign(&self, payload: &[u8]) -> CryptoResult<SignatureBytes> {
        let signing_key = SigningKey::from_bytes(&self.secret_key);
        Ok(SignatureBytes(signing_key.sign(payload).to_bytes()))
    }
}

impl Clone for Identity {
    fn clone(&self) -> Self {
        Identity {
            public_key: self.public_key,
            secret_key: self.secret_key,
        }
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_generation() {
        let seed = [42u8; 32];
        let id1 = Identity::from_seed(&seed);
        let id2 = Identity::from_seed(&seed);

        assert_eq!(id1.public_key(), id2.public_key());
    }

    #[test]
    fn test_signature_is_deterministic() {
        let id = Identity::from_seed(&[7u8; 32]);
        let payload = br#"{"user_id":"admin"}"#;

        assert_eq!(id.sign(payload).unwrap(), id.sign(payload).unwrap());
    }

    #[test]
    fn test_sign_verify() {
        let id = Identity::generate();
        let payload = b"create testDB";

        let signature = id.sign(payload).unwrap();
        assert!(id.verify(payload, &signature).is_ok());
        assert!(id.verify(b"delete testDB", &signature).is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let id1 = Identity::generate();
        let id2 = Identity::generate();

        let signature = id1.sign(b"payload").unwrap();
        assert_eq!(
            id2.verify(b"payload", &signature),
            Err(CryptoError::SignatureVerificationFailed)
        );
    }

    #[test]
    fn test_export_import() {
        let id = Identity::generate();
        let signature = id.sign(b"Test message").unwrap();

        let restored = Identity::from_bytes(&id.to_bytes()).unwrap();

        assert_eq!(id.public_key(), restored.public_key());
        assert!(restored.verify(b"Test message", &signature).is_ok());
    }

    #[test]
    fn test_import_rejects_mismatched_public_key() {
        let id = Identity::generate();
        let other = Identity::generate();

        let mut bytes = id.to_bytes();
        bytes[SECRET_KEY_SIZE..].copy_from_slice(other.public_key().as_bytes());

        assert_eq!(
            Identity::from_bytes(&bytes).unwrap_err(),
            CryptoError::InvalidSecretKey
        );
    }

    #[test]
    fn test_signature_serde_uses_base64() {
        let id = Identity::generate();
        let signature = id.sign(b"payload").unwrap();

        let json = serde_json::to_string(&signature).unwrap();
        assert_eq!(json, format!("\"{}\"", signature.to_base64()));

        let parsed: SignatureBytes = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, signature);
    }

    #[test]
    fn test_certificate_is_public_key() {
        let id = Identity::generate();
        let key = PublicKey::from_bytes(&id.certificate()).unwrap();
        assert_eq!(&key, id.public_key());
    }
}
