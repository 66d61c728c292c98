//! Ed25519 signing, X25519 key agreement, and multibase key encoding.
//!
//! DID documents carry two multibase-encoded, multicodec-prefixed public
//! keys: an Ed25519 verification key and an X25519 key-agreement key. This
//! module wraps `ed25519-dalek`/`x25519-dalek` with the codec plumbing the
//! wire format needs.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::SigningError;

/// Multicodec prefix for an Ed25519 public key (`0xed01`).
const MULTICODEC_ED25519_PUB: [u8; 2] = [0xed, 0x01];
/// Multicodec prefix for an X25519 public key (`0xec01`).
const MULTICODEC_X25519_PUB: [u8; 2] = [0xec, 0x01];

/// An Ed25519 signing keypair held off-server by an agent.
pub struct Ed25519Keypair {
    signing_key: SigningKey,
}

impl Ed25519Keypair {
    /// Generates a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Reconstructs a keypair from its 32-byte secret scalar.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Signs `message` (intended to be the UTF-8 canonical JSON of an
    /// envelope with its `signature` field removed).
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Multibase (base58btc) encoding of this key's multicodec-prefixed
    /// public key, suitable for storage in a DID document.
    pub fn public_key_multibase(&self) -> String {
        encode_multibase_key(&self.public_key_bytes(), MULTICODEC_ED25519_PUB)
    }
}

/// Verifies `signature` over `message` using the 32-byte raw public key.
pub fn verify(message: &[u8], signature: &[u8], public_key: &[u8]) -> Result<(), SigningError> {
    if public_key.len() != 32 {
        return Err(SigningError::InvalidKeyLength(public_key.len()));
    }
    if signature.len() != 64 {
        return Err(SigningError::MalformedSignature);
    }
    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(public_key);
    let verifying_key =
        VerifyingKey::from_bytes(&key_bytes).map_err(|_| SigningError::MalformedSignature)?;
    let mut sig_bytes = [0u8; 64];
    sig_bytes.copy_from_slice(signature);
    let signature = Signature::from_bytes(&sig_bytes);
    verifying_key
        .verify(message, &signature)
        .map_err(|_| SigningError::VerificationFailed)
}

/// An X25519 static key-agreement keypair.
pub struct X25519Keypair {
    secret: x25519_dalek::StaticSecret,
}

impl X25519Keypair {
    pub fn generate() -> Self {
        Self {
            secret: x25519_dalek::StaticSecret::random_from_rng(OsRng),
        }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        x25519_dalek::PublicKey::from(&self.secret).to_bytes()
    }

    pub fn public_key_multibase(&self) -> String {
        encode_multibase_key(&self.public_key_bytes(), MULTICODEC_X25519_PUB)
    }
}

fn encode_multibase_key(raw: &[u8; 32], multicodec_prefix: [u8; 2]) -> String {
    let mut prefixed = Vec::with_capacity(2 + raw.len());
    prefixed.extend_from_slice(&multicodec_prefix);
    prefixed.extend_from_slice(raw);
    multibase::encode(multibase::Base::Base58Btc, prefixed)
}

/// Decodes a multibase-encoded, multicodec-prefixed public key and strips
/// the two-byte multicodec prefix, returning the raw 32-byte key.
pub fn decode_multibase_key(
    encoded: &str,
    expected_prefix: [u8; 2],
) -> Result<[u8; 32], SigningError> {
    let (_, bytes) = multibase::decode(encoded).map_err(SigningError::Multibase)?;
    if bytes.len() != 34 {
        return Err(SigningError::InvalidKeyLength(bytes.len()));
    }
    if bytes[0] != expected_prefix[0] || bytes[1] != expected_prefix[1] {
        return Err(SigningError::UnsupportedMulticodec(bytes[0], bytes[1]));
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes[2..]);
    Ok(key)
}

/// Decodes an Ed25519 verification key from its DID-document multibase form.
pub fn decode_ed25519_public_key(encoded: &str) -> Result<[u8; 32], SigningError> {
    decode_multibase_key(encoded, MULTICODEC_ED25519_PUB)
}

/// Decodes an X25519 key-agreement key from its DID-document multibase form.
pub fn decode_x25519_public_key(encoded: &str) -> Result<[u8; 32], SigningError> {
    decode_multibase_key(encoded, MULTICODEC_X25519_PUB)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_round_trip() {
        let kp = Ed25519Keypair::generate();
        let msg = b"canonical envelope bytes";
        let sig = kp.sign(msg);
        verify(msg, &sig, &kp.public_key_bytes()).unwrap();
    }

    #[test]
    fn verify_rejects_unrelated_key() {
        let kp = Ed25519Keypair::generate();
        let other = Ed25519Keypair::generate();
        let msg = b"canonical envelope bytes";
        let sig = kp.sign(msg);
        assert!(verify(msg, &sig, &other.public_key_bytes()).is_err());
    }

    #[test]
    fn multibase_key_round_trips() {
        let kp = Ed25519Keypair::generate();
        let encoded = kp.public_key_multibase();
        let decoded = decode_ed25519_public_key(&encoded).unwrap();
        assert_eq!(decoded, kp.public_key_bytes());
    }

    #[test]
    fn rejects_wrong_multicodec() {
        let kp = X25519Keypair::generate();
        let encoded = kp.public_key_multibase();
        assert!(decode_ed25519_public_key(&encoded).is_err());
    }
}
