//! Schnorr signing keys and the sign/verify/hash capability used by the codec
//! and both authenticators.
//!
//! All curve operations go through `bitcoin::secp256k1`; hashing goes through
//! `sha2`. Nothing else in the crate touches the primitives directly.

use bitcoin::secp256k1::{Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey, schnorr};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Errors produced while parsing keys or checking signatures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("invalid hex: {0}")]
    InvalidHex(String),
}

/// A secp256k1 keypair used to sign events.
///
/// The public half is the x-only key that appears as `pubkey` on events.
#[derive(Clone)]
pub struct Keys {
    keypair: Keypair,
    public_key: XOnlyPublicKey,
}

impl Keys {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let secp = Secp256k1::signing_only();
        loop {
            let mut bytes = [0u8; 32];
            rand::rng().fill_bytes(&mut bytes);
            // Out-of-range scalars are astronomically rare; draw again.
            if let Ok(secret) = SecretKey::from_slice(&bytes) {
                let keypair = Keypair::from_secret_key(&secp, &secret);
                let (public_key, _parity) = keypair.x_only_public_key();
                return Self {
                    keypair,
                    public_key,
                };
            }
        }
    }

    /// Build keys from raw secret key bytes.
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Result<Self, KeyError> {
        let secp = Secp256k1::signing_only();
        let secret =
            SecretKey::from_slice(secret).map_err(|e| KeyError::InvalidSecretKey(e.to_string()))?;
        let keypair = Keypair::from_secret_key(&secp, &secret);
        let (public_key, _parity) = keypair.x_only_public_key();
        Ok(Self {
            keypair,
            public_key,
        })
    }

    /// Parse keys from a 64-character hex secret key.
    pub fn parse(secret_hex: &str) -> Result<Self, KeyError> {
        let bytes = decode_fixed::<32>(secret_hex)?;
        Self::from_secret_bytes(&bytes)
    }

    /// Lowercase hex x-only public key.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.keypair.secret_bytes()
    }

    /// Sign a 32-byte digest, returning the 64-byte Schnorr signature as hex.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> String {
        let secp = Secp256k1::signing_only();
        let message = Message::from_digest(*digest);
        let sig = secp.sign_schnorr_no_aux_rand(&message, &self.keypair);
        hex::encode(sig.serialize())
    }
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keys")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

/// SHA-256 of arbitrary bytes.
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Verify a hex Schnorr signature over a digest against a hex x-only pubkey.
///
/// Malformed inputs are errors; a well-formed signature that does not verify
/// is `Ok(false)`.
pub fn verify_digest(digest: &[u8; 32], sig_hex: &str, pubkey_hex: &str) -> Result<bool, KeyError> {
    let sig_bytes = decode_fixed::<64>(sig_hex)?;
    let sig = schnorr::Signature::from_slice(&sig_bytes)
        .map_err(|e| KeyError::InvalidSignature(e.to_string()))?;

    let pubkey_bytes = decode_fixed::<32>(pubkey_hex)?;
    let pubkey = XOnlyPublicKey::from_slice(&pubkey_bytes)
        .map_err(|e| KeyError::InvalidPublicKey(e.to_string()))?;

    let secp = Secp256k1::verification_only();
    let message = Message::from_digest(*digest);
    Ok(secp.verify_schnorr(&sig, &message, &pubkey).is_ok())
}

/// Decode a hex string that must be exactly `N` bytes long.
pub(crate) fn decode_fixed<const N: usize>(value: &str) -> Result<[u8; N], KeyError> {
    let bytes = hex::decode(value).map_err(|e| KeyError::InvalidHex(e.to_string()))?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        KeyError::InvalidHex(format!("expected {} bytes, got {}", N, bytes.len()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SECRET: &str = "d217c1ff2f8a65c3e3a1740db3b9f58b8c848bb45e26d00ed4714e4a0f4ceecf";

    #[test]
    fn test_generate_produces_distinct_keys() {
        let a = Keys::generate();
        let b = Keys::generate();
        assert_ne!(a.public_key_hex(), b.public_key_hex());
        assert_eq!(a.public_key_hex().len(), 64);
    }

    #[test]
    fn test_parse_is_deterministic() {
        let a = Keys::parse(TEST_SECRET).unwrap();
        let b = Keys::parse(TEST_SECRET).unwrap();
        assert_eq!(a.public_key_hex(), b.public_key_hex());
        assert_eq!(hex::encode(a.secret_key_bytes()), TEST_SECRET);
    }

    #[test]
    fn test_parse_rejects_bad_hex() {
        assert!(matches!(Keys::parse("zz"), Err(KeyError::InvalidHex(_))));
        assert!(matches!(Keys::parse("abcd"), Err(KeyError::InvalidHex(_))));
        assert!(matches!(
            Keys::parse(&"00".repeat(32)),
            Err(KeyError::InvalidSecretKey(_))
        ));
    }

    #[test]
    fn test_sign_and_verify_digest() {
        let keys = Keys::parse(TEST_SECRET).unwrap();
        let digest = sha256(b"hello");
        let sig = keys.sign_digest(&digest);
        assert_eq!(sig.len(), 128);
        assert!(verify_digest(&digest, &sig, &keys.public_key_hex()).unwrap());

        let other = sha256(b"hello!");
        assert!(!verify_digest(&other, &sig, &keys.public_key_hex()).unwrap());
    }

    #[test]
    fn test_verify_with_wrong_key_is_false() {
        let keys = Keys::parse(TEST_SECRET).unwrap();
        let other = Keys::generate();
        let digest = sha256(b"payload");
        let sig = keys.sign_digest(&digest);
        assert!(!verify_digest(&digest, &sig, &other.public_key_hex()).unwrap());
    }

    #[test]
    fn test_debug_hides_secret() {
        let keys = Keys::parse(TEST_SECRET).unwrap();
        let rendered = format!("{:?}", keys);
        assert!(!rendered.contains(TEST_SECRET));
        assert!(rendered.contains(&keys.public_key_hex()));
    }
}
