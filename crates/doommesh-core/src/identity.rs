//! Player identity: ed25519 keys and their hex-encoded public address.
//!
//! An `Address` is what the ledger stores in a roster slot. Envelopes are
//! verified against the roster-resolved address, never against anything the
//! sender claims about itself.

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// Ed25519 signature length in bytes.
pub const SIGNATURE_LEN: usize = 64;

/// Hex-encoded ed25519 public key (lowercase, 64 chars).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Wrap a string without validation. Verification fails closed later if
    /// the string is not a valid key.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn verifying_key(&self) -> Result<VerifyingKey> {
        let mut raw = [0u8; 32];
        hex::decode_to_slice(&self.0, &mut raw)
            .map_err(|e| RelayError::BadRequest(format!("address is not 32-byte hex: {e}")))?;
        VerifyingKey::from_bytes(&raw)
            .map_err(|e| RelayError::BadRequest(format!("address is not an ed25519 key: {e}")))
    }

    /// Verify `signature` over `msg`. Malformed keys or signatures yield `false`.
    pub fn verify(&self, msg: &[u8], signature: &[u8; SIGNATURE_LEN]) -> bool {
        let Ok(key) = self.verifying_key() else {
            return false;
        };
        let sig = Signature::from_bytes(signature);
        key.verify(msg, &sig).is_ok()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address::new(s)
    }
}

/// Local signing identity of a relay instance.
#[derive(Clone)]
pub struct Identity {
    key: SigningKey,
    address: Address,
}

impl Identity {
    pub fn from_secret_bytes(secret: [u8; 32]) -> Self {
        let key = SigningKey::from_bytes(&secret);
        let address = Address::new(hex::encode(key.verifying_key().as_bytes()));
        Self { key, address }
    }

    /// Parse a 32-byte secret seed from hex.
    pub fn from_secret_hex(s: &str) -> Result<Self> {
        let mut raw = [0u8; 32];
        hex::decode_to_slice(s.trim(), &mut raw)
            .map_err(|e| RelayError::BadRequest(format!("identity secret must be 32-byte hex: {e}")))?;
        Ok(Self::from_secret_bytes(raw))
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn sign(&self, msg: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.key.sign(msg).to_bytes()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity").field("address", &self.address).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn sign_and_verify_against_own_address() {
        let id = Identity::from_secret_bytes([7u8; 32]);
        let sig = id.sign(b"hello");
        assert!(id.address().verify(b"hello", &sig));
        assert!(!id.address().verify(b"hellp", &sig));
    }

    #[test]
    fn other_key_does_not_verify() {
        let a = Identity::from_secret_bytes([1u8; 32]);
        let b = Identity::from_secret_bytes([2u8; 32]);
        let sig = a.sign(b"frame");
        assert!(!b.address().verify(b"frame", &sig));
    }

    #[test]
    fn garbage_address_fails_closed() {
        let sig = [0u8; SIGNATURE_LEN];
        assert!(!Address::new("not-hex").verify(b"x", &sig));
        assert!(!Address::new("").verify(b"x", &sig));
    }

    #[test]
    fn secret_hex_roundtrips_to_same_address() {
        let a = Identity::from_secret_bytes([9u8; 32]);
        let b = Identity::from_secret_hex(&hex::encode([9u8; 32])).unwrap();
        assert_eq!(a.address(), b.address());
        assert!(Identity::from_secret_hex("abcd").is_err());
    }
}
