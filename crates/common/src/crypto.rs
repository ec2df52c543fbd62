//! WireGuard key material
//!
//! Keys are Curve25519 points encoded as standard base64, 44 characters.

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::{Error, Result};

/// WireGuard key pair
#[derive(Clone)]
pub struct WgKeyPair {
    pub private_key: String, // Base64
    pub public_key: String,  // Base64
}

impl std::fmt::Debug for WgKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgKeyPair")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Generate a WireGuard keypair using x25519
pub fn generate_wireguard_keypair() -> WgKeyPair {
    let mut private_key_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut private_key_bytes);

    // WireGuard key clamping
    private_key_bytes[0] &= 248;
    private_key_bytes[31] &= 127;
    private_key_bytes[31] |= 64;

    let secret = StaticSecret::from(private_key_bytes);
    let public = PublicKey::from(&secret);

    WgKeyPair {
        private_key: STANDARD.encode(private_key_bytes),
        public_key: STANDARD.encode(public.as_bytes()),
    }
}

/// Decode a base64 key, requiring exactly 32 bytes
pub fn decode_key(key: &str) -> Result<[u8; 32]> {
    let raw = STANDARD
        .decode(key.trim())
        .map_err(|e| Error::InvalidParameter(format!("key is not base64: {}", e)))?;
    raw.try_into().map_err(|raw: Vec<u8>| {
        Error::InvalidParameter(format!("key must be 32 bytes, got {}", raw.len()))
    })
}

/// True when `key` is a well-formed, non-zero WireGuard key
pub fn is_valid_key(key: &str) -> bool {
    matches!(decode_key(key), Ok(bytes) if bytes != [0u8; 32])
}
