//! Opaque token generation and digesting.
//!
//! Refresh and reset tokens are 256-bit random values handed to the client;
//! only their SHA-256 digest is ever persisted, and lookups are by digest
//! equality.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// Number of random bytes in an opaque token.
pub const OPAQUE_TOKEN_BYTES: usize = 32;

/// Generates a URL-safe opaque token from the operating system CSPRNG.
pub fn generate_opaque_token() -> String {
    let mut bytes = [0u8; OPAQUE_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Deterministic hex SHA-256 digest of an opaque token.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
