//! Time-based one-time passwords (RFC 6238, HMAC-SHA1).
//!
//! Verification is stateless: a code stays acceptable for every step inside
//! the skew window, so the same code can verify more than once within that
//! window. Callers that need single use must track consumed steps themselves.

use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha1::Sha1;
use std::time::{SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;

const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

#[derive(Debug, Clone)]
pub struct TotpConfig {
    /// Number of digits in a code.
    pub digits: u32,
    /// Step length in seconds.
    pub period: u64,
    /// Steps accepted on either side of the current one.
    pub skew: u64,
}

impl Default for TotpConfig {
    fn default() -> Self {
        Self {
            digits: 6,
            period: 30,
            skew: 1,
        }
    }
}

/// Generates a fresh 160-bit secret, base32 encoded without padding.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 20];
    OsRng.fill_bytes(&mut bytes);
    base32_encode(&bytes)
}

fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(5) * 8);
    let mut buffer: u64 = 0;
    let mut bits = 0;

    for &byte in data {
        buffer = (buffer << 8) | u64::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1F) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1F) as usize] as char);
    }
    out
}

fn base32_decode(encoded: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(encoded.len() * 5 / 8);
    let mut buffer: u64 = 0;
    let mut bits = 0;

    for c in encoded.chars().filter(|c| *c != '=' && !c.is_whitespace()) {
        let upper = c.to_ascii_uppercase() as u8;
        let value = BASE32_ALPHABET.iter().position(|&a| a == upper)? as u64;
        buffer = (buffer << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
        }
    }
    if out.is_empty() { None } else { Some(out) }
}

/// Code for the step containing `unix_time`. `None` if the secret is not base32.
pub fn generate_code(secret: &str, unix_time: u64, config: &TotpConfig) -> Option<String> {
    let key = base32_decode(secret)?;
    let counter = unix_time / config.period;

    let mut mac = Hmac::<Sha1>::new_from_slice(&key).ok()?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0F) as usize;
    let binary = (u32::from(digest[offset]) & 0x7F) << 24
        | u32::from(digest[offset + 1]) << 16
        | u32::from(digest[offset + 2]) << 8
        | u32::from(digest[offset + 3]);

    let code = binary % 10u32.pow(config.digits);
    Some(format!("{:0>width$}", code, width = config.digits as usize))
}

/// Verifies `code` at an explicit instant.
pub fn verify_at(secret: &str, code: &str, unix_time: u64, config: &TotpConfig) -> bool {
    let code = code.trim();
    if code.len() != config.digits as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }

    let mut matched = false;
    let current = unix_time / config.period;
    let first = current.saturating_sub(config.skew);
    for step in first..=current + config.skew {
        let Some(expected) = generate_code(secret, step * config.period, config) else {
            return false;
        };
        // no early exit: every step in the window is compared
        matched |= bool::from(expected.as_bytes().ct_eq(code.as_bytes()));
    }
    matched
}

/// Verifies `code` against the current wall-clock step.
pub fn verify(secret: &str, code: &str, config: &TotpConfig) -> bool {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    verify_at(secret, code, now, config)
}

/// `otpauth://` URI for authenticator apps.
pub fn provisioning_uri(secret: &str, account: &str, issuer: &str, config: &TotpConfig) -> String {
    format!(
        "otpauth://totp/{}:{}?secret={}&issuer={}&algorithm=SHA1&digits={}&period={}",
        urlencoding::encode(issuer),
        urlencoding::encode(account),
        secret,
        urlencoding::encode(issuer),
        config.digits,
        config.period
    )
}
