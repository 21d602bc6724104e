//! Slow, salted, one-way password hashing.
//!
//! bcrypt work runs on the blocking pool so a login burst cannot starve the
//! async workers. Unknown-user logins are verified against a precomputed
//! dummy digest so both failure paths cost one full bcrypt comparison.

use crate::errors::{AuthError, AuthResult};
use bcrypt::{hash, verify};
use tokio::task;

/// Password hasher with a fixed bcrypt cost.
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    cost: u32,
    dummy_hash: String,
}

impl PasswordHasher {
    pub fn new(cost: u32) -> AuthResult<Self> {
        let dummy_hash = hash("timing-equalizer-not-a-password", cost)
            .map_err(|e| AuthError::internal_error(format!("Password hashing failed: {e}")))?;
        Ok(Self { cost, dummy_hash })
    }

    /// Hashes `plaintext` with a fresh salt.
    pub async fn hash(&self, plaintext: &str) -> AuthResult<String> {
        let plaintext = plaintext.to_owned();
        let cost = self.cost;
        task::spawn_blocking(move || hash(plaintext, cost))
            .await
            .map_err(|e| AuthError::internal_error(format!("hash task failed: {e}")))?
            .map_err(|e| AuthError::internal_error(format!("Password hashing failed: {e}")))
    }

    /// Verifies `plaintext` against a stored digest.
    pub async fn verify(&self, digest: &str, plaintext: &str) -> AuthResult<bool> {
        let plaintext = plaintext.to_owned();
        let digest = digest.to_owned();
        task::spawn_blocking(move || verify(plaintext, &digest))
            .await
            .map_err(|e| AuthError::internal_error(format!("verify task failed: {e}")))?
            .map_err(|e| AuthError::internal_error(format!("Password verification failed: {e}")))
    }

    /// Burns one comparison against the dummy digest; always `false`.
    pub async fn verify_dummy(&self, plaintext: &str) -> AuthResult<bool> {
        self.verify(&self.dummy_hash.clone(), plaintext).await?;
        Ok(false)
    }
}
