//! Storage capabilities consumed by the session manager.
//!
//! The session manager depends only on [`CredentialStore`] and [`TokenStore`];
//! each has a SQLite variant for the running service and an in-memory variant
//! used by tests and local tooling. Every read-then-write transition is a
//! single conditional update inside the store so concurrent requests cannot
//! both win.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::database::models::{AuditEntry, NewUser, RefreshToken, User};

pub mod audit_repository;
pub mod memory;
pub mod token_repository;
pub mod user_repository;

pub use audit_repository::SqliteAuditStore;
pub use memory::{InMemoryAuditStore, InMemoryCredentialStore, InMemoryTokenStore};
pub use token_repository::SqliteTokenStore;
pub use user_repository::SqliteCredentialStore;

/// Durable lookup and mutation of users and password-reset records.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Inserts a provisioned user; fails if the username or email is taken.
    async fn create_user(&self, user: NewUser) -> Result<User>;

    async fn get_by_username(&self, username: &str) -> Result<Option<User>>;

    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Single lookup matching `identifier` against username or email.
    async fn get_by_login(&self, identifier: &str) -> Result<Option<User>>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Soft enable/disable toggle; `false` when the user does not exist.
    async fn set_active(&self, user_id: Uuid, active: bool) -> Result<bool>;

    /// Plaintext OTP secret, `None` when the user has not enrolled.
    async fn get_otp_secret(&self, user_id: Uuid) -> Result<Option<String>>;

    async fn set_otp_secret(&self, user_id: Uuid, secret: &str) -> Result<bool>;

    /// Replaces the password hash and clears `password_reset_required`.
    async fn update_password(&self, user_id: Uuid, password_hash: &str) -> Result<bool>;

    async fn store_reset_token(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Owner of a still-redeemable reset record, without consuming it.
    async fn validate_reset_token(&self, token_hash: &str) -> Result<Option<Uuid>>;

    /// Marks a redeemable reset record used and returns its owner. At most one
    /// caller ever receives `Some` for a given hash.
    async fn consume_reset_token(&self, token_hash: &str) -> Result<Option<Uuid>>;
}

/// Durable lookup and mutation of refresh-token records.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn store(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshToken>;

    /// Unrevoked, unexpired record for `token_hash`.
    async fn get_valid(&self, token_hash: &str) -> Result<Option<RefreshToken>>;

    /// Most recent record for `token_hash` regardless of state.
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>>;

    /// Revokes one record; `true` only for the call that flipped it.
    async fn revoke(&self, token_id: Uuid) -> Result<bool>;

    /// Revokes every live record of `user_id`, returning how many flipped.
    async fn revoke_all(&self, user_id: Uuid) -> Result<u64>;

    /// Atomically revokes `token_id` (if still valid) and inserts its
    /// replacement for the same owner. `None` means the parent was no longer
    /// valid and nothing was written.
    async fn rotate(
        &self,
        token_id: Uuid,
        new_hash: &str,
        new_expires_at: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>>;
}

/// Append-only audit trail.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> Result<()>;

    /// Latest entries for `user_id`, newest first.
    async fn recent_for_user(&self, user_id: Uuid, limit: u32) -> Result<Vec<AuditEntry>>;
}
