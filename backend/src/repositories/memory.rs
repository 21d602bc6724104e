//! In-memory store variants.
//!
//! Each store guards its maps with a single mutex, so the conditional updates
//! (`rotate`, `revoke`, `consume_reset_token`) are atomic with respect to each
//! other exactly like their SQL counterparts.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{AuditStore, CredentialStore, TokenStore};
use crate::database::models::{AuditEntry, NewUser, PasswordResetToken, RefreshToken, User};

fn locked<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| anyhow!("store lock poisoned"))
}

#[derive(Default)]
struct CredentialState {
    users: HashMap<Uuid, User>,
    otp_secrets: HashMap<Uuid, String>,
    resets: HashMap<String, PasswordResetToken>,
}

#[derive(Default)]
pub struct InMemoryCredentialStore {
    state: Mutex<CredentialState>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_user(&self, user: NewUser) -> Result<User> {
        let mut state = locked(&self.state)?;
        if state
            .users
            .values()
            .any(|u| u.username == user.username || u.email == user.email)
        {
            return Err(anyhow!("user {} already exists", user.username));
        }
        let created = User {
            id: Uuid::now_v7(),
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            is_active: true,
            otp_enabled: false,
            password_reset_required: user.password_reset_required,
        };
        state.users.insert(created.id, created.clone());
        Ok(created)
    }

    pub fn set_active(&self, user_id: Uuid, active: bool) -> Result<bool> {
        let mut state = locked(&self.state)?;
        Ok(state
            .users
            .get_mut(&user_id)
            .map(|u| u.is_active = active)
            .is_some())
    }

    fn find(&self, pred: impl Fn(&User) -> bool) -> Result<Option<User>> {
        let state = locked(&self.state)?;
        Ok(state.users.values().find(|u| pred(u)).cloned())
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn create_user(&self, user: NewUser) -> Result<User> {
        InMemoryCredentialStore::create_user(self, user)
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        self.find(|u| u.username == username)
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        self.find(|u| u.email == email)
    }

    async fn get_by_login(&self, identifier: &str) -> Result<Option<User>> {
        self.find(|u| u.username == identifier || u.email == identifier)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(locked(&self.state)?.users.get(&id).cloned())
    }

    async fn set_active(&self, user_id: Uuid, active: bool) -> Result<bool> {
        InMemoryCredentialStore::set_active(self, user_id, active)
    }

    async fn get_otp_secret(&self, user_id: Uuid) -> Result<Option<String>> {
        Ok(locked(&self.state)?.otp_secrets.get(&user_id).cloned())
    }

    async fn set_otp_secret(&self, user_id: Uuid, secret: &str) -> Result<bool> {
        let mut state = locked(&self.state)?;
        let Some(user) = state.users.get_mut(&user_id) else {
            return Ok(false);
        };
        user.otp_enabled = true;
        state.otp_secrets.insert(user_id, secret.to_string());
        Ok(true)
    }

    async fn update_password(&self, user_id: Uuid, password_hash: &str) -> Result<bool> {
        let mut state = locked(&self.state)?;
        Ok(match state.users.get_mut(&user_id) {
            Some(user) => {
                user.password_hash = password_hash.to_string();
                user.password_reset_required = false;
                true
            }
            None => false,
        })
    }

    async fn store_reset_token(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = locked(&self.state)?;
        if state.resets.contains_key(token_hash) {
            return Err(anyhow!("duplicate reset token hash"));
        }
        state.resets.insert(
            token_hash.to_string(),
            PasswordResetToken {
                user_id,
                token_hash: token_hash.to_string(),
                expires_at,
                used: false,
            },
        );
        Ok(())
    }

    async fn validate_reset_token(&self, token_hash: &str) -> Result<Option<Uuid>> {
        let now = Utc::now();
        Ok(locked(&self.state)?
            .resets
            .get(token_hash)
            .filter(|r| r.is_redeemable_at(now))
            .map(|r| r.user_id))
    }

    async fn consume_reset_token(&self, token_hash: &str) -> Result<Option<Uuid>> {
        let now = Utc::now();
        let mut state = locked(&self.state)?;
        match state.resets.get_mut(token_hash) {
            Some(record) if record.is_redeemable_at(now) => {
                record.used = true;
                Ok(Some(record.user_id))
            }
            _ => Ok(None),
        }
    }
}

#[derive(Default)]
pub struct InMemoryTokenStore {
    tokens: Mutex<Vec<RefreshToken>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(
        tokens: &mut Vec<RefreshToken>,
        user_id: Uuid,
        hash: &str,
        exp: DateTime<Utc>,
    ) -> Result<RefreshToken> {
        if tokens.iter().any(|t| t.token_hash == hash && !t.revoked) {
            return Err(anyhow!("live refresh token with this hash already exists"));
        }
        let token = RefreshToken {
            id: Uuid::now_v7(),
            user_id,
            token_hash: hash.to_string(),
            expires_at: exp,
            revoked: false,
        };
        tokens.push(token.clone());
        Ok(token)
    }

    /// Number of live tokens held for `user_id`.
    #[cfg(test)]
    pub fn live_count(&self, user_id: Uuid) -> usize {
        let now = Utc::now();
        self.tokens
            .lock()
            .map(|tokens| {
                tokens
                    .iter()
                    .filter(|t| t.user_id == user_id && t.is_valid_at(now))
                    .count()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn store(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshToken> {
        let mut tokens = locked(&self.tokens)?;
        Self::insert(&mut tokens, user_id, token_hash, expires_at)
    }

    async fn get_valid(&self, token_hash: &str) -> Result<Option<RefreshToken>> {
        let now = Utc::now();
        Ok(locked(&self.tokens)?
            .iter()
            .find(|t| t.token_hash == token_hash && t.is_valid_at(now))
            .cloned())
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>> {
        Ok(locked(&self.tokens)?
            .iter()
            .rev()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn revoke(&self, token_id: Uuid) -> Result<bool> {
        let mut tokens = locked(&self.tokens)?;
        Ok(match tokens.iter_mut().find(|t| t.id == token_id) {
            Some(token) if !token.revoked => {
                token.revoked = true;
                true
            }
            _ => false,
        })
    }

    async fn revoke_all(&self, user_id: Uuid) -> Result<u64> {
        let mut tokens = locked(&self.tokens)?;
        let mut flipped = 0;
        for token in tokens.iter_mut().filter(|t| t.user_id == user_id && !t.revoked) {
            token.revoked = true;
            flipped += 1;
        }
        Ok(flipped)
    }

    async fn rotate(
        &self,
        token_id: Uuid,
        new_hash: &str,
        new_expires_at: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>> {
        let now = Utc::now();
        let mut tokens = locked(&self.tokens)?;
        let Some(parent) = tokens
            .iter_mut()
            .find(|t| t.id == token_id && t.is_valid_at(now))
        else {
            return Ok(None);
        };
        parent.revoked = true;
        let user_id = parent.user_id;
        Self::insert(&mut tokens, user_id, new_hash, new_expires_at).map(Some)
    }
}

/// Audit trail kept in insertion order.
#[derive(Default)]
pub struct InMemoryAuditStore {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn record(&self, entry: &AuditEntry) -> Result<()> {
        locked(&self.entries)?.push(entry.clone());
        Ok(())
    }

    async fn recent_for_user(&self, user_id: Uuid, limit: u32) -> Result<Vec<AuditEntry>> {
        Ok(locked(&self.entries)?
            .iter()
            .rev()
            .filter(|e| e.user_id == Some(user_id))
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
