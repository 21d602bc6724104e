//! SQLite credential store.
//!
//! Provides user lookups, password updates, sealed OTP secrets and the
//! password-reset records.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::CredentialStore;
use crate::database::models::{NewUser, User};
use crate::utils::crypto::SecretSealer;

/// Repository for user database operations.
pub struct SqliteCredentialStore {
    /// Shared SQLite connection pool
    pool: SqlitePool,
    /// Seals OTP secrets before they reach the table
    sealer: SecretSealer,
}

impl SqliteCredentialStore {
    /// Creates a new store over `pool`.
    ///
    /// # Arguments
    /// * `pool` - SQLite connection pool
    /// * `sealer` - AES-GCM sealer for OTP secrets
    pub fn new(pool: SqlitePool, sealer: SecretSealer) -> Self {
        Self { pool, sealer }
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn create_user(&self, user: NewUser) -> Result<User> {
        let id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, role, is_active, password_reset_required)
            VALUES (?, ?, ?, ?, ?, 1, ?)
            "#,
        )
        .bind(id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role)
        .bind(user.password_reset_required)
        .execute(&self.pool)
        .await
        .context("failed to insert user")?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| anyhow!("user {id} vanished after insert"))
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, role, is_active,
                   otp_secret IS NOT NULL AS otp_enabled, password_reset_required
            FROM users
            WHERE username = ?
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, role, is_active,
                   otp_secret IS NOT NULL AS otp_enabled, password_reset_required
            FROM users
            WHERE email = ?
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_by_login(&self, identifier: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, role, is_active,
                   otp_secret IS NOT NULL AS otp_enabled, password_reset_required
            FROM users
            WHERE username = ?1 OR email = ?1
            "#,
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, role, is_active,
                   otp_secret IS NOT NULL AS otp_enabled, password_reset_required
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn set_active(&self, user_id: Uuid, active: bool) -> Result<bool> {
        let rows = sqlx::query(
            "UPDATE users SET is_active = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(active)
        .bind(user_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows > 0)
    }

    async fn get_otp_secret(&self, user_id: Uuid) -> Result<Option<String>> {
        let sealed: Option<Option<String>> =
            sqlx::query_scalar("SELECT otp_secret FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        match sealed.flatten() {
            Some(sealed) => {
                let secret = self
                    .sealer
                    .open(&sealed)
                    .with_context(|| format!("failed to open OTP secret of user {user_id}"))?;
                Ok(Some(secret))
            }
            None => Ok(None),
        }
    }

    async fn set_otp_secret(&self, user_id: Uuid, secret: &str) -> Result<bool> {
        let sealed = self.sealer.seal(secret)?;
        let rows = sqlx::query(
            "UPDATE users SET otp_secret = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(sealed)
        .bind(user_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows > 0)
    }

    async fn update_password(&self, user_id: Uuid, password_hash: &str) -> Result<bool> {
        let rows = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = ?,
                password_reset_required = 0,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(password_hash)
        .bind(user_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows > 0)
    }

    async fn store_reset_token(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO password_resets (id, user_id, token_hash, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(Uuid::now_v7())
        .bind(user_id)
        .bind(token_hash)
        .bind(expires_at.timestamp())
        .execute(&self.pool)
        .await
        .context("failed to store reset token")?;
        Ok(())
    }

    async fn validate_reset_token(&self, token_hash: &str) -> Result<Option<Uuid>> {
        let user_id = sqlx::query_scalar(
            "SELECT user_id FROM password_resets \
             WHERE token_hash = ? AND used_at IS NULL AND expires_at > ?",
        )
        .bind(token_hash)
        .bind(Utc::now().timestamp())
        .fetch_optional(&self.pool)
        .await?;
        Ok(user_id)
    }

    async fn consume_reset_token(&self, token_hash: &str) -> Result<Option<Uuid>> {
        let now = Utc::now().timestamp();
        let user_id = sqlx::query_scalar(
            r#"
            UPDATE password_resets
            SET used_at = ?
            WHERE token_hash = ? AND used_at IS NULL AND expires_at > ?
            RETURNING user_id
            "#,
        )
        .bind(now)
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::Role;
    use crate::database::test_pool;
    use crate::utils::crypto::generate_key;
    use chrono::Duration;

    async fn store() -> SqliteCredentialStore {
        let sealer = SecretSealer::from_base64_key(&generate_key()).unwrap();
        SqliteCredentialStore::new(test_pool().await, sealer)
    }

    fn new_user(name: &str, role: Role) -> NewUser {
        NewUser {
            username: name.to_string(),
            email: format!("{name}@example.com"),
            password_hash: "$2b$04$placeholder".to_string(),
            role,
            password_reset_required: false,
        }
    }

    #[tokio::test]
    async fn test_lookup_by_username_email_and_login() {
        let store = store().await;
        let created = store.create_user(new_user("ana", Role::Support)).await.unwrap();

        assert_eq!(created.role, Role::Support);
        assert!(created.is_active);
        assert!(!created.otp_enabled);

        let by_name = store.get_by_username("ana").await.unwrap().unwrap();
        let by_email = store.get_by_email("ana@example.com").await.unwrap().unwrap();
        let by_login_name = store.get_by_login("ana").await.unwrap().unwrap();
        let by_login_email = store.get_by_login("ana@example.com").await.unwrap().unwrap();
        for user in [by_name, by_email, by_login_name, by_login_email] {
            assert_eq!(user.id, created.id);
        }

        assert!(store.get_by_login("nobody").await.unwrap().is_none());
        assert!(store.get_by_username("ana@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_otp_secret_is_sealed_at_rest() {
        let store = store().await;
        let user = store.create_user(new_user("otp", Role::Customer)).await.unwrap();
        assert!(store.get_otp_secret(user.id).await.unwrap().is_none());

        assert!(store.set_otp_secret(user.id, "JBSWY3DPEHPK3PXP").await.unwrap());
        assert_eq!(
            store.get_otp_secret(user.id).await.unwrap().as_deref(),
            Some("JBSWY3DPEHPK3PXP")
        );

        let raw: String = sqlx::query_scalar("SELECT otp_secret FROM users WHERE id = ?")
            .bind(user.id)
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert!(!raw.contains("JBSWY3DPEHPK3PXP"));
        assert!(store.get_by_id(user.id).await.unwrap().unwrap().otp_enabled);
    }

    #[tokio::test]
    async fn test_reset_token_consumed_once() {
        let store = store().await;
        let user = store.create_user(new_user("reset", Role::Customer)).await.unwrap();
        store
            .store_reset_token(user.id, "digest", Utc::now() + Duration::minutes(15))
            .await
            .unwrap();

        assert_eq!(store.validate_reset_token("digest").await.unwrap(), Some(user.id));
        assert_eq!(store.consume_reset_token("digest").await.unwrap(), Some(user.id));
        assert_eq!(store.consume_reset_token("digest").await.unwrap(), None);
        assert_eq!(store.validate_reset_token("digest").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_reset_token_fails_closed() {
        let store = store().await;
        let user = store.create_user(new_user("late", Role::Customer)).await.unwrap();
        store
            .store_reset_token(user.id, "old", Utc::now() - Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(store.consume_reset_token("old").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_password_and_deactivate() {
        let store = store().await;
        let user = store.create_user(new_user("pw", Role::Admin)).await.unwrap();

        assert!(store.update_password(user.id, "new-hash").await.unwrap());
        assert!(store.set_active(user.id, false).await.unwrap());

        let reloaded = store.get_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(reloaded.password_hash, "new-hash");
        assert!(!reloaded.is_active);
        assert!(!store.update_password(Uuid::now_v7(), "x").await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_required_flag_is_stored_and_cleared() {
        let store = store().await;
        let mut provisioned = new_user("fresh", Role::Customer);
        provisioned.password_reset_required = true;
        let user = store.create_user(provisioned).await.unwrap();
        assert!(user.password_reset_required);

        let role: String = sqlx::query_scalar("SELECT role FROM users WHERE id = ?")
            .bind(user.id)
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(role, "customer");

        assert!(store.update_password(user.id, "chosen").await.unwrap());
        let reloaded = store.get_by_login("fresh@example.com").await.unwrap().unwrap();
        assert!(!reloaded.password_reset_required);
    }
}
