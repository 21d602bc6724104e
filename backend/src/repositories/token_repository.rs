//! SQLite refresh-token store.
//!
//! Records are never deleted; revocation flips `revoked` so a replayed token
//! can still be traced back to its owner.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::TokenStore;
use crate::database::models::RefreshToken;

/// Repository for refresh-token database operations.
pub struct SqliteTokenStore {
    /// Shared SQLite connection pool
    pool: SqlitePool,
}

impl SqliteTokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn store(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshToken> {
        let token = sqlx::query_as::<_, RefreshToken>(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at)
            VALUES (?, ?, ?, ?)
            RETURNING id, user_id, token_hash, expires_at, revoked
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(user_id)
        .bind(token_hash)
        .bind(expires_at.timestamp())
        .fetch_one(&self.pool)
        .await
        .context("failed to store refresh token")?;
        Ok(token)
    }

    async fn get_valid(&self, token_hash: &str) -> Result<Option<RefreshToken>> {
        let token = sqlx::query_as::<_, RefreshToken>(
            r#"
            SELECT id, user_id, token_hash, expires_at, revoked
            FROM refresh_tokens
            WHERE token_hash = ? AND revoked = 0 AND expires_at > ?
            "#,
        )
        .bind(token_hash)
        .bind(Utc::now().timestamp())
        .fetch_optional(&self.pool)
        .await?;
        Ok(token)
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>> {
        let token = sqlx::query_as::<_, RefreshToken>(
            r#"
            SELECT id, user_id, token_hash, expires_at, revoked
            FROM refresh_tokens
            WHERE token_hash = ?
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(token)
    }

    async fn revoke(&self, token_id: Uuid) -> Result<bool> {
        let rows = sqlx::query("UPDATE refresh_tokens SET revoked = 1 WHERE id = ? AND revoked = 0")
            .bind(token_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows == 1)
    }

    async fn revoke_all(&self, user_id: Uuid) -> Result<u64> {
        let rows =
            sqlx::query("UPDATE refresh_tokens SET revoked = 1 WHERE user_id = ? AND revoked = 0")
                .bind(user_id)
                .execute(&self.pool)
                .await?
                .rows_affected();
        Ok(rows)
    }

    async fn rotate(
        &self,
        token_id: Uuid,
        new_hash: &str,
        new_expires_at: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>> {
        let mut tx = self.pool.begin().await.context("begin rotation")?;

        let owner: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE refresh_tokens
            SET revoked = 1
            WHERE id = ? AND revoked = 0 AND expires_at > ?
            RETURNING user_id
            "#,
        )
        .bind(token_id)
        .bind(Utc::now().timestamp())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(user_id) = owner else {
            tx.rollback().await?;
            return Ok(None);
        };

        let child = sqlx::query_as::<_, RefreshToken>(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at)
            VALUES (?, ?, ?, ?)
            RETURNING id, user_id, token_hash, expires_at, revoked
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(user_id)
        .bind(new_hash)
        .bind(new_expires_at.timestamp())
        .fetch_one(&mut *tx)
        .await
        .context("failed to insert rotated refresh token")?;

        tx.commit().await.context("commit rotation")?;
        Ok(Some(child))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{NewUser, Role};
    use crate::database::{test_file_pool, test_pool};
    use crate::repositories::{CredentialStore, SqliteCredentialStore};
    use crate::utils::crypto::{SecretSealer, generate_key};
    use chrono::Duration;

    async fn setup() -> (SqliteTokenStore, Uuid) {
        setup_on(test_pool().await).await
    }

    async fn setup_on(pool: SqlitePool) -> (SqliteTokenStore, Uuid) {
        let sealer = SecretSealer::from_base64_key(&generate_key()).unwrap();
        let users = SqliteCredentialStore::new(pool.clone(), sealer);
        let user = users
            .create_user(NewUser {
                username: "tok".to_string(),
                email: "tok@example.com".to_string(),
                password_hash: "x".to_string(),
                role: Role::Customer,
                password_reset_required: false,
            })
            .await
            .unwrap();
        (SqliteTokenStore::new(pool), user.id)
    }

    fn in_a_week() -> DateTime<Utc> {
        Utc::now() + Duration::days(7)
    }

    #[tokio::test]
    async fn test_store_and_get_valid() {
        let (store, user_id) = setup().await;
        let stored = store.store(user_id, "h1", in_a_week()).await.unwrap();

        let found = store.get_valid("h1").await.unwrap().unwrap();
        assert_eq!(found.id, stored.id);
        assert_eq!(found.user_id, user_id);
        assert!(!found.revoked);
        assert!(store.get_valid("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_token_is_not_valid_but_still_found() {
        let (store, user_id) = setup().await;
        store
            .store(user_id, "old", Utc::now() - Duration::seconds(5))
            .await
            .unwrap();

        assert!(store.get_valid("old").await.unwrap().is_none());
        let record = store.find_by_hash("old").await.unwrap().unwrap();
        assert!(!record.revoked);
    }

    #[tokio::test]
    async fn test_revoke_is_conditional() {
        let (store, user_id) = setup().await;
        let token = store.store(user_id, "h", in_a_week()).await.unwrap();

        assert!(store.revoke(token.id).await.unwrap());
        assert!(!store.revoke(token.id).await.unwrap());
        assert!(store.get_valid("h").await.unwrap().is_none());
        assert!(store.find_by_hash("h").await.unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn test_rotate_once() {
        let (store, user_id) = setup().await;
        let parent = store.store(user_id, "parent", in_a_week()).await.unwrap();

        let child = store
            .rotate(parent.id, "child", in_a_week())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(child.user_id, user_id);
        assert!(store.get_valid("parent").await.unwrap().is_none());
        assert!(store.get_valid("child").await.unwrap().is_some());

        assert!(
            store
                .rotate(parent.id, "second-child", in_a_week())
                .await
                .unwrap()
                .is_none()
        );
        assert!(store.find_by_hash("second-child").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_all() {
        let (store, user_id) = setup().await;
        store.store(user_id, "a", in_a_week()).await.unwrap();
        store.store(user_id, "b", in_a_week()).await.unwrap();

        assert_eq!(store.revoke_all(user_id).await.unwrap(), 2);
        assert!(store.get_valid("a").await.unwrap().is_none());
        assert!(store.get_valid("b").await.unwrap().is_none());
        assert_eq!(store.revoke_all(user_id).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_rotation_on_shared_pool_has_one_winner() {
        let (pool, path) = test_file_pool(5).await;
        let (store, user_id) = setup_on(pool.clone()).await;
        let store = std::sync::Arc::new(store);

        for round in 0..10 {
            let parent = store
                .store(user_id, &format!("parent-{round}"), in_a_week())
                .await
                .unwrap();

            let attempts: Vec<_> = (0..5)
                .map(|i| {
                    let store = store.clone();
                    tokio::spawn(async move {
                        store
                            .rotate(parent.id, &format!("child-{round}-{i}"), in_a_week())
                            .await
                    })
                })
                .collect();

            let mut winners = 0;
            for attempt in futures::future::join_all(attempts).await {
                if attempt.unwrap().unwrap().is_some() {
                    winners += 1;
                }
            }
            assert_eq!(winners, 1, "round {round}");
        }

        pool.close().await;
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
        }
    }
}
