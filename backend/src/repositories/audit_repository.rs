//! SQLite audit trail.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::AuditStore;
use crate::database::models::AuditEntry;

pub struct SqliteAuditStore {
    pool: SqlitePool,
}

impl SqliteAuditStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn record(&self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, user_id, action, ip_address, user_agent, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(entry.user_id)
        .bind(&entry.action)
        .bind(entry.ip_address.as_deref())
        .bind(entry.user_agent.as_deref())
        .bind(entry.created_at.timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to write audit log")?;
        Ok(())
    }

    async fn recent_for_user(&self, user_id: Uuid, limit: u32) -> Result<Vec<AuditEntry>> {
        let entries = sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT user_id, action, ip_address, user_agent, created_at
            FROM audit_logs
            WHERE user_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::AuditAction;
    use crate::database::test_pool;

    #[tokio::test]
    async fn test_entries_come_back_newest_first() {
        let store = SqliteAuditStore::new(test_pool().await);
        let user_id = Uuid::now_v7();

        store
            .record(&AuditEntry::new(
                AuditAction::Login,
                Some(user_id),
                Some("203.0.113.7".to_string()),
                Some("curl/8.5".to_string()),
            ))
            .await
            .unwrap();
        store
            .record(&AuditEntry::new(AuditAction::Logout, Some(user_id), None, None))
            .await
            .unwrap();
        store
            .record(&AuditEntry::new(AuditAction::LoginFailed, None, None, None))
            .await
            .unwrap();

        let entries = store.recent_for_user(user_id, 10).await.unwrap();
        let actions: Vec<&str> = entries.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, ["logout", "login"]);
        assert_eq!(entries[1].ip_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(entries[1].user_agent.as_deref(), Some("curl/8.5"));

        assert_eq!(store.recent_for_user(user_id, 1).await.unwrap().len(), 1);
    }
}
