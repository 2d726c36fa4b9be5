//! 会话数据访问层（DAO）
//!
//! 会话记录是 `local_session` 表中的单行，token 与 user 在同一条语句内写入。

use crate::crm::auth::models::StoredSession;
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Pool, Row, Sqlite};
use tracing::debug;

/// 会话 DAO（基于 sqlx）
#[derive(Clone)]
pub struct SessionDao {
    db: Pool<Sqlite>,
}

impl SessionDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 读取持久化的会话原始记录
    pub async fn load(&self) -> Result<Option<StoredSession>> {
        let row = sqlx::query("SELECT token, user_json FROM local_session WHERE id = 1")
            .fetch_optional(&self.db)
            .await
            .context("查询本地会话失败")?;

        Ok(row.map(|m| StoredSession {
            token: m.get("token"),
            user_json: m.get("user_json"),
        }))
    }

    /// 保存会话（覆盖旧记录）
    pub async fn save(&self, stored: &StoredSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO local_session (id, token, user_json, updated_at)
            VALUES (1, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                token = excluded.token,
                user_json = excluded.user_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&stored.token)
        .bind(&stored.user_json)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.db)
        .await
        .context("保存本地会话失败")?;
        debug!("[SessionDAO] 会话已写入本地存储");
        Ok(())
    }

    /// 删除会话记录（无记录时同样成功）
    pub async fn clear(&self) -> Result<()> {
        let result = sqlx::query("DELETE FROM local_session")
            .execute(&self.db)
            .await
            .context("清除本地会话失败")?;
        debug!(
            "[SessionDAO] 清除本地会话，删除 {} 行",
            result.rows_affected()
        );
        Ok(())
    }
}
