//! 离线变更数据访问层（DAO）
//!
//! `pending_changes` 表只由离线队列读写，id 由 SQLite 自增分配。

use crate::crm::sync::models::{Mutation, PendingChange};
use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use tracing::debug;

/// 离线变更 DAO（基于 sqlx）
#[derive(Clone)]
pub struct PendingChangeDao {
    db: Pool<Sqlite>,
}

impl PendingChangeDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 追加一条变更，返回分配的 id
    pub async fn insert(&self, kind: &str, data: &str, timestamp: i64) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO pending_changes (type, data, timestamp)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(kind)
        .bind(data)
        .bind(timestamp)
        .execute(&self.db)
        .await
        .context("写入待同步变更失败")?;

        let id = result.last_insert_rowid();
        debug!("[PendingDAO] 新增待同步变更 id={}, type={}", id, kind);
        Ok(id)
    }

    /// 取 id 大于 `after_id` 的第一条变更
    pub async fn first_after(&self, after_id: i64) -> Result<Option<PendingChange>> {
        let row = sqlx::query(
            r#"
            SELECT id, type, data, timestamp
            FROM pending_changes
            WHERE id > ?
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .bind(after_id)
        .fetch_optional(&self.db)
        .await
        .context("查询待同步变更失败")?;

        Ok(row.map(|m| Self::to_change(&m)))
    }

    /// 按 id 升序列出全部变更
    pub async fn list_all(&self) -> Result<Vec<PendingChange>> {
        let rows = sqlx::query(
            r#"
            SELECT id, type, data, timestamp
            FROM pending_changes
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.db)
        .await
        .context("查询待同步变更列表失败")?;

        Ok(rows.iter().map(Self::to_change).collect())
    }

    /// 删除已成功同步的变更
    pub async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM pending_changes WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await
            .with_context(|| format!("删除待同步变更失败: id={}", id))?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_changes")
            .fetch_one(&self.db)
            .await
            .context("统计待同步变更失败")?;
        Ok(count)
    }

    fn to_change(row: &SqliteRow) -> PendingChange {
        let kind: String = row.get("type");
        let data: String = row.get("data");
        PendingChange {
            id: row.get("id"),
            mutation: Mutation::from_parts(&kind, &data),
            enqueued_at: row.get("timestamp"),
        }
    }
}
