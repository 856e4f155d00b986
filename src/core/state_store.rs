//! 同步状态表 - SQLite 版决策缓存

use crate::core::cache::{CacheEntry, DecisionCache};
use crate::storage::ObjectInfo;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// 数据库行
#[derive(Debug, sqlx::FromRow)]
struct SyncStateRow {
    fingerprint: String,
    modified_time: i64,
}

impl TryFrom<SyncStateRow> for CacheEntry {
    type Error = anyhow::Error;

    fn try_from(row: SyncStateRow) -> Result<Self> {
        let modified_time = DateTime::<Utc>::from_timestamp_millis(row.modified_time)
            .ok_or_else(|| anyhow!("无效的修改时间: {}", row.modified_time))?;
        Ok(CacheEntry {
            fingerprint: row.fingerprint,
            modified_time,
        })
    }
}

pub struct SqliteDecisionCache {
    db: SqlitePool,
    name: String,
}

impl SqliteDecisionCache {
    /// 打开（或创建）数据库文件并执行迁移
    pub async fn connect(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // SQLite 连接字符串格式: sqlite:path
        // Windows 路径需要转换反斜杠为正斜杠
        let db_path_str = db_path
            .to_str()
            .ok_or_else(|| anyhow!("Invalid database path"))?
            .replace('\\', "/");

        let db = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&format!("sqlite:{}?mode=rwc", db_path_str))
            .await?;

        Self::with_pool(db, format!("sqlite:{}", db_path_str)).await
    }

    /// 内存数据库，单连接，用于测试
    pub async fn in_memory() -> Result<Self> {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(db, "sqlite::memory:").await
    }

    async fn with_pool(db: SqlitePool, name: impl Into<String>) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&db).await?;
        Ok(Self {
            db,
            name: name.into(),
        })
    }

    /// 已记录的对象数量
    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sync_state")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}

#[async_trait]
impl DecisionCache for SqliteDecisionCache {
    async fn lookup(&self, key: &str) -> Result<Option<CacheEntry>> {
        let row = sqlx::query_as::<_, SyncStateRow>(
            "SELECT fingerprint, modified_time FROM sync_state WHERE object_key = ?",
        )
        .bind(key)
        .fetch_optional(&self.db)
        .await?;

        row.map(CacheEntry::try_from).transpose()
    }

    async fn record(&self, object: &ObjectInfo) -> Result<()> {
        let Some(entry) = CacheEntry::from_object(object) else {
            return Ok(());
        };

        sqlx::query(
            r#"INSERT INTO sync_state (object_key, fingerprint, modified_time, recorded_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(object_key) DO UPDATE SET
                   fingerprint = excluded.fingerprint,
                   modified_time = excluded.modified_time,
                   recorded_at = excluded.recorded_at"#,
        )
        .bind(&object.key)
        .bind(&entry.fingerprint)
        .bind(entry.modified_time.timestamp_millis())
        .bind(Utc::now().timestamp_millis())
        .execute(&self.db)
        .await?;

        debug!("已记录同步状态: {}", object.key);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_record_and_lookup() {
        let cache = SqliteDecisionCache::in_memory().await.unwrap();
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();

        assert!(cache.lookup("a.txt").await.unwrap().is_none());

        cache
            .record(&ObjectInfo::new("a.txt", t, 10).with_fingerprint("f1"))
            .await
            .unwrap();
        cache
            .record(&ObjectInfo::new("a.txt", t, 11).with_fingerprint("f2"))
            .await
            .unwrap();

        let entry = cache.lookup("a.txt").await.unwrap().unwrap();
        assert_eq!(entry.fingerprint, "f2");
        assert_eq!(entry.modified_time, t);
        assert_eq!(cache.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("sync_state.db");

        let cache = SqliteDecisionCache::connect(&path).await.unwrap();
        cache
            .record(&ObjectInfo::new("b/c.txt", Utc::now(), 1).with_fingerprint("etag"))
            .await
            .unwrap();
        cache.close().await;

        let reopened = SqliteDecisionCache::connect(&path).await.unwrap();
        let entry = reopened.lookup("b/c.txt").await.unwrap().unwrap();
        assert_eq!(entry.fingerprint, "etag");
    }
}
