//! 同步决策缓存
//!
//! 记录每个对象上次同步时的指纹，命中且指纹一致时直接跳过，
//! 省掉一次目标端元数据查询。

use crate::storage::ObjectInfo;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opendal::Operator;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 缓存条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// 上次同步时的指纹；旧版本写入的字段名为 ETag
    #[serde(alias = "ETag")]
    pub fingerprint: String,
    /// 上次同步时源对象的修改时间；旧版本写入的字段名为 LastModified
    #[serde(alias = "LastModified")]
    pub modified_time: DateTime<Utc>,
}

impl CacheEntry {
    /// 指纹和修改时间都齐全时才能缓存
    pub fn from_object(object: &ObjectInfo) -> Option<Self> {
        Some(Self {
            fingerprint: object.fingerprint.clone()?,
            modified_time: object.last_modified?,
        })
    }

    /// 旧条目里的 ETag 带引号
    fn normalized(mut self) -> Self {
        self.fingerprint = self.fingerprint.trim_matches('"').to_string();
        self
    }
}

/// 决策缓存接口
#[async_trait]
pub trait DecisionCache: Send + Sync {
    async fn lookup(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// 覆盖写入对象当前的指纹和修改时间
    async fn record(&self, object: &ObjectInfo) -> Result<()>;

    fn name(&self) -> &str;
}

/// 基于 opendal 键值服务的缓存（生产用 redis，测试用 memory）
pub struct KvDecisionCache {
    operator: Operator,
    name: String,
}

impl KvDecisionCache {
    pub fn new(operator: Operator, name: impl Into<String>) -> Self {
        Self {
            operator,
            name: name.into(),
        }
    }

    pub fn redis(host: &str, port: u16, password: Option<&str>, db: i64) -> Result<Self> {
        use opendal::services::Redis;

        let endpoint = format!("tcp://{}:{}", host, port);
        let mut builder = Redis::default().endpoint(&endpoint).db(db);
        if let Some(pw) = password {
            builder = builder.password(pw);
        }

        let operator = Operator::new(builder)?.finish();
        Ok(Self::new(operator, format!("redis://{}:{}/{}", host, port, db)))
    }

    /// 进程内缓存，不跨进程持久化
    pub fn memory() -> Result<Self> {
        let operator = Operator::new(opendal::services::Memory::default())?.finish();
        Ok(Self::new(operator, "memory"))
    }
}

#[async_trait]
impl DecisionCache for KvDecisionCache {
    async fn lookup(&self, key: &str) -> Result<Option<CacheEntry>> {
        let data = match self.operator.read(key).await {
            Ok(data) => data.to_vec(),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => {
                debug!("文件 {} 不在缓存中", key);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let entry: CacheEntry = serde_json::from_slice(&data)
            .with_context(|| format!("缓存条目 {} 格式错误", key))?;
        debug!("文件 {} 命中缓存", key);
        Ok(Some(entry.normalized()))
    }

    async fn record(&self, object: &ObjectInfo) -> Result<()> {
        let Some(entry) = CacheEntry::from_object(object) else {
            return Ok(());
        };

        let data = serde_json::to_vec(&entry)?;
        self.operator.write(&object.key, data).await?;
        debug!("已写入缓存: {}", object.key);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
