pub mod azdls;
pub mod local;
pub mod s3;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub use azdls::AzdlsStore;
pub use local::LocalStore;
pub use s3::S3Source;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, list 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;
/// S3 单次列举的原生上限
pub const S3_PAGE_LIMIT: usize = 1000;
/// 对象 key 的路径分隔符
pub const KEY_SEPARATOR: char = '/';

/// 源对象描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// 对象 key，同时也是相对路径
    pub key: String,
    /// 源端没有给出修改时间时为 None
    pub last_modified: Option<DateTime<Utc>>,
    /// 版本指纹（S3 ETag，已去掉引号）
    pub fingerprint: Option<String>,
    pub size: u64,
    pub owner: Option<String>,
    pub storage_class: Option<String>,
}

impl ObjectInfo {
    pub fn new(key: impl Into<String>, last_modified: DateTime<Utc>, size: u64) -> Self {
        Self {
            key: key.into(),
            last_modified: Some(last_modified),
            fingerprint: None,
            size,
            owner: None,
            storage_class: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// 以分隔符结尾的 key 是目录占位对象，不是真实文件
    pub fn is_directory_marker(&self) -> bool {
        self.key.ends_with(KEY_SEPARATOR)
    }
}

/// 一页列举结果
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub objects: Vec<ObjectInfo>,
    /// 本页最后一个 key（包含目录占位对象），作为下一页的起点
    pub next_marker: Option<String>,
    pub is_truncated: bool,
}

/// 目标路径元数据
#[derive(Debug, Clone)]
pub struct PathMeta {
    pub size: u64,
    pub modified_time: Option<DateTime<Utc>>,
    pub is_dir: bool,
}

/// 源对象存储接口（按页列举 + 下载）
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// 列举 marker 之后的一页对象，按 key 升序
    async fn list_page(&self, marker: Option<&str>, page_size: usize) -> Result<ObjectPage>;

    /// 把对象内容写入本地文件，返回写入字节数
    async fn read_to_file(&self, key: &str, local_path: &Path) -> Result<u64>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 目标层级文件系统接口
#[async_trait]
pub trait LakeStore: Send + Sync {
    /// 获取路径元数据，不存在时返回 None，其他错误照常返回
    async fn stat(&self, path: &str) -> Result<Option<PathMeta>>;

    /// 递归创建目录（已存在不报错）
    async fn create_dir_all(&self, path: &str) -> Result<()>;

    /// 上传本地文件并覆盖目标，返回写入字节数
    async fn write_file(&self, path: &str, local_path: &Path) -> Result<u64>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 返回 key 的父目录部分，例如 `a/b/c.txt` -> `a/b`
pub fn parent_path(key: &str) -> Option<&str> {
    key.rsplit_once(KEY_SEPARATOR)
        .map(|(parent, _)| parent)
        .filter(|parent| !parent.is_empty())
}

/// 根据配置创建源存储
pub async fn create_source(settings: &crate::config::Settings) -> Result<Arc<dyn ObjectSource>> {
    let s3 = &settings.source;
    tracing::info!("初始化S3存储: bucket={}, region={}", s3.bucket, s3.region);
    Ok(Arc::new(
        S3Source::new(
            &s3.bucket,
            &s3.region,
            &s3.access_key_id,
            &s3.secret_access_key,
            s3.endpoint.clone(),
        )
        .await?,
    ) as Arc<dyn ObjectSource>)
}

/// 根据配置创建目标存储
pub async fn create_destination(
    settings: &crate::config::Settings,
) -> Result<Arc<dyn LakeStore>> {
    use crate::config::Destination;

    match &settings.destination {
        Destination::Azdls {
            account_name,
            account_key,
            filesystem,
            endpoint,
            root,
        } => {
            tracing::info!(
                "初始化 Data Lake 存储: account={}, filesystem={}",
                account_name,
                filesystem
            );
            Ok(Arc::new(AzdlsStore::new(
                account_name,
                account_key,
                filesystem,
                endpoint.clone(),
                root.clone(),
            )?) as Arc<dyn LakeStore>)
        }
        Destination::Local { path } => {
            tracing::info!("初始化本地存储: {}", path.display());
            Ok(Arc::new(LocalStore::new(path)?) as Arc<dyn LakeStore>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("a/b/c.txt"), Some("a/b"));
        assert_eq!(parent_path("b/c.txt"), Some("b"));
        assert_eq!(parent_path("a.txt"), None);
        assert_eq!(parent_path("/a.txt"), None);
    }

    #[test]
    fn test_directory_marker() {
        let now = Utc::now();
        assert!(ObjectInfo::new("d/", now, 0).is_directory_marker());
        assert!(!ObjectInfo::new("d/e.txt", now, 3).is_directory_marker());
    }
}
