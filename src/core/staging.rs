//! 本地暂存目录
//!
//! 下载中的对象先落到这里，上传完成后立即删除；整个目录在一次同步结束时删除。

use crate::storage::KEY_SEPARATOR;
use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct StagingDir {
    root: PathBuf,
}

impl StagingDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 创建暂存根目录（已存在不报错）
    pub async fn ensure(&self) -> Result<()> {
        if !self.root.exists() {
            info!("创建暂存目录 {:?}", self.root);
        }
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// 递归删除暂存根目录，失败只记录警告
    pub async fn remove_all(&self) {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => debug!("已删除暂存目录 {:?}", self.root),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("删除暂存目录 {:?} 失败: {}", self.root, e),
        }
    }

    /// 为对象 key 计算暂存路径，并逐级创建缺失的中间目录
    pub async fn prepare(&self, key: &str) -> Result<PathBuf> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(path)
    }

    /// 把 key 映射到暂存根目录下，拒绝任何可能逃出根目录的 key
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for segment in key.split(KEY_SEPARATOR) {
            match segment {
                "" | "." | ".." => bail!("非法的对象 key: {:?}", key),
                s => path.push(s),
            }
        }
        Ok(path)
    }

    /// 删除单个暂存文件（同步调用，供 drop 守卫使用）
    pub fn discard(path: &Path) {
        match std::fs::remove_file(path) {
            Ok(()) => debug!("暂存文件 {:?} 已删除", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("删除暂存文件 {:?} 失败: {}", path, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingDir::new(dir.path().join("tmp").join("cache"));

        staging.ensure().await.unwrap();
        staging.ensure().await.unwrap();
        assert!(staging.root().is_dir());
    }

    #[tokio::test]
    async fn test_prepare_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingDir::new(dir.path().join("cache"));
        staging.ensure().await.unwrap();

        let path = staging.prepare("a/b/c.txt").await.unwrap();
        assert_eq!(path, dir.path().join("cache").join("a").join("b").join("c.txt"));
        assert!(path.parent().unwrap().is_dir());
    }

    #[test]
    fn test_rejects_escaping_keys() {
        let staging = StagingDir::new("/tmp/cache");
        assert!(staging.path_for("../etc/passwd").is_err());
        assert!(staging.path_for("/abs.txt").is_err());
        assert!(staging.path_for("a//b.txt").is_err());
        assert!(staging.path_for("a/./b.txt").is_err());
        assert!(staging.path_for("a/b.txt").is_ok());
    }

    #[tokio::test]
    async fn test_remove_all_tolerates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingDir::new(dir.path().join("never-created"));
        staging.remove_all().await;

        let staging = StagingDir::new(dir.path().join("cache"));
        staging.ensure().await.unwrap();
        let file = staging.prepare("x/y.bin").await.unwrap();
        std::fs::write(&file, b"1").unwrap();
        staging.remove_all().await;
        assert!(!staging.root().exists());
    }

    #[tokio::test]
    async fn test_remove_all_failure_only_warns() {
        let dir = tempfile::tempdir().unwrap();
        let log_config = crate::logging::LogConfig {
            log_dir: Some(dir.path().join("logs")),
            ..Default::default()
        };
        let _guard = tracing::subscriber::set_default(crate::logging::build_subscriber(&log_config));

        // 根路径是普通文件，删除目录必然失败
        let blocker = dir.path().join("cache");
        std::fs::write(&blocker, b"not a dir").unwrap();
        StagingDir::new(&blocker).remove_all().await;

        assert!(blocker.is_file());
        let log = std::fs::read_to_string(
            dir.path().join("logs").join(crate::logging::LOG_FILE_NAME),
        )
        .unwrap();
        assert!(log.contains("删除暂存目录"));
        assert!(log.contains("失败"));
    }
}
