use super::{LakeStore, PathMeta};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 本地目录树作为目标湖
pub struct LocalStore {
    base_path: PathBuf,
    name: String,
}

impl LocalStore {
    pub fn new(path: &Path) -> Result<Self> {
        let base_path = path.to_path_buf();
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)?;
        }
        let name = format!("local:{}", path.display());
        Ok(Self { base_path, name })
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = path.trim_start_matches('/').trim_start_matches('\\');
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }
}

#[async_trait]
impl LakeStore for LocalStore {
    async fn stat(&self, path: &str) -> Result<Option<PathMeta>> {
        let full_path = self.resolve_path(path);

        match fs::metadata(&full_path).await {
            Ok(metadata) => Ok(Some(PathMeta {
                size: if metadata.is_dir() { 0 } else { metadata.len() },
                modified_time: metadata.modified().ok().map(DateTime::<Utc>::from),
                is_dir: metadata.is_dir(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_dir_all(&self, path: &str) -> Result<()> {
        fs::create_dir_all(self.resolve_path(path)).await?;
        Ok(())
    }

    async fn write_file(&self, path: &str, local_path: &Path) -> Result<u64> {
        let full_path = self.resolve_path(path);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // 使用临时文件写入，然后原子重命名
        let mut temp_name = full_path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        let size = fs::copy(local_path, &temp_path).await?;
        fs::rename(&temp_path, &full_path).await?;

        Ok(size)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stat_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();

        assert!(store.stat("nope/a.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_file_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let lake = dir.path().join("lake");
        let store = LocalStore::new(&lake).unwrap();

        let staged = dir.path().join("staged.txt");
        std::fs::write(&staged, b"first").unwrap();
        store.create_dir_all("b/c").await.unwrap();
        store.write_file("b/c/d.txt", &staged).await.unwrap();

        std::fs::write(&staged, b"second!").unwrap();
        let size = store.write_file("b/c/d.txt", &staged).await.unwrap();

        assert_eq!(size, 7);
        assert_eq!(std::fs::read(lake.join("b/c/d.txt")).unwrap(), b"second!");

        let meta = store.stat("b/c/d.txt").await.unwrap().unwrap();
        assert!(!meta.is_dir);
        assert_eq!(meta.size, 7);
        assert!(meta.modified_time.is_some());
        assert!(store.stat("b/c").await.unwrap().unwrap().is_dir);
    }
}
