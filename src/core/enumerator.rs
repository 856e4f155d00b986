//! 源对象分页列举 + 下载到暂存目录

use crate::core::staging::StagingDir;
use crate::storage::{ObjectInfo, ObjectPage, ObjectSource};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub struct SourceEnumerator {
    source: Arc<dyn ObjectSource>,
    staging: StagingDir,
    page_size: usize,
}

impl SourceEnumerator {
    pub fn new(source: Arc<dyn ObjectSource>, staging: StagingDir, page_size: usize) -> Self {
        Self {
            source,
            staging,
            page_size: page_size.max(1),
        }
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// 列举 cursor 之后的一页。目录占位对象原样返回，由调用方过滤
    pub async fn list_page(&self, cursor: Option<&str>) -> Result<ObjectPage> {
        let page = self
            .source
            .list_page(cursor, self.page_size)
            .await
            .with_context(|| format!("列举 {} 失败 (marker={:?})", self.source.name(), cursor))?;

        debug!(
            "列举到 {} 个对象, truncated={}, next={:?}",
            page.objects.len(),
            page.is_truncated,
            page.next_marker
        );
        Ok(page)
    }

    /// 计算对象的暂存路径并创建中间目录
    pub async fn staging_path(&self, object: &ObjectInfo) -> Result<PathBuf> {
        self.staging.prepare(&object.key).await
    }

    /// 把对象内容下载到暂存路径
    pub async fn download(&self, object: &ObjectInfo, local_path: &Path) -> Result<u64> {
        let bytes = self
            .source
            .read_to_file(&object.key, local_path)
            .await
            .with_context(|| format!("下载 {} 失败", object.key))?;

        debug!("下载完成: {} ({} 字节)", object.key, bytes);
        Ok(bytes)
    }
}
