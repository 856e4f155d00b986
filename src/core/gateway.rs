//! 目标端：判断是否需要上传，以及执行上传

use crate::storage::{parent_path, LakeStore, ObjectInfo};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

pub struct DestinationGateway {
    store: Arc<dyn LakeStore>,
}

impl DestinationGateway {
    pub fn new(store: Arc<dyn LakeStore>) -> Self {
        Self { store }
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// 目标不存在，或目标修改时间严格早于源对象时需要上传。
    /// 除"不存在"以外的 stat 错误直接返回，不当作需要上传
    pub async fn needs_upload(&self, object: &ObjectInfo) -> Result<bool> {
        let meta = self
            .store
            .stat(&object.key)
            .await
            .with_context(|| format!("查询目标 {} 元数据失败", object.key))?;

        let Some(meta) = meta else {
            info!("文件 {} 在目标端不存在", object.key);
            return Ok(true);
        };

        debug!("文件 {} 已存在于目标端", object.key);
        match (meta.modified_time, object.last_modified) {
            (Some(dest_time), Some(source_time)) => Ok(dest_time < source_time),
            // 任一端缺少修改时间，无法证明目标是新的
            _ => Ok(true),
        }
    }

    /// 逐级创建父目录后上传暂存文件（覆盖写）
    pub async fn upload(&self, object: &ObjectInfo, local_path: &Path) -> Result<u64> {
        if let Some(parent) = parent_path(&object.key) {
            self.store
                .create_dir_all(parent)
                .await
                .with_context(|| format!("创建目标目录 {} 失败", parent))?;
        }

        let bytes = self
            .store
            .write_file(&object.key, local_path)
            .await
            .with_context(|| format!("上传 {} 失败", object.key))?;

        info!("上传文件 {} 成功 ({} 字节)", object.key, bytes);
        Ok(bytes)
    }
}
