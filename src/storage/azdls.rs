use super::{LakeStore, PathMeta, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use anyhow::Result;
use async_trait::async_trait;
use opendal::{layers::TimeoutLayer, Operator};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::warn;

/// 上传时每次追加的块大小
const UPLOAD_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// 同目录下的临时上传路径，写完后再改名到目标路径
fn upload_temp_path(path: &str) -> String {
    format!("{}.{}.uploading", path, uuid::Uuid::new_v4().simple())
}

/// Azure Data Lake Storage Gen2（分层命名空间）
pub struct AzdlsStore {
    operator: Operator,
    name: String,
}

impl AzdlsStore {
    pub fn new(
        account_name: &str,
        account_key: &str,
        filesystem: &str,
        endpoint: Option<String>,
        root: Option<String>,
    ) -> Result<Self> {
        use opendal::services::Azdls;

        let endpoint =
            endpoint.unwrap_or_else(|| format!("https://{}.dfs.core.windows.net", account_name));

        let mut builder = Azdls::default()
            .filesystem(filesystem)
            .endpoint(&endpoint)
            .account_name(account_name)
            .account_key(account_key);

        if let Some(ref r) = root {
            builder = builder.root(r);
        }

        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        let name = format!(
            "abfs://{}@{}{}",
            filesystem,
            account_name,
            root.as_deref()
                .map(|r| format!("/{}", r.trim_start_matches('/')))
                .unwrap_or_default()
        );

        Ok(Self { operator, name })
    }

    async fn append_from_file(&self, temp: &str, file: &mut tokio::fs::File) -> Result<u64> {
        let mut writer = self
            .operator
            .writer_with(temp)
            .append(true)
            .chunk(UPLOAD_CHUNK_SIZE)
            .await?;

        let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
        let mut written = 0u64;
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.write(buf[..n].to_vec()).await?;
            written += n as u64;
        }
        writer.close().await?;

        Ok(written)
    }

    async fn discard_temp(&self, temp: &str) {
        if let Err(e) = self.operator.delete(temp).await {
            warn!("清理临时上传文件 {} 失败: {}", temp, e);
        }
    }
}

#[async_trait]
impl LakeStore for AzdlsStore {
    async fn stat(&self, path: &str) -> Result<Option<PathMeta>> {
        match self.operator.stat(path).await {
            Ok(meta) => Ok(Some(PathMeta {
                size: meta.content_length(),
                modified_time: meta.last_modified(),
                is_dir: meta.is_dir(),
            })),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_dir_all(&self, path: &str) -> Result<()> {
        // Gen2 创建目录时会一并创建缺失的父目录
        let dir_path = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{}/", path)
        };
        self.operator.create_dir(&dir_path).await?;
        Ok(())
    }

    async fn write_file(&self, path: &str, local_path: &Path) -> Result<u64> {
        let mut file = tokio::fs::File::open(local_path).await?;
        if file.metadata().await?.len() == 0 {
            self.operator.write(path, Vec::<u8>::new()).await?;
            return Ok(0);
        }

        // 分块追加到临时文件，避免整个对象进内存；目标路径只在改名时被覆盖
        let temp = upload_temp_path(path);
        match self.append_from_file(&temp, &mut file).await {
            Ok(written) => match self.operator.rename(&temp, path).await {
                Ok(()) => Ok(written),
                Err(e) => {
                    self.discard_temp(&temp).await;
                    Err(e.into())
                }
            },
            Err(e) => {
                self.discard_temp(&temp).await;
                Err(e)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
