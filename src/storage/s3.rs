use super::{ObjectInfo, ObjectPage, ObjectSource, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use anyhow::Result;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use opendal::{layers::TimeoutLayer, Entry, Metakey, Operator};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// 下载时每次从源端读取的块大小
const DOWNLOAD_CHUNK_SIZE: usize = 8 * 1024 * 1024;

pub struct S3Source {
    operator: Operator,
    name: String,
}

impl S3Source {
    pub async fn new(
        bucket: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        endpoint: Option<String>,
    ) -> Result<Self> {
        use opendal::services::S3;

        let mut builder = S3::default()
            .bucket(bucket)
            .region(region)
            .access_key_id(access_key)
            .secret_access_key(secret_key);

        if let Some(ref ep) = endpoint {
            builder = builder.endpoint(ep);
        }

        // 添加超时层
        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        Ok(Self {
            operator,
            name: format!("s3://{}", bucket),
        })
    }
}

fn object_from_entry(entry: Entry) -> ObjectInfo {
    let meta = entry.metadata();
    ObjectInfo {
        key: entry.path().trim_start_matches('/').to_string(),
        last_modified: meta.last_modified(),
        fingerprint: meta.etag().map(|s| s.trim_matches('"').to_string()),
        size: meta.content_length(),
        owner: None,
        storage_class: None,
    }
}

/// 从列举流中取一页。拿满 page_size 就停止读取：再读一条会触发下一次 List 请求，
/// 代价是对象数恰好是页大小整数倍时最后多一次空页
async fn take_page<S>(mut entries: S, page_size: usize) -> Result<ObjectPage>
where
    S: Stream<Item = opendal::Result<ObjectInfo>> + Unpin,
{
    let mut page = ObjectPage::default();

    while page.objects.len() < page_size {
        let Some(object) = entries.try_next().await? else {
            break;
        };
        // 跳过根目录
        if object.key.is_empty() {
            continue;
        }
        page.objects.push(object);
    }

    page.is_truncated = page.objects.len() == page_size;
    page.next_marker = page.objects.last().map(|o| o.key.clone());
    Ok(page)
}

#[async_trait]
impl ObjectSource for S3Source {
    async fn list_page(&self, marker: Option<&str>, page_size: usize) -> Result<ObjectPage> {
        let mut list = self
            .operator
            .lister_with("")
            .recursive(true)
            .limit(page_size)
            .metakey(
                Metakey::ContentLength | Metakey::LastModified | Metakey::Etag | Metakey::Mode,
            );
        if let Some(marker) = marker {
            list = list.start_after(marker);
        }
        let lister = list.await?;

        take_page(lister.map_ok(object_from_entry), page_size).await
    }

    async fn read_to_file(&self, key: &str, local_path: &Path) -> Result<u64> {
        let mut stream = self
            .operator
            .reader_with(key)
            .chunk(DOWNLOAD_CHUNK_SIZE)
            .await?
            .into_bytes_stream(..)
            .await?;

        let mut file = tokio::fs::File::create(local_path).await?;
        let mut written = 0u64;
        while let Some(chunk) = stream.try_next().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
