use crate::core::cache::DecisionCache;
use crate::core::decision::{SyncDecision, UploadDecider};
use crate::core::enumerator::SourceEnumerator;
use crate::core::gateway::DestinationGateway;
use crate::core::staging::StagingDir;
use crate::storage::{LakeStore, ObjectInfo, ObjectPage, ObjectSource};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 同步配置
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 最大并发传输数
    pub max_concurrent_transfers: usize,
    /// 每页列举的对象数
    pub page_size: usize,
    /// 最大重试次数
    pub max_retries: u32,
    /// 重试基础延迟（毫秒）
    pub retry_base_delay_ms: u64,
    /// 单个对象单次尝试的超时
    pub object_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: 10,
            page_size: crate::storage::S3_PAGE_LIMIT,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            object_timeout: Duration::from_secs(600),
        }
    }
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub pages: u32,
    pub objects_listed: u64,
    pub directory_markers: u64,
    pub uploaded: u64,
    pub skipped: u64,
    pub failed: u64,
    pub bytes_transferred: u64,
    pub cancelled: bool,
    pub errors: Vec<String>,
}

impl SyncReport {
    fn new() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            pages: 0,
            objects_listed: 0,
            directory_markers: 0,
            uploaded: 0,
            skipped: 0,
            failed: 0,
            bytes_transferred: 0,
            cancelled: false,
            errors: Vec::new(),
        }
    }
}

/// 传输统计
#[derive(Debug, Default)]
struct TransferStats {
    uploaded: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    bytes_transferred: AtomicU64,
}

/// 单个对象的处理结果
#[derive(Debug)]
enum ObjectOutcome {
    Uploaded { bytes: u64 },
    Skipped,
}

/// 单个对象的处理流水线，所有并发任务共享
struct ObjectPipeline {
    enumerator: SourceEnumerator,
    gateway: Arc<DestinationGateway>,
    decider: UploadDecider,
}

impl ObjectPipeline {
    /// 决策 -> 下载 -> 上传 -> 删除暂存文件 -> 记录缓存
    async fn sync_object(&self, object: &ObjectInfo) -> Result<ObjectOutcome> {
        if self.decider.decide(object).await? == SyncDecision::Skip {
            return Ok(ObjectOutcome::Skipped);
        }

        let local_path = self.enumerator.staging_path(object).await?;
        // 暂存文件只属于当前任务，任何方式退出（包括超时被丢弃）都会删除
        let staged = scopeguard::guard(local_path, |path| StagingDir::discard(&path));

        self.enumerator.download(object, &staged).await?;
        let bytes = self.gateway.upload(object, &staged).await?;
        drop(staged);

        self.decider.record(object).await;
        Ok(ObjectOutcome::Uploaded { bytes })
    }
}

/// 指数退避
fn backoff_delay(base_delay_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(base_delay_ms.saturating_mul(2_u64.saturating_pow(attempt)))
}

/// 同步引擎
pub struct SyncEngine {
    pipeline: Arc<ObjectPipeline>,
    staging: StagingDir,
    config: SyncConfig,
    cancel: CancellationToken,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn ObjectSource>,
        destination: Arc<dyn LakeStore>,
        cache: Option<Arc<dyn DecisionCache>>,
        staging_root: impl Into<PathBuf>,
        config: SyncConfig,
    ) -> Self {
        let staging = StagingDir::new(staging_root);
        let gateway = Arc::new(DestinationGateway::new(destination));
        let pipeline = ObjectPipeline {
            enumerator: SourceEnumerator::new(source, staging.clone(), config.page_size),
            decider: UploadDecider::new(gateway.clone(), cache),
            gateway,
        };

        Self {
            pipeline: Arc::new(pipeline),
            staging,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// 使用外部的取消令牌（例如进程信号）
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 取消同步：不再调度新任务，已开始的任务会执行完
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 运行一次完整同步
    pub async fn run(&self) -> Result<SyncReport> {
        let mut report = SyncReport::new();

        info!(
            "开始同步任务 {}: {} -> {} (并发 {}, 缓存 {})",
            report.run_id,
            self.pipeline.enumerator.source_name(),
            self.pipeline.gateway.store_name(),
            self.config.max_concurrent_transfers,
            if self.pipeline.decider.cache_enabled() { "开启" } else { "关闭" }
        );

        self.staging
            .ensure()
            .await
            .with_context(|| format!("创建暂存目录 {:?} 失败", self.staging.root()))?;

        let stats = Arc::new(TransferStats::default());
        let errors = Arc::new(RwLock::new(Vec::<String>::new()));

        let result = self.run_pages(&mut report, &stats, &errors).await;

        // 所有上传结束后删除暂存目录，失败只记录警告
        self.staging.remove_all().await;

        report.uploaded = stats.uploaded.load(Ordering::Relaxed);
        report.skipped = stats.skipped.load(Ordering::Relaxed);
        report.failed = stats.failed.load(Ordering::Relaxed);
        report.bytes_transferred = stats.bytes_transferred.load(Ordering::Relaxed);
        report.errors = errors.read().await.clone();
        report.finished_at = Some(Utc::now());

        result?;

        info!(
            "同步任务完成: {} 批次, 列举 {}, 上传 {}, 跳过 {}, 失败 {}, {} 字节{}",
            report.pages,
            report.objects_listed,
            report.uploaded,
            report.skipped,
            report.failed,
            report.bytes_transferred,
            if report.cancelled { " (已取消)" } else { "" }
        );
        info!("all done");

        Ok(report)
    }

    /// 逐页处理，页与页之间严格串行
    async fn run_pages(
        &self,
        report: &mut SyncReport,
        stats: &Arc<TransferStats>,
        errors: &Arc<RwLock<Vec<String>>>,
    ) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_transfers.max(1)));
        let mut cursor: Option<String> = None;

        loop {
            if self.cancel.is_cancelled() {
                warn!("同步已取消，不再获取新的批次");
                report.cancelled = true;
                return Ok(());
            }

            info!("开始处理批次 #{}", report.pages + 1);
            let Some(page) = self.list_page_with_retry(cursor.as_deref()).await? else {
                warn!("同步已取消，放弃重试列举");
                report.cancelled = true;
                return Ok(());
            };
            report.pages += 1;
            report.objects_listed += page.objects.len() as u64;

            // 过滤目录占位对象
            let (markers, objects): (Vec<_>, Vec<_>) = page
                .objects
                .into_iter()
                .partition(ObjectInfo::is_directory_marker);
            report.directory_markers += markers.len() as u64;
            if !markers.is_empty() {
                debug!("跳过 {} 个目录占位对象", markers.len());
            }

            if self.process_page(objects, &semaphore, stats, errors).await? {
                report.cancelled = true;
                return Ok(());
            }

            if !page.is_truncated {
                return Ok(());
            }

            match page.next_marker {
                Some(next) if cursor.as_deref().map_or(true, |c| next.as_str() > c) => {
                    cursor = Some(next);
                }
                next => bail!(
                    "分页游标没有前进 (cursor={:?}, next={:?})",
                    cursor,
                    next
                ),
            }
        }
    }

    /// 并发处理一页对象，全部结束后才返回。返回 true 表示因取消而未调度完
    async fn process_page(
        &self,
        objects: Vec<ObjectInfo>,
        semaphore: &Arc<Semaphore>,
        stats: &Arc<TransferStats>,
        errors: &Arc<RwLock<Vec<String>>>,
    ) -> Result<bool> {
        let mut handles = Vec::with_capacity(objects.len());
        let mut interrupted = false;

        for object in objects {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => Some(permit?),
            };
            let Some(permit) = permit else {
                warn!("同步已取消，本批次剩余对象不再调度");
                interrupted = true;
                break;
            };

            let key = object.key.clone();
            let pipeline = self.pipeline.clone();
            let config = self.config.clone();
            let cancel = self.cancel.clone();
            let stats = stats.clone();
            let errors = errors.clone();

            let handle = tokio::spawn(async move {
                let result =
                    Self::sync_object_with_retry(&pipeline, &object, &config, &cancel).await;

                match result {
                    Ok(ObjectOutcome::Uploaded { bytes }) => {
                        stats.uploaded.fetch_add(1, Ordering::Relaxed);
                        stats.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
                    }
                    Ok(ObjectOutcome::Skipped) => {
                        stats.skipped.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        error!("处理对象 {} 时出错: {}", object.key, e);
                        stats.failed.fetch_add(1, Ordering::Relaxed);
                        errors.write().await.push(format!("{}: {:#}", object.key, e));
                    }
                }

                drop(permit);
            });

            handles.push((key, handle));
        }

        // 等待本批次所有任务完成
        for (key, handle) in handles {
            if let Err(e) = handle.await {
                error!("处理对象 {} 的任务异常退出: {}", key, e);
                stats.failed.fetch_add(1, Ordering::Relaxed);
                errors.write().await.push(format!("{}: 任务异常退出: {}", key, e));
            }
        }

        Ok(interrupted)
    }

    /// 带重试和超时的单对象处理
    async fn sync_object_with_retry(
        pipeline: &ObjectPipeline,
        object: &ObjectInfo,
        config: &SyncConfig,
        cancel: &CancellationToken,
    ) -> Result<ObjectOutcome, String> {
        let mut last_error = String::new();

        for attempt in 0..=config.max_retries {
            match tokio::time::timeout(config.object_timeout, pipeline.sync_object(object)).await
            {
                Ok(Ok(outcome)) => return Ok(outcome),
                Ok(Err(e)) => last_error = format!("{:#}", e),
                Err(_) => {
                    last_error = format!("处理超时 ({}s)", config.object_timeout.as_secs())
                }
            }

            if attempt < config.max_retries {
                let delay = backoff_delay(config.retry_base_delay_ms, attempt);
                warn!(
                    "{} 处理失败，{}ms 后重试 ({}/{}): {}",
                    object.key,
                    delay.as_millis(),
                    attempt + 1,
                    config.max_retries,
                    last_error
                );
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(format!("操作已取消: {}", last_error));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(last_error)
    }

    /// 列举一页，失败时按同样的退避策略重试。等待重试期间被取消时返回 None
    async fn list_page_with_retry(&self, cursor: Option<&str>) -> Result<Option<ObjectPage>> {
        let mut attempt = 0;
        loop {
            let err = match self.pipeline.enumerator.list_page(cursor).await {
                Ok(page) => return Ok(Some(page)),
                Err(e) => e,
            };

            if attempt >= self.config.max_retries {
                return Err(err);
            }

            let delay = backoff_delay(self.config.retry_base_delay_ms, attempt);
            warn!(
                "列举失败，{}ms 后重试 ({}/{}): {:#}",
                delay.as_millis(),
                attempt + 1,
                self.config.max_retries,
                err
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
