//! 上传决策：目标端元数据检查，可选地由决策缓存短路

use crate::core::cache::DecisionCache;
use crate::core::gateway::DestinationGateway;
use crate::storage::ObjectInfo;
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    Upload,
    Skip,
}

pub struct UploadDecider {
    gateway: Arc<DestinationGateway>,
    cache: Option<Arc<dyn DecisionCache>>,
}

impl UploadDecider {
    pub fn new(gateway: Arc<DestinationGateway>, cache: Option<Arc<dyn DecisionCache>>) -> Self {
        Self { gateway, cache }
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache.is_some()
    }

    pub async fn decide(&self, object: &ObjectInfo) -> Result<SyncDecision> {
        // 没有缓存或对象没有指纹时，直接问目标端
        let (Some(cache), Some(fingerprint)) = (&self.cache, object.fingerprint.as_deref()) else {
            return self.ask_gateway(object).await;
        };

        let cached = match cache.lookup(&object.key).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!("读取缓存 {} 失败，改为查询目标端: {:#}", object.key, e);
                return self.ask_gateway(object).await;
            }
        };

        match cached {
            Some(entry) if entry.fingerprint == fingerprint => {
                debug!("文件 {} 指纹未变化，跳过", object.key);
                Ok(SyncDecision::Skip)
            }
            Some(_) => {
                debug!("文件 {} 指纹已变化", object.key);
                Ok(SyncDecision::Upload)
            }
            None => {
                let decision = self.ask_gateway(object).await?;
                // 目标端已是最新，也记下来，下次就不用再查目标端
                if decision == SyncDecision::Skip {
                    self.record(object).await;
                }
                Ok(decision)
            }
        }
    }

    /// 上传成功后记录；缓存失败不影响已完成的上传
    pub async fn record(&self, object: &ObjectInfo) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.record(object).await {
                warn!("写入缓存 {} 失败: {:#}", object.key, e);
            }
        }
    }

    async fn ask_gateway(&self, object: &ObjectInfo) -> Result<SyncDecision> {
        if self.gateway.needs_upload(object).await? {
            Ok(SyncDecision::Upload)
        } else {
            Ok(SyncDecision::Skip)
        }
    }
}
