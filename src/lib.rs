use anyhow::Context;
use std::sync::Arc;

pub mod config;
pub mod core;
pub mod logging;
pub mod storage;

pub use config::{ConfigError, Settings};
pub use crate::core::{DecisionCache, SyncConfig, SyncEngine, SyncReport};

use crate::config::CacheBackend;
use crate::core::{KvDecisionCache, SqliteDecisionCache};

/// 根据配置创建决策缓存；未开启时返回 None
pub async fn create_cache(settings: &Settings) -> anyhow::Result<Option<Arc<dyn DecisionCache>>> {
    if !settings.cache.enabled {
        tracing::debug!("决策缓存未开启");
        return Ok(None);
    }

    let cache: Arc<dyn DecisionCache> = match &settings.cache.backend {
        CacheBackend::Redis {
            host,
            port,
            password,
            db,
        } => Arc::new(KvDecisionCache::redis(host, *port, password.as_deref(), *db)?),
        CacheBackend::Sqlite { path } => Arc::new(
            SqliteDecisionCache::connect(path)
                .await
                .with_context(|| format!("打开同步状态数据库 {:?} 失败", path))?,
        ),
    };

    tracing::info!("使用决策缓存: {}", cache.name());
    Ok(Some(cache))
}

/// 按配置组装好的同步引擎
pub async fn build_engine(settings: &Settings) -> anyhow::Result<SyncEngine> {
    let source = storage::create_source(settings)
        .await
        .context("创建源存储客户端失败")?;
    let destination = storage::create_destination(settings)
        .await
        .context("创建目标存储客户端失败")?;
    let cache = create_cache(settings)
        .await
        .context("创建决策缓存失败")?;

    Ok(SyncEngine::new(
        source,
        destination,
        cache,
        settings.staging_root(),
        settings.sync_config(),
    ))
}
