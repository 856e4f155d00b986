//! 应用配置模块
//!
//! 所有配置来自环境变量风格的键值对，在创建任何网络客户端之前完成校验。

use crate::core::SyncConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// 所有目标类型都必须提供的源存储配置
const SOURCE_KEYS: [&str; 4] = [
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_REGION",
    "AWS_BUCKET_NAME",
];
const AZDLS_KEYS: [&str; 3] = [
    "AZURE_ADL_ACCOUNT_NAME",
    "AZURE_ADL_ACCOUNT_KEY",
    "AZURE_ADL_FILESYSTEM",
];
const LOCAL_KEYS: [&str; 1] = ["DEST_PATH"];
const STAGING_KEY: &str = "TEMP_FOLDER";

/// 暂存目录在 TEMP_FOLDER 下的子目录名，同步结束后整体删除
pub const STAGING_DIR_NAME: &str = "cache";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Environment Variable {0} is not defined")]
    Missing(String),
    #[error("Environment Variable {key} has invalid value '{value}': {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

/// 源 S3 配置
#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub bucket: String,
    pub endpoint: Option<String>,
}

/// 目标存储
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Azdls {
        account_name: String,
        account_key: String,
        filesystem: String,
        endpoint: Option<String>,
        root: Option<String>,
    },
    Local {
        path: PathBuf,
    },
}

/// 决策缓存后端
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    Redis {
        host: String,
        port: u16,
        password: Option<String>,
        db: i64,
    },
    Sqlite {
        path: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub backend: CacheBackend,
}

/// 完整的运行配置
#[derive(Debug, Clone)]
pub struct Settings {
    pub source: SourceSettings,
    pub destination: Destination,
    pub temp_folder: PathBuf,
    pub concurrency: usize,
    pub page_size: usize,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub object_timeout_secs: u64,
    pub cache: CacheSettings,
}

fn default_concurrency() -> usize {
    10
}

fn default_page_size() -> usize {
    crate::storage::S3_PAGE_LIMIT
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_object_timeout_secs() -> u64 {
    600 // 默认 10 分钟
}

fn default_redis_port() -> u16 {
    6379
}

/// 根据目标类型给出必填项（按检查顺序）
pub fn required_keys(dest_type: &str) -> Vec<&'static str> {
    let mut keys: Vec<&'static str> = SOURCE_KEYS.to_vec();
    match dest_type {
        "local" => keys.extend(LOCAL_KEYS),
        _ => keys.extend(AZDLS_KEYS),
    }
    keys.push(STAGING_KEY);
    keys
}

/// 启动校验：返回第一个缺失（或为空）的必填项
pub fn validate_required<F>(lookup: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let dest_type = lookup("DEST_TYPE").unwrap_or_else(|| "azdls".to_string());
    if dest_type != "azdls" && dest_type != "local" {
        return Err(ConfigError::Invalid {
            key: "DEST_TYPE".to_string(),
            value: dest_type,
            reason: "expected 'azdls' or 'local'".to_string(),
        });
    }

    for key in required_keys(&dest_type) {
        match lookup(key) {
            Some(v) if !v.trim().is_empty() => {}
            _ => return Err(ConfigError::Missing(key.to_string())),
        }
    }
    Ok(())
}

/// 读取并解析可选数值项
fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            value,
            reason: e.to_string(),
        }),
    }
}

/// 解析布尔开关，接受 true/false/1/0/yes/no/on/off
pub fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

impl Settings {
    /// 从进程环境变量加载
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从任意键值来源加载（便于测试）
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        validate_required(&lookup)?;

        // 校验通过后必填项一定存在
        let get = |key: &str| lookup(key).unwrap_or_default().trim().to_string();
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let source = SourceSettings {
            access_key_id: get("AWS_ACCESS_KEY_ID"),
            secret_access_key: get("AWS_SECRET_ACCESS_KEY"),
            region: get("AWS_REGION"),
            bucket: get("AWS_BUCKET_NAME"),
            endpoint: optional("AWS_ENDPOINT"),
        };

        let destination = match optional("DEST_TYPE").as_deref() {
            Some("local") => Destination::Local {
                path: PathBuf::from(get("DEST_PATH")),
            },
            _ => Destination::Azdls {
                account_name: get("AZURE_ADL_ACCOUNT_NAME"),
                account_key: get("AZURE_ADL_ACCOUNT_KEY"),
                filesystem: get("AZURE_ADL_FILESYSTEM"),
                endpoint: optional("AZURE_ADL_ENDPOINT"),
                root: optional("AZURE_ADL_ROOT"),
            },
        };

        let temp_folder = PathBuf::from(get(STAGING_KEY));

        let concurrency = parse_or(&lookup, "CONCURRENCY_NUMBER", default_concurrency())?;
        if concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "CONCURRENCY_NUMBER".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        let page_size = parse_or(&lookup, "PAGE_SIZE", default_page_size())?;
        if page_size == 0 || page_size > crate::storage::S3_PAGE_LIMIT {
            return Err(ConfigError::Invalid {
                key: "PAGE_SIZE".to_string(),
                value: page_size.to_string(),
                reason: format!("must be between 1 and {}", crate::storage::S3_PAGE_LIMIT),
            });
        }

        let enabled = match optional("USE_CACHE") {
            Some(v) => parse_flag("USE_CACHE", &v)?,
            None => false,
        };
        let backend = match optional("CACHE_BACKEND").as_deref() {
            None | Some("redis") => CacheBackend::Redis {
                host: optional("REDIS_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
                port: parse_or(&lookup, "REDIS_PORT", default_redis_port())?,
                password: optional("REDIS_PASSWORD"),
                db: parse_or(&lookup, "REDIS_DB", 0)?,
            },
            Some("sqlite") => CacheBackend::Sqlite {
                path: optional("CACHE_DB_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| temp_folder.join("sync_state.db")),
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "CACHE_BACKEND".to_string(),
                    value: other.to_string(),
                    reason: "expected 'redis' or 'sqlite'".to_string(),
                })
            }
        };

        Ok(Self {
            source,
            destination,
            concurrency,
            page_size,
            max_retries: parse_or(&lookup, "MAX_RETRIES", default_max_retries())?,
            retry_base_delay_ms: parse_or(
                &lookup,
                "RETRY_BASE_DELAY_MS",
                default_retry_base_delay_ms(),
            )?,
            object_timeout_secs: parse_or(
                &lookup,
                "OBJECT_TIMEOUT_SECS",
                default_object_timeout_secs(),
            )?,
            cache: CacheSettings { enabled, backend },
            temp_folder,
        })
    }

    /// 本次同步使用的暂存根目录
    pub fn staging_root(&self) -> PathBuf {
        self.temp_folder.join(STAGING_DIR_NAME)
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            max_concurrent_transfers: self.concurrency,
            page_size: self.page_size,
            max_retries: self.max_retries,
            retry_base_delay_ms: self.retry_base_delay_ms,
            object_timeout: Duration::from_secs(self.object_timeout_secs),
        }
    }
}
