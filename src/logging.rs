//! 日志模块 - 控制台输出 + 带大小限制的文件日志

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// 日志文件名（位于 TEMP_FOLDER 下，不会随暂存目录一起删除）
pub const LOG_FILE_NAME: &str = "logfile.log";

/// 日志配置
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 是否写文件日志
    pub enabled: bool,
    /// 最大日志文件大小（MB）
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    pub level: String,
    /// 日志目录，缺省时只输出到控制台
    pub log_dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size_mb: 5, // 默认 5MB
            level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl LogConfig {
    /// 从环境变量加载；此时配置尚未校验，所以缺项时回退到默认值
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            enabled: lookup("LOG_TO_FILE")
                .and_then(|v| crate::config::parse_flag("LOG_TO_FILE", &v).ok())
                .unwrap_or(defaults.enabled),
            max_size_mb: lookup("LOG_MAX_SIZE_MB")
                .and_then(|v| v.trim().parse().ok())
                .filter(|mb| *mb > 0)
                .unwrap_or(defaults.max_size_mb),
            level: lookup("LOG_LEVEL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.level),
            log_dir: lookup("TEMP_FOLDER")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" | "verbose" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

/// 初始化日志系统（进程内只调用一次）
pub fn init(config: &LogConfig) {
    let _ = tracing::subscriber::set_global_default(build_subscriber(config));
}

/// 控制台层 + 可选的文件层
pub fn build_subscriber(config: &LogConfig) -> impl tracing::Subscriber + Send + Sync + 'static {
    let env_filter = EnvFilter::builder()
        .with_default_directive(config.tracing_level().into())
        .from_env_lossy()
        .add_directive("hyper=warn".parse().expect("static directive"))
        .add_directive("reqwest=warn".parse().expect("static directive"))
        .add_directive("sqlx=warn".parse().expect("static directive"));

    let file_layer = config
        .log_dir
        .as_ref()
        .filter(|_| config.enabled)
        .and_then(|dir| match SizeRotatingWriter::new(dir, config.max_size_mb) {
            Ok(w) => Some(w),
            Err(e) => {
                eprintln!("无法创建日志文件 {:?}: {}", dir.join(LOG_FILE_NAME), e);
                None
            }
        })
        .map(|file_writer| {
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
        });

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
}

type SharedWriter = Arc<Mutex<Option<BufWriter<File>>>>;

/// 带大小限制的日志写入器
#[derive(Clone)]
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    writer: SharedWriter,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;

        let file_path = log_dir.join(LOG_FILE_NAME);
        let max_size = (max_size_mb as u64) * 1024 * 1024;

        let writer = Self::open_file(&file_path, max_size)?;

        Ok(Self {
            file_path,
            max_size,
            writer: Arc::new(Mutex::new(Some(writer))),
        })
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    fn open_file(file_path: &Path, max_size: u64) -> io::Result<BufWriter<File>> {
        // 检查现有文件大小，如果超过限制则轮转
        if let Ok(metadata) = fs::metadata(file_path) {
            if metadata.len() > max_size {
                Self::rotate_log(file_path)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        Ok(BufWriter::new(file))
    }

    /// 轮转日志文件：logfile.log -> logfile.log.old
    fn rotate_log(file_path: &Path) -> io::Result<()> {
        let backup_path = file_path.with_extension("log.old");

        if backup_path.exists() {
            fs::remove_file(&backup_path)?;
        }

        fs::rename(file_path, &backup_path)
    }
}

/// 日志写入器包装
pub struct LogWriter {
    inner: SharedWriter,
    file_path: PathBuf,
    max_size: u64,
}

impl LogWriter {
    fn rotate_if_needed(&self) {
        let too_big = fs::metadata(&self.file_path)
            .map(|m| m.len() > self.max_size)
            .unwrap_or(false);
        if !too_big {
            return;
        }

        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut w) = guard.take() {
            let _ = w.flush();
        }

        let _ = SizeRotatingWriter::rotate_log(&self.file_path);

        if let Ok(new_writer) = SizeRotatingWriter::open_file(&self.file_path, self.max_size) {
            *guard = Some(new_writer);
        }
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = {
            let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let writer = guard
                .as_mut()
                .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "Writer not available"))?;
            let written = writer.write(buf)?;
            writer.flush()?;
            written
        };

        self.rotate_if_needed();
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for SizeRotatingWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            inner: self.writer.clone(),
            file_path: self.file_path.clone(),
            max_size: self.max_size,
        }
    }
}
