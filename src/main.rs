//! lakesync - 把 S3 桶增量同步到 Data Lake

use std::process::ExitCode;

use clap::Parser;
use lakesync::logging::{self, LogConfig};
use lakesync::Settings;
use tracing::{error, info};

/// S3 -> Data Lake 增量同步
#[derive(Parser)]
#[command(name = "lakesync")]
#[command(version)]
#[command(about = "Mirror an S3 bucket into a data lake, uploading only new or changed objects")]
struct Cli {
    /// 最大并发上传数（覆盖 CONCURRENCY_NUMBER）
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    concurrency: Option<u32>,

    /// 开启决策缓存（覆盖 USE_CACHE）
    #[arg(long, conflicts_with = "no_cache")]
    use_cache: bool,

    /// 关闭决策缓存（覆盖 USE_CACHE）
    #[arg(long)]
    no_cache: bool,

    /// 日志级别: error, warn, info, debug, trace（覆盖 LOG_LEVEL）
    #[arg(long)]
    log_level: Option<String>,

    /// 结束时把同步报告以 JSON 输出到标准输出
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(concurrency) = self.concurrency {
            settings.concurrency = concurrency as usize;
        }
        if self.use_cache {
            settings.cache.enabled = true;
        }
        if self.no_cache {
            settings.cache.enabled = false;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env();
    if let Some(level) = &cli.log_level {
        log_config.level = level.clone();
    }
    logging::init(&log_config);

    let mut settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    cli.apply(&mut settings);

    let engine = match lakesync::build_engine(&settings).await {
        Ok(engine) => engine,
        Err(e) => {
            error!("初始化失败: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("收到中断信号，等待进行中的任务完成...");
            cancel.cancel();
        }
    });

    match engine.run().await {
        Ok(report) => {
            if cli.json {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{}", json),
                    Err(e) => error!("序列化同步报告失败: {}", e),
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("同步失败: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
