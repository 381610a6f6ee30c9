use anyhow::{Context, Result};
use chunked_uploader::{
    config::LogConfig,
    logging,
    uploader::{format_duration, format_file_size},
    AppConfig, Artifact, FilePayload, Payload, UploadEvent, UploadManager, UploadStatus,
};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Chunked video upload client")]
struct Cli {
    /// File to upload
    file: PathBuf,
    /// Title sent with the first chunk
    #[arg(short, long)]
    title: String,
    /// Optional thumbnail image sent with the last chunk
    #[arg(long)]
    thumbnail: Option<PathBuf>,
    /// Config file path
    #[arg(short, long, default_value = "config/app.toml")]
    config: String,
}

/// 在完整配置加载前读取日志配置，失败时使用默认值
async fn load_log_config(config_path: &str) -> LogConfig {
    if let Ok(content) = tokio::fs::read_to_string(config_path).await {
        if let Ok(config) = toml::from_str::<toml::Value>(&content) {
            if let Some(log_table) = config.get("log") {
                if let Ok(log_config) = log_table.clone().try_into::<LogConfig>() {
                    return log_config;
                }
            }
        }
    }
    LogConfig::default()
}

fn guess_mime_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

async fn load_thumbnail(path: &Path) -> Result<Artifact> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("读取缩略图失败: {:?}", path))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("thumbnail")
        .to_string();
    Ok(Artifact::new(file_name, guess_mime_type(path), data))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = load_log_config(&cli.config).await;
    // 必须保持 _log_guard 存活
    let _log_guard = logging::init_logging(&log_config);

    let config = AppConfig::load_or_default(&cli.config).await;
    info!(
        "上传服务端: {}, 分片大小: {}MB, 并发: {}",
        config.endpoint.upload_url(),
        config.upload.chunk_size_mb,
        config.upload.max_concurrent_chunks
    );

    let payload = FilePayload::open(&cli.file)
        .await
        .with_context(|| format!("打开上传文件失败: {:?}", cli.file))?;
    info!(
        "上传文件: {:?}, 大小: {}",
        payload.path(),
        format_file_size(payload.size())
    );
    let thumbnail = match &cli.thumbnail {
        Some(path) => Some(load_thumbnail(path).await?),
        None => None,
    };

    let manager = UploadManager::from_config(&config)?;

    // 进度输出
    let mut events = manager.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(UploadEvent::Progress {
                    progress,
                    current_chunk,
                    total_chunks,
                    uploaded_bytes,
                    upload_speed,
                    estimated_time,
                    ..
                }) => {
                    let eta = estimated_time
                        .map(|s| format_duration(s.round() as u64))
                        .unwrap_or_else(|| "--:--".to_string());
                    println!(
                        "{:>3}%  {}/{} 分片  {}  {}/s  剩余 {}",
                        progress,
                        current_chunk,
                        total_chunks,
                        format_file_size(uploaded_bytes),
                        format_file_size(upload_speed as u64),
                        eta
                    );
                }
                Ok(UploadEvent::StatusChanged { new_status, .. }) => {
                    if new_status == UploadStatus::Processing {
                        println!("所有分片已上传，等待服务端处理...");
                    }
                }
                Ok(event) if event.is_terminal() => break,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("进度事件积压，跳过 {} 条", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Ctrl-C 取消上传
    let canceller = manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() && canceller.cancel() {
            println!("正在取消上传...");
        }
    });

    let file_size = payload.size();
    let snapshot = manager
        .start(Arc::new(payload), cli.title, thumbnail)
        .await?;
    let _ = printer.await;

    match snapshot.status {
        UploadStatus::Completed => {
            println!(
                "✓ 上传完成: {} ({})",
                snapshot.file_name.unwrap_or_default(),
                format_file_size(file_size)
            );
            Ok(())
        }
        UploadStatus::Cancelled => {
            println!(
                "上传已取消 ({}/{} 分片已完成)",
                snapshot.current_chunk, snapshot.total_chunks
            );
            Ok(())
        }
        status => {
            let message = snapshot.error.unwrap_or_else(|| status.to_string());
            error!("上传失败: {}", message);
            anyhow::bail!("上传失败: {}", message)
        }
    }
}
