// 配置管理模块

use crate::uploader::{
    Backoff, RetryPolicy, UploadOptions, DEFAULT_MAX_CONCURRENT_CHUNKS, DEFAULT_MAX_RETRIES,
    DEFAULT_MAX_RETRY_DELAY_MS, DEFAULT_PROCESSING_DELAY_MS, DEFAULT_RETRY_BASE_DELAY_MS,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 上传服务端配置
    #[serde(default)]
    pub endpoint: EndpointConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 分片大小 (MB)
    #[serde(default = "default_chunk_size_mb")]
    pub chunk_size_mb: u64,
    /// 单个会话最大并发分片数
    #[serde(default = "default_max_concurrent_chunks")]
    pub max_concurrent_chunks: usize,
    /// 每个分片最大尝试次数（包含第一次）
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 重试基础延迟（毫秒）
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// 退避方式：linear / exponential
    #[serde(default)]
    pub backoff: Backoff,
    /// 重试延迟上限（毫秒）
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    /// 处理阶段等待时间（毫秒）
    #[serde(default = "default_processing_delay_ms")]
    pub processing_delay_ms: u64,
}

fn default_chunk_size_mb() -> u64 {
    5
}

fn default_max_concurrent_chunks() -> usize {
    DEFAULT_MAX_CONCURRENT_CHUNKS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_base_delay_ms() -> u64 {
    DEFAULT_RETRY_BASE_DELAY_MS
}

fn default_max_retry_delay_ms() -> u64 {
    DEFAULT_MAX_RETRY_DELAY_MS
}

fn default_processing_delay_ms() -> u64 {
    DEFAULT_PROCESSING_DELAY_MS
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size_mb: default_chunk_size_mb(),
            max_concurrent_chunks: default_max_concurrent_chunks(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            backoff: Backoff::default(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            processing_delay_ms: default_processing_delay_ms(),
        }
    }
}

impl UploadConfig {
    /// 分片大小（字节）
    pub fn chunk_size_bytes(&self) -> u64 {
        self.chunk_size_mb.saturating_mul(1024 * 1024)
    }

    /// 转换为上传引擎参数
    pub fn to_options(&self) -> UploadOptions {
        UploadOptions {
            chunk_size: self.chunk_size_bytes(),
            max_concurrent_chunks: self.max_concurrent_chunks,
            retry: RetryPolicy {
                max_attempts: self.max_retries,
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
                backoff: self.backoff,
                max_delay: Duration::from_millis(self.max_retry_delay_ms),
            },
            processing_delay: Duration::from_millis(self.processing_delay_ms),
        }
    }

    /// 验证配置
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size_mb == 0 {
            return Err("分片大小必须大于 0".to_string());
        }
        if self.max_concurrent_chunks == 0 {
            return Err("最大并发分片数必须大于 0".to_string());
        }
        if self.max_retries == 0 {
            return Err("最大尝试次数必须大于 0".to_string());
        }
        Ok(())
    }
}

/// 上传服务端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// 服务端地址
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 分片上传路径
    #[serde(default = "default_upload_path")]
    pub upload_path: String,
    /// 单次请求超时（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_upload_path() -> String {
    "/upload".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            upload_path: default_upload_path(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EndpointConfig {
    /// 完整的分片上传地址
    pub fn upload_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.upload_path.trim_start_matches('/')
        )
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        config
            .validate()
            .context("配置文件中的上传参数验证失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.validate().context("保存配置失败")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);

        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                let default_config = Self::default();

                // 配置文件不存在时写出默认配置，已存在但无效时保留原文件
                if !std::path::Path::new(path).exists() {
                    if let Err(e) = default_config.save_to_file(path).await {
                        tracing::error!("保存默认配置失败: {}", e);
                    }
                }

                default_config
            }
        }
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        self.upload.validate().map_err(anyhow::Error::msg)?;
        if self.endpoint.base_url.trim().is_empty() {
            anyhow::bail!("服务端地址不能为空");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.upload.chunk_size_mb, 5);
        assert_eq!(config.upload.max_concurrent_chunks, 3);
        assert_eq!(config.upload.max_retries, 3);
        assert_eq!(config.upload.backoff, Backoff::Linear);
        assert_eq!(config.endpoint.upload_url(), "http://localhost:8080/upload");
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();

        let mut config = AppConfig::default();
        config.upload.chunk_size_mb = 8;
        config.upload.backoff = Backoff::Exponential;
        config.endpoint.base_url = "https://media.example.com".to_string();
        config.save_to_file(path).await.unwrap();

        let loaded = AppConfig::load_from_file(path).await.unwrap();
        assert_eq!(loaded.upload.chunk_size_mb, 8);
        assert_eq!(loaded.upload.backoff, Backoff::Exponential);
        assert_eq!(loaded.endpoint.base_url, "https://media.example.com");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [upload]
            max_concurrent_chunks = 6
            backoff = "exponential"
            "#,
        )
        .unwrap();
        assert_eq!(config.upload.max_concurrent_chunks, 6);
        assert_eq!(config.upload.chunk_size_mb, 5);
        assert_eq!(config.upload.backoff, Backoff::Exponential);
        assert_eq!(config.endpoint.timeout_secs, 60);
        assert!(config.log.enabled);
    }

    #[test]
    fn test_to_options() {
        let config = UploadConfig {
            chunk_size_mb: 2,
            max_concurrent_chunks: 4,
            max_retries: 5,
            retry_base_delay_ms: 250,
            backoff: Backoff::Exponential,
            max_retry_delay_ms: 4000,
            processing_delay_ms: 0,
        };
        let options = config.to_options();
        assert_eq!(options.chunk_size, 2 * 1024 * 1024);
        assert_eq!(options.max_concurrent_chunks, 4);
        assert_eq!(options.retry.max_attempts, 5);
        assert_eq!(options.retry.delay_after(3), Duration::from_millis(1000));
        assert_eq!(options.processing_delay, Duration::ZERO);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = UploadConfig::default();
        config.chunk_size_mb = 0;
        assert!(config.validate().is_err());

        let mut config = UploadConfig::default();
        config.max_concurrent_chunks = 0;
        assert!(config.validate().is_err());

        let mut config = UploadConfig::default();
        config.max_retries = 0;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_invalid_config_fails() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), "[upload]\nchunk_size_mb = 0\n").unwrap();

        let result = AppConfig::load_from_file(temp_file.path().to_str().unwrap()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_load_or_default_writes_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let path = path.to_str().unwrap();

        let config = AppConfig::load_or_default(path).await;
        assert_eq!(config.upload.chunk_size_mb, 5);
        assert!(std::path::Path::new(path).exists());
    }
}
