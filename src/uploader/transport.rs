// 外部协作者接口
//
// Transport：把单个分片投递到远端（网络调用本身不属于上传核心）
// Finalizer：所有分片送达后的处理阶段（合并、转码等由远端完成）
//
// 元数据放置约定：
// - 标题随第一个分片（index 0）发送
// - 附件（例如缩略图）随最后一个分片发送
// 分片完成顺序不保证，服务端需要自行按索引组装

use crate::uploader::TransportError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// 附加文件（例如缩略图）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl Artifact {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            data,
        }
    }
}

/// 单个分片投递请求
#[derive(Debug, Clone)]
pub struct ChunkRequest<'a> {
    pub session_id: &'a str,
    pub file_name: &'a str,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub data: &'a [u8],
    /// 仅第一个分片携带
    pub title: Option<&'a str>,
    /// 仅最后一个分片携带
    pub artifact: Option<&'a Artifact>,
}

/// 分片传输
///
/// 同一索引的分片可能被重复投递（重试），实现方需要保证覆盖或忽略，
/// 不能重复拼接
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver_chunk(&self, request: ChunkRequest<'_>) -> Result<(), TransportError>;
}

/// 处理阶段
#[async_trait]
pub trait Finalizer: Send + Sync {
    async fn finalize(&self, session_id: &str, file_name: &str) -> Result<(), TransportError>;
}

/// 固定延迟的处理阶段（远端异步处理，客户端只等待固定时间）
#[derive(Debug, Clone)]
pub struct DelayFinalizer {
    delay: Duration,
}

impl DelayFinalizer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for DelayFinalizer {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl Finalizer for DelayFinalizer {
    async fn finalize(&self, session_id: &str, file_name: &str) -> Result<(), TransportError> {
        info!(
            "会话 {} 进入处理阶段: file={}, 等待 {}ms",
            session_id,
            file_name,
            self.delay.as_millis()
        );
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}
