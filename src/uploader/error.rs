// 上传错误定义
//
// 错误分层：
// - TransportError：单次分片投递失败（可重试）
// - UploadError：会话级错误（重试耗尽、状态非法、取消等）

use crate::uploader::UploadStatus;

/// 单次分片投递失败
///
/// 由 Transport 返回，调度器在重试预算内吞掉并重试
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    /// 可读的错误描述
    pub message: String,
    /// HTTP 状态码（如果有）
    pub status: Option<u16>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
        }
    }
}

/// 上传会话错误
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// 分片大小必须大于 0
    #[error("分片大小必须大于 0")]
    InvalidChunkSize,

    /// 当前状态不允许该操作（例如未 reset 就重新 start）
    #[error("当前状态 {actual} 不允许该操作，需要 {expected}")]
    InvalidState {
        expected: UploadStatus,
        actual: UploadStatus,
    },

    /// 分片在最后一次尝试仍然失败，整个会话失败
    #[error("分片 #{index} 上传失败（共尝试 {attempts} 次）: {source}")]
    RetryExhausted {
        index: usize,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// 用户主动取消（不是真正的错误，而是终态）
    #[error("上传已取消")]
    Cancelled,

    /// 读取负载数据失败
    #[error("读取上传数据失败: {0}")]
    Payload(#[from] std::io::Error),

    /// 分片任务异常退出（panic 等）
    #[error("分片任务异常: {0}")]
    Worker(String),

    /// 后处理阶段失败
    #[error("处理阶段失败: {0}")]
    Finalization(#[source] TransportError),
}

impl UploadError {
    /// 是否为用户取消
    pub fn is_cancelled(&self) -> bool {
        matches!(self, UploadError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_exhausted_message_contains_transport_error() {
        let err = UploadError::RetryExhausted {
            index: 2,
            attempts: 3,
            source: TransportError::with_status(500, "Upload failed: Internal Server Error"),
        };
        let msg = err.to_string();
        assert!(msg.contains("#2"));
        assert!(msg.contains("Internal Server Error"));
    }

    #[test]
    fn test_invalid_state_message() {
        let err = UploadError::InvalidState {
            expected: UploadStatus::Idle,
            actual: UploadStatus::Completed,
        };
        assert!(err.to_string().contains("completed"));
        assert!(!err.is_cancelled());
        assert!(UploadError::Cancelled.is_cancelled());
    }
}
