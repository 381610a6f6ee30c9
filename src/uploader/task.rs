// 上传会话定义
//
// 状态机：
//   idle → uploading → processing → completed
//              │            │
//              ├→ failed ←──┘
//              └→ cancelled
// completed / failed / cancelled 为终态，只能通过 reset 回到 idle

use crate::uploader::progress::{calculate_speed, estimate_remaining, progress_percent};
use crate::uploader::UploadError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;
use uuid::Uuid;

/// 上传状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// 空闲（没有活跃会话）
    #[default]
    Idle,
    /// 上传中
    Uploading,
    /// 处理中（所有分片已送达，等待远端完成处理）
    Processing,
    /// 已完成
    Completed,
    /// 失败
    Failed,
    /// 已取消
    Cancelled,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Idle => "idle",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Processing => "processing",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
            UploadStatus::Cancelled => "cancelled",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadStatus::Completed | UploadStatus::Failed | UploadStatus::Cancelled
        )
    }

    /// 是否允许转换到 `next`
    pub fn can_transition_to(&self, next: UploadStatus) -> bool {
        use UploadStatus::*;
        matches!(
            (self, next),
            (Idle, Uploading)
                | (Uploading, Processing)
                | (Uploading, Failed)
                | (Uploading, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Completed, Idle)
                | (Failed, Idle)
                | (Cancelled, Idle)
        )
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 上传会话
///
/// 一次上传尝试对应一个会话，只存在于内存中；
/// reset 或开始新上传时丢弃
#[derive(Debug, Clone)]
pub struct UploadSession {
    /// 会话ID（每次上传唯一）
    pub id: String,
    /// 文件名
    pub file_name: String,
    /// 负载总大小
    pub total_size: u64,
    /// 总分片数
    pub total_chunks: usize,
    /// 已完成分片数
    pub completed_chunks: usize,
    /// 已确认送达的字节数（按分片实际大小累计）
    pub uploaded_bytes: u64,
    /// 开始时间
    pub started_at: Option<Instant>,
    /// 创建时间 (Unix timestamp)
    pub created_at: i64,
    /// 完成时间 (Unix timestamp)
    pub finished_at: Option<i64>,
    /// 当前状态
    pub status: UploadStatus,
    /// 上传速度 (bytes/s)
    pub speed: f64,
    /// 预计剩余时间（秒），None 表示无法估算
    pub eta: Option<f64>,
    /// 错误信息
    pub error: Option<String>,
}

impl Default for UploadSession {
    fn default() -> Self {
        Self::idle()
    }
}

impl UploadSession {
    /// 空闲会话（初始值）
    pub fn idle() -> Self {
        Self {
            id: String::new(),
            file_name: String::new(),
            total_size: 0,
            total_chunks: 0,
            completed_chunks: 0,
            uploaded_bytes: 0,
            started_at: None,
            created_at: 0,
            finished_at: None,
            status: UploadStatus::Idle,
            speed: 0.0,
            eta: None,
            error: None,
        }
    }

    /// 创建新的上传会话（进入 uploading 状态）
    pub fn begin(file_name: impl Into<String>, total_size: u64, total_chunks: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            file_name: file_name.into(),
            total_size,
            total_chunks,
            started_at: Some(Instant::now()),
            created_at: chrono::Utc::now().timestamp(),
            status: UploadStatus::Uploading,
            ..Self::idle()
        }
    }

    /// 状态转换
    pub fn transition(&mut self, next: UploadStatus) -> Result<(), UploadError> {
        if !self.status.can_transition_to(next) {
            return Err(UploadError::InvalidState {
                expected: next,
                actual: self.status,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(chrono::Utc::now().timestamp());
        }
        Ok(())
    }

    /// 标记为失败
    pub fn mark_failed(&mut self, error: String) -> Result<(), UploadError> {
        self.transition(UploadStatus::Failed)?;
        self.error = Some(error);
        Ok(())
    }

    /// 记录一个分片送达
    ///
    /// 只在 uploading 状态下生效；返回 false 表示被忽略
    /// （会话已取消/失败后才返回的分片不再计入进度）
    pub fn record_chunk(&mut self, chunk_bytes: u64) -> bool {
        if self.status != UploadStatus::Uploading || self.completed_chunks >= self.total_chunks {
            return false;
        }

        self.completed_chunks += 1;
        self.uploaded_bytes = (self.uploaded_bytes + chunk_bytes).min(self.total_size);

        let elapsed = self
            .started_at
            .map(|t| t.elapsed())
            .unwrap_or_default();
        self.speed = calculate_speed(self.uploaded_bytes, elapsed);
        self.eta = estimate_remaining(self.remaining_bytes(), self.speed);

        true
    }

    /// 剩余字节数
    pub fn remaining_bytes(&self) -> u64 {
        self.total_size.saturating_sub(self.uploaded_bytes)
    }

    /// 进度百分比
    pub fn progress(&self) -> u32 {
        if self.status == UploadStatus::Completed {
            return 100;
        }
        progress_percent(self.completed_chunks, self.total_chunks)
    }

    /// 只读快照
    pub fn snapshot(&self) -> UploadSnapshot {
        UploadSnapshot {
            session_id: (!self.id.is_empty()).then(|| self.id.clone()),
            file_name: (!self.file_name.is_empty()).then(|| self.file_name.clone()),
            status: self.status,
            progress: self.progress(),
            current_chunk: self.completed_chunks,
            total_chunks: self.total_chunks,
            uploaded_bytes: self.uploaded_bytes,
            total_size: self.total_size,
            upload_speed: self.speed,
            estimated_time: self.eta,
            error: self.error.clone(),
        }
    }
}

/// 上传状态快照（提供给展示层，只读）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UploadSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub status: UploadStatus,
    /// 进度百分比 0-100
    pub progress: u32,
    /// 已完成分片数
    pub current_chunk: usize,
    pub total_chunks: usize,
    pub uploaded_bytes: u64,
    pub total_size: u64,
    /// 上传速度 (bytes/s)
    pub upload_speed: f64,
    /// 预计剩余时间（秒），None 表示未知
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
