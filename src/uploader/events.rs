//! 上传事件
//!
//! 每次分片完成和状态转换时发布，展示层通过订阅获得更新

use crate::uploader::UploadStatus;
use serde::{Deserialize, Serialize};

/// 上传事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum UploadEvent {
    /// 会话开始
    Started {
        session_id: String,
        file_name: String,
        total_size: u64,
        total_chunks: usize,
    },
    /// 进度更新（每个分片完成时）
    Progress {
        session_id: String,
        chunk_index: usize,
        progress: u32,
        current_chunk: usize,
        total_chunks: usize,
        uploaded_bytes: u64,
        upload_speed: f64,
        estimated_time: Option<f64>,
    },
    /// 状态变更
    StatusChanged {
        session_id: String,
        old_status: UploadStatus,
        new_status: UploadStatus,
    },
    /// 上传完成
    Completed {
        session_id: String,
        completed_at: i64,
    },
    /// 上传失败
    Failed { session_id: String, error: String },
    /// 用户取消
    Cancelled { session_id: String },
}

impl UploadEvent {
    /// 获取会话 ID
    pub fn session_id(&self) -> &str {
        match self {
            UploadEvent::Started { session_id, .. } => session_id,
            UploadEvent::Progress { session_id, .. } => session_id,
            UploadEvent::StatusChanged { session_id, .. } => session_id,
            UploadEvent::Completed { session_id, .. } => session_id,
            UploadEvent::Failed { session_id, .. } => session_id,
            UploadEvent::Cancelled { session_id } => session_id,
        }
    }

    /// 获取事件类型名称
    pub fn event_type_name(&self) -> &'static str {
        match self {
            UploadEvent::Started { .. } => "started",
            UploadEvent::Progress { .. } => "progress",
            UploadEvent::StatusChanged { .. } => "status_changed",
            UploadEvent::Completed { .. } => "completed",
            UploadEvent::Failed { .. } => "failed",
            UploadEvent::Cancelled { .. } => "cancelled",
        }
    }

    /// 是否为终态事件
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadEvent::Completed { .. } | UploadEvent::Failed { .. } | UploadEvent::Cancelled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = UploadEvent::StatusChanged {
            session_id: "s1".to_string(),
            old_status: UploadStatus::Uploading,
            new_status: UploadStatus::Processing,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "status_changed");
        assert_eq!(json["new_status"], "processing");
        assert_eq!(event.session_id(), "s1");
        assert!(!event.is_terminal());

        let back: UploadEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_terminal_events() {
        let cancelled = UploadEvent::Cancelled {
            session_id: "s1".to_string(),
        };
        assert!(cancelled.is_terminal());
        assert_eq!(cancelled.event_type_name(), "cancelled");
    }
}
