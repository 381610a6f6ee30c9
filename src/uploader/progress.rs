// 进度计算与发布
//
// - 进度百分比：round(已完成分片 / 总分片 × 100)
// - 速度：已确认字节 / 已用时间
// - 剩余时间：剩余字节 / 速度，速度为 0 或接近 0 时为未知
//
// ProgressReporter 独占会话状态，所有计数器修改都在同一把锁内完成，
// 观察者只能拿到快照副本

use crate::uploader::{UploadError, UploadEvent, UploadSession, UploadSnapshot, UploadStatus};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// 低于该速度（bytes/s）视为无法估算剩余时间
const MIN_SPEED_FOR_ETA: f64 = 1e-6;

/// 低于该耗时视为无法计算速度
const MIN_ELAPSED_FOR_SPEED: Duration = Duration::from_millis(1);

/// 事件通道容量
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// 计算进度百分比
pub fn progress_percent(completed_chunks: usize, total_chunks: usize) -> u32 {
    if total_chunks == 0 {
        return 0;
    }
    let percent = (completed_chunks as f64 / total_chunks as f64 * 100.0).round();
    percent.clamp(0.0, 100.0) as u32
}

/// 计算平均速度 (bytes/s)
pub fn calculate_speed(confirmed_bytes: u64, elapsed: Duration) -> f64 {
    if confirmed_bytes == 0 || elapsed < MIN_ELAPSED_FOR_SPEED {
        return 0.0;
    }
    confirmed_bytes as f64 / elapsed.as_secs_f64()
}

/// 估算剩余时间（秒）
///
/// 速度为 0 或接近 0 时返回 None（未知），不会返回 NaN 或无穷大
pub fn estimate_remaining(remaining_bytes: u64, speed: f64) -> Option<f64> {
    if !speed.is_finite() || speed < MIN_SPEED_FOR_ETA {
        return None;
    }
    let eta = remaining_bytes as f64 / speed;
    eta.is_finite().then(|| eta.max(0.0))
}

/// 格式化文件大小
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let formatted = format!("{:.2}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, UNITS[unit])
}

/// 格式化时长（h:mm:ss 或 m:ss）
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

/// 进度发布器
///
/// 持有当前会话，负责状态转换、计数器更新，并在每次变化后
/// 发布快照（watch）和事件（broadcast）
#[derive(Debug)]
pub struct ProgressReporter {
    session: Mutex<UploadSession>,
    snapshot_tx: watch::Sender<UploadSnapshot>,
    event_tx: broadcast::Sender<UploadEvent>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        let (snapshot_tx, _) = watch::channel(UploadSnapshot::default());
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            session: Mutex::new(UploadSession::idle()),
            snapshot_tx,
            event_tx,
        }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.event_tx.subscribe()
    }

    /// 订阅最新快照
    pub fn watch(&self) -> watch::Receiver<UploadSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// 当前快照
    pub fn snapshot(&self) -> UploadSnapshot {
        self.session.lock().snapshot()
    }

    /// 当前状态
    pub fn status(&self) -> UploadStatus {
        self.session.lock().status
    }

    /// 指定会话的快照
    ///
    /// 会话已被 reset 或替换时返回 None
    pub fn session_snapshot(&self, session_id: &str) -> Option<UploadSnapshot> {
        let session = self.session.lock();
        (session.id == session_id).then(|| session.snapshot())
    }

    fn publish(&self, session: &UploadSession, event: Option<UploadEvent>) {
        self.snapshot_tx.send_replace(session.snapshot());
        if let Some(event) = event {
            // 没有订阅者时发送失败，忽略
            let _ = self.event_tx.send(event);
        }
    }

    fn publish_transition(&self, session: &UploadSession, old_status: UploadStatus) {
        self.publish(
            session,
            Some(UploadEvent::StatusChanged {
                session_id: session.id.clone(),
                old_status,
                new_status: session.status,
            }),
        );
    }

    /// 开始新会话（要求当前为 idle）
    ///
    /// 返回新会话 ID
    pub fn begin(
        &self,
        file_name: &str,
        total_size: u64,
        total_chunks: usize,
    ) -> Result<String, UploadError> {
        let mut session = self.session.lock();
        if session.status != UploadStatus::Idle {
            return Err(UploadError::InvalidState {
                expected: UploadStatus::Idle,
                actual: session.status,
            });
        }

        *session = UploadSession::begin(file_name, total_size, total_chunks);
        let session_id = session.id.clone();

        info!(
            "会话 {} 开始上传: file={}, size={} bytes, 分片数={}",
            session_id, file_name, total_size, total_chunks
        );

        self.publish(
            &session,
            Some(UploadEvent::Started {
                session_id: session_id.clone(),
                file_name: session.file_name.clone(),
                total_size,
                total_chunks,
            }),
        );
        self.publish_transition(&session, UploadStatus::Idle);

        Ok(session_id)
    }

    /// 记录分片送达
    ///
    /// 会话已切换（reset 后的新会话）或不在 uploading 状态时忽略，返回 false
    pub fn record_chunk(&self, session_id: &str, chunk_index: usize, chunk_bytes: u64) -> bool {
        let mut session = self.session.lock();
        if session.id != session_id || !session.record_chunk(chunk_bytes) {
            debug!(
                "会话 {} 分片 #{} 的完成结果被忽略 (当前状态: {})",
                session_id, chunk_index, session.status
            );
            return false;
        }

        let snapshot = session.snapshot();
        self.publish(
            &session,
            Some(UploadEvent::Progress {
                session_id: session.id.clone(),
                chunk_index,
                progress: snapshot.progress,
                current_chunk: snapshot.current_chunk,
                total_chunks: snapshot.total_chunks,
                uploaded_bytes: snapshot.uploaded_bytes,
                upload_speed: snapshot.upload_speed,
                estimated_time: snapshot.estimated_time,
            }),
        );
        true
    }

    /// 状态转换（processing / completed）
    ///
    /// 返回转换后的快照
    pub fn transition(
        &self,
        session_id: &str,
        next: UploadStatus,
    ) -> Result<UploadSnapshot, UploadError> {
        let mut session = self.session.lock();
        if session.id != session_id {
            return Err(UploadError::InvalidState {
                expected: next,
                actual: session.status,
            });
        }

        let old_status = session.status;
        session.transition(next)?;
        self.publish_transition(&session, old_status);

        if next == UploadStatus::Completed {
            info!("会话 {} 上传完成: {}", session.id, session.file_name);
            self.publish(
                &session,
                Some(UploadEvent::Completed {
                    session_id: session.id.clone(),
                    completed_at: chrono::Utc::now().timestamp_millis(),
                }),
            );
        }
        Ok(session.snapshot())
    }

    /// 标记会话失败
    ///
    /// 会话已被替换或已处于终态（例如已取消）时忽略，返回 None
    pub fn fail(&self, session_id: &str, error: &UploadError) -> Option<UploadSnapshot> {
        let mut session = self.session.lock();
        if session.id != session_id || session.status.is_terminal() {
            return None;
        }

        let old_status = session.status;
        let message = error.to_string();
        if let Err(e) = session.mark_failed(message.clone()) {
            warn!("会话 {} 无法标记为失败: {}", session_id, e);
            return None;
        }

        self.publish_transition(&session, old_status);
        self.publish(
            &session,
            Some(UploadEvent::Failed {
                session_id: session.id.clone(),
                error: message,
            }),
        );
        Some(session.snapshot())
    }

    /// 取消指定会话（仅 uploading 状态有效）
    ///
    /// 返回 Some(快照) 表示本次调用完成了取消；
    /// 会话已被替换或不在 uploading 状态时返回 None
    pub fn cancel(&self, session_id: &str) -> Option<UploadSnapshot> {
        let mut session = self.session.lock();
        if session.id != session_id || session.status != UploadStatus::Uploading {
            return None;
        }

        let old_status = session.status;
        if session.transition(UploadStatus::Cancelled).is_err() {
            return None;
        }

        info!(
            "会话 {} 已取消 ({}/{} 分片已完成)",
            session.id, session.completed_chunks, session.total_chunks
        );

        self.publish_transition(&session, old_status);
        self.publish(
            &session,
            Some(UploadEvent::Cancelled {
                session_id: session.id.clone(),
            }),
        );
        Some(session.snapshot())
    }

    /// 重置为 idle
    ///
    /// idle 下调用为空操作；uploading / processing 下返回错误
    pub fn reset(&self) -> Result<(), UploadError> {
        let mut session = self.session.lock();
        match session.status {
            UploadStatus::Idle => Ok(()),
            status if status.is_terminal() => {
                debug!("会话 {} 已重置", session.id);
                *session = UploadSession::idle();
                self.publish(&session, None);
                Ok(())
            }
            status => Err(UploadError::InvalidState {
                expected: UploadStatus::Idle,
                actual: status,
            }),
        }
    }
}
