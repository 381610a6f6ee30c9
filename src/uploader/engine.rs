// 上传引擎
//
// 核心功能：
// 1. 按分片索引顺序派发，最多 K 个分片同时在途
// 2. 单个分片失败时按退避策略重试，重试耗尽则整个会话失败
// 3. 协作式取消：不打断已在途的传输调用，只停止派发新的尝试
// 4. 所有分片送达后进入处理阶段
//
// 并发上传策略：
// - K 个 worker 从共享队列按索引顺序领取分片
// - JoinSet 管理 worker，任一 worker 返回错误即终止会话
// - 失败时通过子令牌通知其余 worker 停止领取新分片
// - 取消或失败后不再等待在途的传输调用（detach）

use crate::uploader::{
    Artifact, ChunkDescriptor, ChunkRequest, Finalizer, Payload, ProgressReporter, RetryPolicy,
    Transport, UploadError, UploadSnapshot, UploadStatus, DEFAULT_CHUNK_SIZE,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 默认最大并发分片数
pub const DEFAULT_MAX_CONCURRENT_CHUNKS: usize = 3;

/// 默认处理阶段等待时间（毫秒）
pub const DEFAULT_PROCESSING_DELAY_MS: u64 = 1000;

/// 上传参数
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// 分片大小
    pub chunk_size: u64,
    /// 最大并发分片数
    pub max_concurrent_chunks: usize,
    /// 重试策略
    pub retry: RetryPolicy,
    /// 处理阶段等待时间（使用默认 DelayFinalizer 时生效）
    pub processing_delay: Duration,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrent_chunks: DEFAULT_MAX_CONCURRENT_CHUNKS,
            retry: RetryPolicy::default(),
            processing_delay: Duration::from_millis(DEFAULT_PROCESSING_DELAY_MS),
        }
    }
}

/// 会话元数据
#[derive(Debug, Clone, Default)]
pub struct UploadMetadata {
    /// 标题，随第一个分片发送
    pub title: String,
    /// 附件（缩略图），随最后一个分片发送
    pub thumbnail: Option<Artifact>,
}

/// 会话句柄
///
/// 取消令牌绑定到单个会话 ID，终态快照只记录第一次结果。
/// 会话被 reset 并由新会话替换后，旧句柄的取消不会影响新会话
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: String,
    pub cancel_token: CancellationToken,
    terminal: Arc<Mutex<Option<UploadSnapshot>>>,
}

impl SessionHandle {
    pub fn new(session_id: String) -> Self {
        Self {
            session_id,
            cancel_token: CancellationToken::new(),
            terminal: Arc::new(Mutex::new(None)),
        }
    }

    /// 取消本会话（仅 uploading 状态有效）
    ///
    /// 返回 true 表示本次调用完成了取消
    pub fn cancel(&self, reporter: &ProgressReporter) -> bool {
        // 先持有终态锁，读取终态快照的一方会等到取消记录完成
        let mut terminal = self.terminal.lock();
        match reporter.cancel(&self.session_id) {
            Some(snapshot) => {
                terminal.get_or_insert(snapshot);
                drop(terminal);
                self.cancel_token.cancel();
                true
            }
            None => false,
        }
    }

    /// 本会话的终态快照，会话未结束时为 None
    pub fn terminal_snapshot(&self) -> Option<UploadSnapshot> {
        self.terminal.lock().clone()
    }

    fn settle(&self, snapshot: UploadSnapshot) {
        self.terminal.lock().get_or_insert(snapshot);
    }

    fn fail(&self, reporter: &ProgressReporter, error: &UploadError) -> bool {
        let mut terminal = self.terminal.lock();
        match reporter.fail(&self.session_id, error) {
            Some(snapshot) => {
                terminal.get_or_insert(snapshot);
                true
            }
            None => false,
        }
    }
}

/// 一次上传任务
pub struct UploadJob {
    pub session: SessionHandle,
    pub payload: Arc<dyn Payload>,
    pub chunks: Vec<ChunkDescriptor>,
    pub metadata: UploadMetadata,
}

/// 上传引擎
///
/// 负责单个会话的分片调度、重试和状态推进；
/// 会话计数器只通过 ProgressReporter 修改
pub struct UploadEngine {
    transport: Arc<dyn Transport>,
    finalizer: Arc<dyn Finalizer>,
    reporter: Arc<ProgressReporter>,
    max_concurrent_chunks: usize,
    retry: RetryPolicy,
}

impl UploadEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        finalizer: Arc<dyn Finalizer>,
        reporter: Arc<ProgressReporter>,
        options: &UploadOptions,
    ) -> Self {
        Self {
            transport,
            finalizer,
            reporter,
            max_concurrent_chunks: options.max_concurrent_chunks.max(1),
            retry: options.retry.clone(),
        }
    }

    /// 执行上传，并把结果写入会话终态
    ///
    /// 返回 Err(Cancelled) 表示会话以取消结束
    pub async fn run(&self, job: UploadJob) -> Result<(), UploadError> {
        let session = job.session.clone();

        match self.upload(job).await {
            Ok(snapshot) => {
                session.settle(snapshot);
                Ok(())
            }
            Err(UploadError::Cancelled) => {
                session.cancel(&self.reporter);
                Err(UploadError::Cancelled)
            }
            Err(e) => {
                if session.fail(&self.reporter, &e) {
                    error!("会话 {} 上传失败: {}", session.session_id, e);
                    Err(e)
                } else {
                    // 会话已先一步以取消结束
                    debug!("会话 {} 已结束，忽略错误: {}", session.session_id, e);
                    Err(UploadError::Cancelled)
                }
            }
        }
    }

    async fn upload(&self, job: UploadJob) -> Result<UploadSnapshot, UploadError> {
        let UploadJob {
            session,
            payload,
            chunks,
            metadata,
        } = job;
        let session_id = session.session_id.as_str();
        let cancel_token = &session.cancel_token;
        let file_name = payload.name().to_string();

        self.upload_chunks(session_id, payload, chunks, metadata, cancel_token)
            .await?;

        // 进入处理阶段前检查取消
        if cancel_token.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        self.reporter
            .transition(session_id, UploadStatus::Processing)?;

        self.finalizer
            .finalize(session_id, &file_name)
            .await
            .map_err(UploadError::Finalization)?;

        self.reporter.transition(session_id, UploadStatus::Completed)
    }

    /// 并发上传所有分片
    async fn upload_chunks(
        &self,
        session_id: &str,
        payload: Arc<dyn Payload>,
        chunks: Vec<ChunkDescriptor>,
        metadata: UploadMetadata,
        cancel_token: &CancellationToken,
    ) -> Result<(), UploadError> {
        let total_chunks = chunks.len();
        let worker_count = self.max_concurrent_chunks.min(total_chunks);

        info!(
            "[并发上传] 会话 {} 开始上传 {} 个分片，并发数: {}",
            session_id, total_chunks, worker_count
        );

        // 失败时只停止本会话的 worker，不影响调用方持有的取消令牌
        let halt = cancel_token.child_token();
        let queue = Arc::new(Mutex::new(VecDeque::from(chunks)));
        let metadata = Arc::new(metadata);

        let mut join_set = JoinSet::new();
        for worker_id in 1..=worker_count {
            let worker = ChunkWorker {
                worker_id,
                session_id: session_id.to_string(),
                total_chunks,
                payload: payload.clone(),
                transport: self.transport.clone(),
                reporter: self.reporter.clone(),
                metadata: metadata.clone(),
                queue: queue.clone(),
                retry: self.retry.clone(),
                halt: halt.clone(),
            };
            join_set.spawn(worker.run());
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => {
                    info!("[并发上传] 会话 {} 已取消，不再等待在途分片", session_id);
                    join_set.detach_all();
                    return Err(UploadError::Cancelled);
                }
                result = join_set.join_next() => {
                    let outcome = match result {
                        None => break,
                        Some(Ok(outcome)) => outcome,
                        Some(Err(e)) => {
                            error!("[并发上传] 分片任务异常: {}", e);
                            Err(UploadError::Worker(e.to_string()))
                        }
                    };

                    if let Err(e) = outcome {
                        halt.cancel();
                        join_set.detach_all();
                        return Err(e);
                    }
                }
            }
        }

        if cancel_token.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        info!(
            "[并发上传] 会话 {} 所有 {} 个分片上传完成",
            session_id, total_chunks
        );
        Ok(())
    }
}

/// 分片 worker
///
/// 从共享队列按索引顺序领取分片，直到队列为空或收到停止信号
struct ChunkWorker {
    worker_id: usize,
    session_id: String,
    total_chunks: usize,
    payload: Arc<dyn Payload>,
    transport: Arc<dyn Transport>,
    reporter: Arc<ProgressReporter>,
    metadata: Arc<UploadMetadata>,
    queue: Arc<Mutex<VecDeque<ChunkDescriptor>>>,
    retry: RetryPolicy,
    halt: CancellationToken,
}

impl ChunkWorker {
    async fn run(self) -> Result<(), UploadError> {
        loop {
            if self.halt.is_cancelled() {
                return Ok(());
            }

            let chunk = match self.queue.lock().pop_front() {
                Some(chunk) => chunk,
                None => return Ok(()),
            };

            self.upload_chunk_with_retry(chunk).await?;
        }
    }

    /// 上传单个分片（带重试）
    ///
    /// 取消时直接放弃该分片，不算失败
    async fn upload_chunk_with_retry(&self, chunk: ChunkDescriptor) -> Result<(), UploadError> {
        debug!(
            "[上传线程{}] 分片 #{} 开始上传 (范围: {}..{}, 大小: {} bytes)",
            self.worker_id,
            chunk.index,
            chunk.byte_start(),
            chunk.byte_end(),
            chunk.size()
        );

        let data = self.payload.read_range(chunk.range.clone()).await?;
        let max_attempts = self.retry.attempts();
        let title = (chunk.index == 0).then_some(self.metadata.title.as_str());
        let artifact = self
            .metadata
            .thumbnail
            .as_ref()
            .filter(|_| chunk.index + 1 == self.total_chunks);

        let mut attempt = 0;
        loop {
            if self.halt.is_cancelled() {
                debug!(
                    "[上传线程{}] 分片 #{} 因停止信号放弃",
                    self.worker_id, chunk.index
                );
                return Ok(());
            }

            attempt += 1;
            let request = ChunkRequest {
                session_id: &self.session_id,
                file_name: self.payload.name(),
                chunk_index: chunk.index,
                total_chunks: self.total_chunks,
                data: &data,
                title,
                artifact,
            };

            match self.transport.deliver_chunk(request).await {
                Ok(()) => {
                    // 停止后才返回的结果不计入进度
                    if self.halt.is_cancelled() {
                        return Ok(());
                    }
                    if self
                        .reporter
                        .record_chunk(&self.session_id, chunk.index, chunk.size())
                    {
                        let snapshot = self.reporter.snapshot();
                        info!(
                            "[上传线程{}] 分片 #{} ✓ 上传成功 ({}/{} 完成, 速度: {} KB/s)",
                            self.worker_id,
                            chunk.index,
                            snapshot.current_chunk,
                            snapshot.total_chunks,
                            (snapshot.upload_speed / 1024.0) as u64
                        );
                    }
                    return Ok(());
                }
                Err(e) if attempt >= max_attempts => {
                    error!(
                        "[上传线程{}] 分片 #{} 上传失败，已达最大尝试次数 ({}): {}",
                        self.worker_id, chunk.index, max_attempts, e
                    );
                    return Err(UploadError::RetryExhausted {
                        index: chunk.index,
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        "[上传线程{}] 分片 #{} 上传失败，等待 {}ms 后重试 ({}/{}): {}",
                        self.worker_id,
                        chunk.index,
                        delay.as_millis(),
                        attempt,
                        max_attempts,
                        e
                    );

                    tokio::select! {
                        _ = self.halt.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}
