// 上传管理器
//
// 对外入口，持有唯一的当前会话：
// - start：规划分片、开始会话、驱动引擎直到终态
// - cancel：只在 uploading 阶段生效
// - reset：终态回到 idle
// - snapshot / subscribe / watch：供展示层读取进度
//
// 同一时间只允许一个活跃会话，开始新上传前必须 reset

use crate::config::AppConfig;
use crate::uploader::{
    plan_chunks, Artifact, DelayFinalizer, Finalizer, HttpTransport, Payload, ProgressReporter,
    SessionHandle, Transport, UploadEngine, UploadError, UploadEvent, UploadJob, UploadMetadata,
    UploadOptions, UploadSnapshot,
};
use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

struct ManagerInner {
    reporter: Arc<ProgressReporter>,
    engine: UploadEngine,
    options: UploadOptions,
    /// 当前会话句柄
    session: Mutex<Option<SessionHandle>>,
}

/// 上传管理器
#[derive(Clone)]
pub struct UploadManager {
    inner: Arc<ManagerInner>,
}

impl UploadManager {
    /// 创建管理器，处理阶段使用固定延迟
    pub fn new(transport: Arc<dyn Transport>, options: UploadOptions) -> Self {
        let finalizer = Arc::new(DelayFinalizer::new(options.processing_delay));
        Self::with_finalizer(transport, finalizer, options)
    }

    pub fn with_finalizer(
        transport: Arc<dyn Transport>,
        finalizer: Arc<dyn Finalizer>,
        options: UploadOptions,
    ) -> Self {
        let reporter = Arc::new(ProgressReporter::new());
        let engine = UploadEngine::new(transport, finalizer, reporter.clone(), &options);
        Self {
            inner: Arc::new(ManagerInner {
                reporter,
                engine,
                options,
                session: Mutex::new(None),
            }),
        }
    }

    /// 根据应用配置创建（HTTP 传输）
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(&config.endpoint)?);
        Ok(Self::new(transport, config.upload.to_options()))
    }

    /// 开始上传，等待会话进入终态
    ///
    /// 会话本身的结果（completed / failed / cancelled）通过返回的快照体现，
    /// 快照始终属于本次调用开始的会话；
    /// 只有前置条件不满足时返回错误：
    /// - 当前不是 idle（上一次会话尚未 reset）
    /// - 分片大小为 0
    pub async fn start(
        &self,
        payload: Arc<dyn Payload>,
        title: impl Into<String>,
        thumbnail: Option<Artifact>,
    ) -> Result<UploadSnapshot, UploadError> {
        let inner = &self.inner;
        let total_size = payload.size();
        let chunks = plan_chunks(total_size, inner.options.chunk_size)?;

        // 持有槽位锁开始会话，cancel 一定能看到新句柄
        let session = {
            let mut slot = inner.session.lock();
            let session_id = inner
                .reporter
                .begin(payload.name(), total_size, chunks.len())?;
            let session = SessionHandle::new(session_id);
            *slot = Some(session.clone());
            session
        };
        let session_id = session.session_id.clone();

        let job = UploadJob {
            session: session.clone(),
            payload,
            chunks,
            metadata: UploadMetadata {
                title: title.into(),
                thumbnail,
            },
        };

        match inner.engine.run(job).await {
            Ok(()) => info!("会话 {} 结束: completed", session_id),
            Err(e) if e.is_cancelled() => info!("会话 {} 结束: cancelled", session_id),
            Err(e) => warn!("会话 {} 结束: failed ({})", session_id, e),
        }

        Ok(session
            .terminal_snapshot()
            .or_else(|| inner.reporter.session_snapshot(&session_id))
            .unwrap_or_default())
    }

    /// 取消当前上传
    ///
    /// 只在 uploading 状态生效，processing 阶段的取消被忽略；
    /// 返回 true 表示本次调用完成了取消
    pub fn cancel(&self) -> bool {
        let slot = self.inner.session.lock();
        let cancelled = slot
            .as_ref()
            .map_or(false, |session| session.cancel(&self.inner.reporter));
        if !cancelled {
            info!(
                "当前状态 {} 不支持取消，忽略",
                self.inner.reporter.status()
            );
        }
        cancelled
    }

    /// 重置为 idle，丢弃上一次会话
    ///
    /// uploading / processing 状态下返回错误
    pub fn reset(&self) -> Result<(), UploadError> {
        let mut slot = self.inner.session.lock();
        self.inner.reporter.reset()?;
        *slot = None;
        Ok(())
    }

    /// 当前快照
    pub fn snapshot(&self) -> UploadSnapshot {
        self.inner.reporter.snapshot()
    }

    /// 订阅上传事件
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.inner.reporter.subscribe()
    }

    /// 订阅快照变化
    pub fn watch(&self) -> watch::Receiver<UploadSnapshot> {
        self.inner.reporter.watch()
    }
}
