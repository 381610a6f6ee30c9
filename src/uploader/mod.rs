// 上传模块
//
// 分片上传核心：
// - 分片规划（固定大小、按索引覆盖整个负载）
// - 有界并发调度 + 分片级重试
// - 状态机（idle → uploading → processing → completed / failed / cancelled）
// - 速度 / 剩余时间估算，快照与事件发布
// - 协作式取消

pub mod chunk;
pub mod engine;
pub mod error;
pub mod events;
pub mod http;
pub mod manager;
pub mod payload;
pub mod progress;
pub mod retry;
pub mod task;
pub mod transport;

pub use chunk::{chunk_count, plan_chunks, ChunkDescriptor, DEFAULT_CHUNK_SIZE};
pub use engine::{
    SessionHandle, UploadEngine, UploadJob, UploadMetadata, UploadOptions, DEFAULT_MAX_CONCURRENT_CHUNKS,
    DEFAULT_PROCESSING_DELAY_MS,
};
pub use error::{TransportError, UploadError};
pub use events::UploadEvent;
pub use http::HttpTransport;
pub use manager::UploadManager;
pub use payload::{FilePayload, MemoryPayload, Payload};
pub use progress::{
    calculate_speed, estimate_remaining, format_duration, format_file_size, progress_percent,
    ProgressReporter,
};
pub use retry::{
    Backoff, RetryPolicy, DEFAULT_MAX_RETRIES, DEFAULT_MAX_RETRY_DELAY_MS,
    DEFAULT_RETRY_BASE_DELAY_MS,
};
pub use task::{UploadSession, UploadSnapshot, UploadStatus};
pub use transport::{Artifact, ChunkRequest, DelayFinalizer, Finalizer, Transport};
