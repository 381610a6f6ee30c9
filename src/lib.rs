// Chunked Uploader Library
// 分片上传客户端核心库

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 上传引擎模块
pub mod uploader;

// 导出常用类型
pub use config::{AppConfig, EndpointConfig, LogConfig, UploadConfig};
pub use logging::{init_logging, LogGuard};
pub use uploader::{
    Artifact, ChunkDescriptor, FilePayload, HttpTransport, MemoryPayload, Payload, UploadError,
    UploadEvent, UploadManager, UploadOptions, UploadSnapshot, UploadStatus,
};
