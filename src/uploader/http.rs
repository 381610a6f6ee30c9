// HTTP 分片传输
//
// 每个分片一次 multipart POST：
// - fileId       会话 ID
// - fileName     文件名
// - chunkIndex   分片索引
// - totalChunks  总分片数
// - chunk        分片数据
// - title        仅第一个分片
// - thumbnail    仅最后一个分片
// 非 2xx 响应视为本次投递失败，由调度器决定是否重试

use crate::config::EndpointConfig;
use crate::uploader::{ChunkRequest, Transport, TransportError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{multipart, Client};
use std::time::Duration;
use tracing::debug;

/// 基于 reqwest 的分片传输
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    upload_url: String,
}

impl HttpTransport {
    pub fn new(config: &EndpointConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            upload_url: config.upload_url(),
        })
    }

    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }

    /// 构建分片表单
    fn build_form(request: &ChunkRequest<'_>) -> Result<multipart::Form, TransportError> {
        let chunk = multipart::Part::bytes(request.data.to_vec())
            .file_name(request.file_name.to_string())
            .mime_str("application/octet-stream")
            .map_err(|e| TransportError::new(format!("构建分片表单失败: {}", e)))?;

        let mut form = multipart::Form::new()
            .text("fileId", request.session_id.to_string())
            .text("fileName", request.file_name.to_string())
            .text("chunkIndex", request.chunk_index.to_string())
            .text("totalChunks", request.total_chunks.to_string())
            .part("chunk", chunk);

        if let Some(artifact) = request.artifact {
            let thumbnail = multipart::Part::bytes(artifact.data.clone())
                .file_name(artifact.file_name.clone())
                .mime_str(&artifact.mime_type)
                .map_err(|e| TransportError::new(format!("附件类型无效: {}", e)))?;
            form = form.part("thumbnail", thumbnail);
        }

        if let Some(title) = request.title {
            form = form.text("title", title.to_string());
        }

        Ok(form)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver_chunk(&self, request: ChunkRequest<'_>) -> Result<(), TransportError> {
        let form = Self::build_form(&request)?;

        let response = self
            .client
            .post(&self.upload_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransportError::new(format!("上传分片请求发送失败: {}", e)))?;

        let status = response.status();
        debug!(
            "上传分片响应: session={}, chunk={}/{}, status={}",
            request.session_id, request.chunk_index, request.total_chunks, status
        );

        if !status.is_success() {
            return Err(TransportError::with_status(
                status.as_u16(),
                format!(
                    "Upload failed: {}",
                    status.canonical_reason().unwrap_or("Unknown Status")
                ),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::Artifact;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// 只处理一个请求的简易 HTTP 服务，返回收到的原始请求
    async fn serve_once(status_line: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
                if received.ends_with(b"--\r\n") || received.ends_with(b"0\r\n\r\n") {
                    break;
                }
            }
            let response = format!("{}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n", status_line);
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&received).into_owned()
        });

        (format!("http://{}", addr), handle)
    }

    fn transport(base_url: String) -> HttpTransport {
        HttpTransport::new(&EndpointConfig {
            base_url,
            upload_path: "/upload".to_string(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_first_chunk_carries_title() {
        let (base_url, server) = serve_once("HTTP/1.1 200 OK").await;
        let transport = transport(base_url);

        transport
            .deliver_chunk(ChunkRequest {
                session_id: "session-1",
                file_name: "clip.mp4",
                chunk_index: 0,
                total_chunks: 3,
                data: b"hello",
                title: Some("My Clip"),
                artifact: None,
            })
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /upload "));
        for field in ["fileId", "fileName", "chunkIndex", "totalChunks", "chunk", "title"] {
            assert!(
                request.contains(&format!("name=\"{}\"", field)),
                "缺少字段 {}",
                field
            );
        }
        assert!(request.contains("session-1"));
        assert!(request.contains("My Clip"));
        assert!(request.contains("hello"));
        assert!(!request.contains("name=\"thumbnail\""));
    }

    #[tokio::test]
    async fn test_last_chunk_carries_thumbnail() {
        let (base_url, server) = serve_once("HTTP/1.1 200 OK").await;
        let transport = transport(base_url);
        let thumbnail = Artifact::new("thumb.jpg", "image/jpeg", b"jpegdata".to_vec());

        transport
            .deliver_chunk(ChunkRequest {
                session_id: "session-1",
                file_name: "clip.mp4",
                chunk_index: 2,
                total_chunks: 3,
                data: b"tail",
                title: None,
                artifact: Some(&thumbnail),
            })
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.contains("name=\"thumbnail\""));
        assert!(request.contains("filename=\"thumb.jpg\""));
        assert!(request.contains("image/jpeg"));
        assert!(!request.contains("name=\"title\""));
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let (base_url, server) = serve_once("HTTP/1.1 503 Service Unavailable").await;
        let transport = transport(base_url);

        let err = transport
            .deliver_chunk(ChunkRequest {
                session_id: "session-1",
                file_name: "clip.mp4",
                chunk_index: 1,
                total_chunks: 3,
                data: b"middle",
                title: None,
                artifact: None,
            })
            .await
            .unwrap_err();

        server.await.unwrap();
        assert_eq!(err.status, Some(503));
        assert_eq!(err.to_string(), "Upload failed: Service Unavailable");
    }

    #[test]
    fn test_upload_url_joins_path() {
        let transport = transport("http://localhost:8080/".to_string());
        assert_eq!(transport.upload_url(), "http://localhost:8080/upload");
    }
}
