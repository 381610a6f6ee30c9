// 上传负载
//
// 负载在上传期间由调用方独占持有，上传核心只按字节范围读取，
// 不修改也不整体复制。各分片读取的范围互不相交，可以安全并发读取。

use async_trait::async_trait;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

/// 只读、可按字节范围寻址的负载
#[async_trait]
pub trait Payload: Send + Sync {
    /// 文件名（随分片一起发送给服务端）
    fn name(&self) -> &str;

    /// 总大小（字节）
    fn size(&self) -> u64;

    /// 读取指定字节范围
    async fn read_range(&self, range: Range<u64>) -> io::Result<Vec<u8>>;
}

/// 校验读取范围并转换为内存下标
///
/// 越界或超出本平台 usize 时返回 InvalidInput
fn checked_range(range: &Range<u64>, size: u64) -> io::Result<Range<usize>> {
    let invalid = |reason: &str| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "{}: {}..{}, 负载大小={}",
                reason, range.start, range.end, size
            ),
        )
    };

    if range.start > range.end || range.end > size {
        return Err(invalid("读取范围越界"));
    }
    let start = usize::try_from(range.start).map_err(|_| invalid("读取范围超出内存寻址"))?;
    let end = usize::try_from(range.end).map_err(|_| invalid("读取范围超出内存寻址"))?;
    Ok(start..end)
}

/// 本地文件负载
#[derive(Debug, Clone)]
pub struct FilePayload {
    path: PathBuf,
    name: String,
    size: u64,
}

impl FilePayload {
    /// 打开本地文件，读取大小
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("不是普通文件: {:?}", path),
            ));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            path,
            name,
            size: metadata.len(),
        })
    }

    /// 本地文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Payload for FilePayload {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn read_range(&self, range: Range<u64>) -> io::Result<Vec<u8>> {
        let span = checked_range(&range, self.size)?;

        let mut file = File::open(&self.path).await?;
        file.seek(io::SeekFrom::Start(range.start)).await?;

        let mut buffer = vec![0u8; span.len()];
        file.read_exact(&mut buffer).await?;

        debug!(
            "读取分片数据: {:?} bytes={}..{}, 大小={} bytes",
            self.path,
            range.start,
            range.end,
            buffer.len()
        );

        Ok(buffer)
    }
}

/// 内存负载
#[derive(Debug, Clone)]
pub struct MemoryPayload {
    name: String,
    data: Arc<[u8]>,
}

impl MemoryPayload {
    pub fn new(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

#[async_trait]
impl Payload for MemoryPayload {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_range(&self, range: Range<u64>) -> io::Result<Vec<u8>> {
        let span = checked_range(&range, self.size())?;
        Ok(self.data[span].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_file_payload_reads_ranges() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"0123456789").unwrap();
        temp_file.flush().unwrap();

        let payload = FilePayload::open(temp_file.path()).await.unwrap();
        assert_eq!(payload.path(), temp_file.path());
        assert_eq!(payload.size(), 10);
        assert!(!payload.name().is_empty());

        assert_eq!(payload.read_range(0..4).await.unwrap(), b"0123");
        assert_eq!(payload.read_range(8..10).await.unwrap(), b"89");
        assert!(payload.read_range(8..11).await.is_err());
    }

    #[tokio::test]
    async fn test_file_payload_rejects_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(FilePayload::open(dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_payload() {
        let payload = MemoryPayload::new("clip.mp4", b"abcdef".to_vec());
        assert_eq!(payload.name(), "clip.mp4");
        assert_eq!(payload.size(), 6);
        assert_eq!(payload.read_range(2..5).await.unwrap(), b"cde");
        assert_eq!(payload.read_range(6..6).await.unwrap(), b"");
    }

    #[tokio::test]
    async fn test_invalid_ranges_rejected() {
        let payload = MemoryPayload::new("clip.mp4", b"abcdef".to_vec());

        let reversed = Range { start: 4, end: 2 };
        for range in [reversed, 0..7, 5..u64::MAX, u64::MAX - 1..u64::MAX] {
            let err = payload.read_range(range.clone()).await.unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput, "{:?}", range);
        }
    }

    #[test]
    fn test_checked_range_converts_bounds() {
        assert_eq!(checked_range(&(2..5), 6).unwrap(), 2..5);
        assert_eq!(checked_range(&(0..0), 0).unwrap(), 0..0);
        assert!(checked_range(&(0..7), 6).is_err());
    }
}
