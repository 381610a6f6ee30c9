// 上传分片规划
//
// 分片规则：
// - 固定分片大小，最后一个分片可以更短
// - 分片连续、不重叠，恰好覆盖 [0, total_size)
// - 空文件不产生分片（没有需要传输的数据）

use crate::uploader::UploadError;
use std::ops::Range;

/// 默认上传分片大小: 5MB
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// 上传分片描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// 分片索引
    pub index: usize,
    /// 字节范围
    pub range: Range<u64>,
}

impl ChunkDescriptor {
    pub fn new(index: usize, range: Range<u64>) -> Self {
        Self { index, range }
    }

    /// 分片大小
    pub fn size(&self) -> u64 {
        self.range.end - self.range.start
    }

    /// 起始偏移
    pub fn byte_start(&self) -> u64 {
        self.range.start
    }

    /// 结束偏移（不含）
    pub fn byte_end(&self) -> u64 {
        self.range.end
    }
}

/// 计算分片数量
pub fn chunk_count(total_size: u64, chunk_size: u64) -> usize {
    if chunk_size == 0 {
        return 0;
    }
    total_size.div_ceil(chunk_size) as usize
}

/// 将负载切分为有序分片
///
/// # 参数
/// * `total_size` - 负载总大小
/// * `chunk_size` - 分片大小（必须大于 0）
///
/// # 返回
/// 按索引升序排列的分片列表；`total_size == 0` 时为空列表
pub fn plan_chunks(total_size: u64, chunk_size: u64) -> Result<Vec<ChunkDescriptor>, UploadError> {
    if chunk_size == 0 {
        return Err(UploadError::InvalidChunkSize);
    }

    let mut chunks = Vec::with_capacity(chunk_count(total_size, chunk_size));
    let mut offset = 0u64;
    let mut index = 0;

    while offset < total_size {
        let end = offset.saturating_add(chunk_size).min(total_size);
        chunks.push(ChunkDescriptor::new(index, offset..end));
        offset = end;
        index += 1;
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_twelve_mb_in_five_mb_chunks() {
        let chunks = plan_chunks(12 * MB, 5 * MB).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].range, 0..5 * MB);
        assert_eq!(chunks[1].range, 5 * MB..10 * MB);
        assert_eq!(chunks[2].range, 10 * MB..12 * MB);
        assert_eq!(chunks[2].size(), 2 * MB);
    }

    #[test]
    fn test_exact_multiple() {
        let chunks = plan_chunks(16 * MB, 4 * MB).unwrap();
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.size() == 4 * MB));
        assert_eq!(chunks[3].byte_end(), 16 * MB);
    }

    #[test]
    fn test_empty_payload() {
        let chunks = plan_chunks(0, DEFAULT_CHUNK_SIZE).unwrap();
        assert!(chunks.is_empty());
        assert_eq!(chunk_count(0, DEFAULT_CHUNK_SIZE), 0);
    }

    #[test]
    fn test_small_payload_single_chunk() {
        let chunks = plan_chunks(10, DEFAULT_CHUNK_SIZE).unwrap();
        assert_eq!(chunks, vec![ChunkDescriptor::new(0, 0..10)]);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(matches!(
            plan_chunks(100, 0),
            Err(UploadError::InvalidChunkSize)
        ));
    }

    proptest! {
        #[test]
        fn prop_chunks_cover_payload_exactly(
            total_size in 0u64..10_000_000,
            chunk_size in 1u64..3_000_000,
        ) {
            let chunks = plan_chunks(total_size, chunk_size).unwrap();

            prop_assert_eq!(chunks.len() as u64, total_size.div_ceil(chunk_size));

            let mut expected_start = 0u64;
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.index, i);
                prop_assert_eq!(chunk.byte_start(), expected_start);
                prop_assert!(chunk.size() > 0);
                prop_assert!(chunk.size() <= chunk_size);
                expected_start = chunk.byte_end();
            }
            prop_assert_eq!(expected_start, total_size);
        }

        #[test]
        fn prop_plan_is_deterministic(
            total_size in 0u64..1_000_000,
            chunk_size in 1u64..100_000,
        ) {
            let a = plan_chunks(total_size, chunk_size).unwrap();
            let b = plan_chunks(total_size, chunk_size).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}
