use chunkup_protocol::ByteRange;

/// Chunk arithmetic for one upload.
///
/// Chunk indices are zero-based; index `i` covers
/// `[i * chunk_size, min((i + 1) * chunk_size, file_size))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    file_size: u64,
    chunk_size: u64,
    total_chunks: u64,
}

impl ChunkPlan {
    /// Builds a plan. `chunk_size` must be non-zero.
    pub fn new(file_size: u64, chunk_size: u64) -> Self {
        assert!(chunk_size > 0, "chunk size must be non-zero");
        Self {
            file_size,
            chunk_size,
            total_chunks: file_size.div_ceil(chunk_size),
        }
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// `ceil(file_size / chunk_size)`.
    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    /// Byte range of chunk `index`, clamped to the file size.
    ///
    /// `index == total_chunks` yields the empty range at end-of-file.
    pub fn range(&self, index: u64) -> ByteRange {
        let start = index.saturating_mul(self.chunk_size).min(self.file_size);
        let end = start.saturating_add(self.chunk_size).min(self.file_size);
        ByteRange::new(start, end)
    }

    /// Number of chunks not yet acknowledged when `index` chunks are done.
    pub fn remaining_chunks(&self, index: u64) -> u64 {
        self.total_chunks.saturating_sub(index)
    }
}
