use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::TransferError;

// ---------------------------------------------------------------------------
// ChunkSource
// ---------------------------------------------------------------------------

/// Random-access reader for the bytes of an upload.
///
/// Closing the source is dropping it.
pub trait ChunkSource: Send {
    /// Total size of the source in bytes.
    fn size(&self) -> u64;

    /// Reads up to `len` bytes starting at `start`.
    ///
    /// Reads that cross end-of-file return only the available remainder.
    fn read(&mut self, start: u64, len: u64) -> Result<Vec<u8>, TransferError>;
}

/// Opens [`ChunkSource`]s for a path.
///
/// The engine opens the source once per upload and keeps it for the
/// upload's lifetime.
pub trait SourceOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn ChunkSource>, TransferError>;
}

// ---------------------------------------------------------------------------
// FileChunkSource
// ---------------------------------------------------------------------------

/// Reads byte ranges of a local file.
pub struct FileChunkSource {
    file: File,
    path: PathBuf,
    size: u64,
}

impl FileChunkSource {
    /// Opens `path` for random-access reading.
    pub fn open(path: &Path) -> Result<Self, TransferError> {
        let file = File::open(path)?;
        let meta = file.metadata()?;
        if !meta.is_file() {
            return Err(TransferError::NotAFile(path.display().to_string()));
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
            size: meta.len(),
        })
    }

    /// Path the source was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ChunkSource for FileChunkSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn read(&mut self, start: u64, len: u64) -> Result<Vec<u8>, TransferError> {
        if start > self.size {
            return Err(TransferError::OutOfRange {
                offset: start,
                size: self.size,
            });
        }

        let want = len.min(self.size - start);
        self.file.seek(SeekFrom::Start(start))?;

        let mut buf = Vec::with_capacity(want as usize);
        (&mut self.file).take(want).read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// Default [`SourceOpener`]: plain files on the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileOpener;

impl SourceOpener for FileOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn ChunkSource>, TransferError> {
        let source = FileChunkSource::open(path)?;
        tracing::debug!(path = %path.display(), size = source.size(), "opened chunk source");
        Ok(Box::new(source))
    }
}
