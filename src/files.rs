//! File-like sources: a name, a byte length, and asynchronous range reads.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

/// Failure reading a file range. Aborts the current file and the remaining
/// send queue.
#[derive(Debug, thiserror::Error)]
pub enum FileReadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("read past end of source: offset {offset}, size {size}")]
    OutOfBounds { offset: u64, size: u64 },
}

/// A file-like object queued for sending.
#[async_trait]
pub trait FileSource: Send + Sync {
    fn name(&self) -> &str;
    fn len(&self) -> u64;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Read up to `len` bytes at `offset`. Returns exactly
    /// `min(len, remaining)` bytes on success.
    async fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>, FileReadError>;
}

/// In-memory source.
pub struct MemoryFile {
    name: String,
    data: Vec<u8>,
}

impl MemoryFile {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

#[async_trait]
impl FileSource for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>, FileReadError> {
        let size = self.data.len() as u64;
        if offset > size {
            return Err(FileReadError::OutOfBounds { offset, size });
        }
        let start = offset as usize;
        let end = (start + len).min(self.data.len());
        Ok(self.data[start..end].to_vec())
    }
}

/// Disk-backed source. Size is captured at open time; ranges are read with
/// tokio's async file I/O.
pub struct DiskFile {
    name: String,
    path: PathBuf,
    size: u64,
}

impl DiskFile {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, FileReadError> {
        let path = path.as_ref().to_path_buf();
        let meta = tokio::fs::metadata(&path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        Ok(Self {
            name,
            path,
            size: meta.len(),
        })
    }
}

#[async_trait]
impl FileSource for DiskFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.size
    }

    async fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>, FileReadError> {
        if offset > self.size {
            return Err(FileReadError::OutOfBounds {
                offset,
                size: self.size,
            });
        }
        let want = (len as u64).min(self.size - offset) as usize;
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; want];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }
}
