use std::io::{ErrorKind, SeekFrom};
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;
use tracing::debug;

use super::RangeReader;
use crate::error::IoError;

/// Range reader over a local file.
///
/// The file handle is positioned before every read, so reads are serialized
/// through a mutex. Each reader owns its own handle; workers that need
/// independent reads open their own reader instead of sharing one.
#[derive(Debug)]
pub struct FileRangeReader {
    file: Mutex<File>,
    size: u64,
    identifier: String,
}

impl FileRangeReader {
    /// Open `path` for range reads.
    ///
    /// Fails with [`IoError::NotFound`] when the file does not exist and
    /// [`IoError::Read`] for any other open failure.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref();
        let identifier = path.display().to_string();

        let file = File::open(path)
            .await
            .map_err(|e| map_io_error(&identifier, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| map_io_error(&identifier, e))?
            .len();

        debug!(path = %identifier, size, "Opened slide file");

        Ok(Self {
            file: Mutex::new(file),
            size,
            identifier,
        })
    }
}

#[async_trait]
impl RangeReader for FileRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let in_bounds = offset
            .checked_add(len as u64)
            .map(|end| end <= self.size)
            .unwrap_or(false);
        if !in_bounds {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.size,
            });
        }

        if len == 0 {
            return Ok(Bytes::new());
        }

        let mut buf = vec![0u8; len];
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| map_io_error(&self.identifier, e))?;
        file.read_exact(&mut buf)
            .await
            .map_err(|e| map_io_error(&self.identifier, e))?;

        Ok(Bytes::from(buf))
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

fn map_io_error(path: &str, err: std::io::Error) -> IoError {
    match err.kind() {
        ErrorKind::NotFound => IoError::NotFound(path.to_string()),
        _ => IoError::Read {
            path: path.to_string(),
            message: err.to_string(),
        },
    }
}
