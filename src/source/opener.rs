use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{ImageSource, MemorySource, SourceOpener, TiffSource};
use crate::error::SourceError;
use crate::format::{FileKind, SNIFF_LEN};
use crate::io::{
    BlockCache, FileRangeReader, RangeReader, DEFAULT_BLOCK_CACHE_CAPACITY, DEFAULT_BLOCK_SIZE,
};

/// Opens image files from the local filesystem.
///
/// Tiled TIFF/SVS files are read lazily through a per-source block cache.
/// PNG and JPEG files are decoded whole into a single-level
/// [`MemorySource`].
#[derive(Debug, Clone)]
pub struct FileSourceOpener {
    block_size: usize,
    block_cache_capacity: usize,
}

impl Default for FileSourceOpener {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSourceOpener {
    pub fn new() -> Self {
        Self::with_block_cache(DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_CACHE_CAPACITY)
    }

    /// Use `capacity` cached blocks of `block_size` bytes per opened source.
    pub fn with_block_cache(block_size: usize, capacity: usize) -> Self {
        Self {
            block_size,
            block_cache_capacity: capacity,
        }
    }
}

#[async_trait]
impl SourceOpener for FileSourceOpener {
    async fn open(&self, path: &str) -> Result<Arc<dyn ImageSource>, SourceError> {
        let reader = FileRangeReader::open(path).await?;

        let sniff_len = SNIFF_LEN.min(reader.size() as usize);
        let magic = reader.read_exact_at(0, sniff_len).await?;
        let kind = FileKind::sniff(&magic).ok_or_else(|| SourceError::UnsupportedFormat {
            reason: format!("'{}' is neither a TIFF nor a PNG/JPEG image", path),
        })?;

        debug!(path, kind = ?kind, "Detected file kind");

        let source: Arc<dyn ImageSource> = match kind {
            FileKind::Tiff => {
                let cached =
                    BlockCache::with_capacity(reader, self.block_size, self.block_cache_capacity);
                Arc::new(TiffSource::open(cached).await?)
            }
            FileKind::Png | FileKind::Jpeg => {
                let len = usize::try_from(reader.size()).map_err(|_| {
                    SourceError::UnsupportedFormat {
                        reason: format!("'{}' is too large to decode in memory", path),
                    }
                })?;
                let data = reader.read_exact_at(0, len).await?;
                let image = image::load_from_memory(&data).map_err(|e| SourceError::Decode {
                    message: e.to_string(),
                })?;
                Arc::new(MemorySource::new(path, image.to_rgb8()))
            }
        };

        info!(
            path,
            levels = source.level_count(),
            dimensions = ?source.level_dimensions(0),
            "Opened image source"
        );
        Ok(source)
    }
}
