//! Image sources: the stateful backends that actually hold pixels.
//!
//! An [`ImageSource`] is an opened image with one or more resolution levels
//! that can read arbitrary rectangles. A [`SourceOpener`] turns a path into
//! a source; image handles keep the opener so they can reopen their source
//! by path after crossing a concurrency or process boundary.
//!
//! ```text
//! ┌───────────────────┐     open(path)     ┌────────────────────────────┐
//! │   SourceOpener    │ ─────────────────▶ │   Arc<dyn ImageSource>     │
//! └───────────────────┘                    └──────────────┬─────────────┘
//!   FileSourceOpener                                      │
//!   MemoryOpener                         ┌────────────────┴──────────┐
//!                                        ▼                           ▼
//!                              TiffSource<BlockCache<..>>      MemorySource
//! ```

mod memory;
mod opener;
mod tiff_source;

pub use memory::{MemoryOpener, MemorySource};
pub use opener::FileSourceOpener;
pub use tiff_source::TiffSource;

use std::sync::Arc;

use async_trait::async_trait;
use image::RgbImage;

use crate::error::SourceError;

/// An opened multi-resolution image.
///
/// Level 0 is the full resolution; higher levels are progressively smaller.
/// Implementations must be thread-safe: one source may serve concurrent reads.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Identifier for logs and errors (usually the path).
    fn identifier(&self) -> &str;

    /// Short name of the container format, for diagnostics.
    fn format_name(&self) -> &str {
        "raster"
    }

    fn level_count(&self) -> usize;

    /// `(width, height)` of a level, `None` if out of range.
    fn level_dimensions(&self, level: usize) -> Option<(u32, u32)>;

    /// Downsample factor of a level relative to level 0.
    fn level_downsample(&self, level: usize) -> Option<f64>;

    /// Whether rectangular reads are available at `level`.
    fn supports_region_reads(&self, level: usize) -> bool {
        level < self.level_count()
    }

    /// Physical pixel size at level 0, when the file declares one.
    fn microns_per_pixel(&self) -> Option<f64> {
        None
    }

    /// Read exactly the `width`×`height` rectangle at `(x, y)` of `level`,
    /// in that level's pixel coordinates.
    async fn read_region(
        &self,
        x: u32,
        y: u32,
        level: usize,
        width: u32,
        height: u32,
    ) -> Result<RgbImage, SourceError>;
}

/// Opens image sources by path.
#[async_trait]
pub trait SourceOpener: Send + Sync {
    async fn open(&self, path: &str) -> Result<Arc<dyn ImageSource>, SourceError>;
}

/// Dimensions of every level of a source, in level order.
pub fn level_dimensions(source: &dyn ImageSource) -> Vec<(u32, u32)> {
    (0..source.level_count())
        .filter_map(|level| source.level_dimensions(level))
        .collect()
}

/// Check that a rectangle lies inside `level` of `source`.
pub(crate) fn check_region(
    source: &dyn ImageSource,
    x: u32,
    y: u32,
    level: usize,
    width: u32,
    height: u32,
) -> Result<(), SourceError> {
    let (level_width, level_height) =
        source
            .level_dimensions(level)
            .ok_or(SourceError::LevelOutOfRange {
                level,
                level_count: source.level_count(),
            })?;

    let fits = width > 0
        && height > 0
        && x as u64 + width as u64 <= level_width as u64
        && y as u64 + height as u64 <= level_height as u64;
    if !fits {
        return Err(SourceError::RegionOutOfBounds {
            level,
            x,
            y,
            width,
            height,
            level_width,
            level_height,
        });
    }

    Ok(())
}
