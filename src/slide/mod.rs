//! Slide handles.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Tile / TileTopology             │
//! └────────────────────┬────────────────────┘
//!                      │ Arc<dyn BaseImage>
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │             ImageHandle                 │
//! │ (path + level, reopens its source)      │
//! └────────────────────┬────────────────────┘
//!                      │ SourceOpener
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │        Arc<dyn ImageSource>             │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Tiles only need to know the size of the image they belong to. Reading
//! pixels is a separate capability, [`WindowedImage`], which a base image
//! exposes through [`BaseImage::as_windowed`].

mod handle;

pub use handle::{HandleDescriptor, ImageHandle};

use async_trait::async_trait;
use image::RgbImage;

use crate::error::TilingError;

/// Number of channels of every materialized tile (RGB).
pub const CHANNELS: u32 = 3;

/// An image tiles can be laid out on.
pub trait BaseImage: Send + Sync {
    /// Identifier for logs and errors.
    fn identifier(&self) -> &str;

    /// Level the image is currently bound to.
    fn level(&self) -> usize;

    /// `(width, height)` of `level`, `None` if out of range.
    fn level_dimensions(&self, level: usize) -> Option<(u32, u32)>;

    /// Width at the bound level.
    fn width(&self) -> u32 {
        self.level_dimensions(self.level()).map_or(0, |(w, _)| w)
    }

    /// Height at the bound level.
    fn height(&self) -> u32 {
        self.level_dimensions(self.level()).map_or(0, |(_, h)| h)
    }

    fn channels(&self) -> u32 {
        CHANNELS
    }

    /// Pixel access, if this image supports it.
    fn as_windowed(&self) -> Option<&dyn WindowedImage> {
        None
    }
}

/// A base image able to read rectangular windows of pixels.
#[async_trait]
pub trait WindowedImage: BaseImage {
    /// Whether windows can be read at `level`.
    async fn supports_region_reads(&self, level: usize) -> Result<bool, TilingError>;

    /// Read exactly the `width`×`height` window at `(x, y)` of `level`.
    async fn read_window(
        &self,
        level: usize,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<RgbImage, TilingError>;
}
