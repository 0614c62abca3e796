use std::fmt;
use std::sync::Arc;

use image::RgbImage;
use tracing::debug;

use super::{TileBounds, TileMask};
use crate::error::TilingError;
use crate::slide::BaseImage;

/// A lazily materialized rectangle of a base image.
///
/// A tile is pure geometry plus a shared reference to its image: building
/// one never touches pixels, and materializing it reads exactly its
/// rectangle every time (nothing is cached).
#[derive(Clone)]
pub struct Tile {
    image: Arc<dyn BaseImage>,
    level: usize,
    bounds: TileBounds,
    mask: Option<TileMask>,
}

impl Tile {
    /// Fails with [`TilingError::Config`] for a zero width or height.
    /// Bounds against the image are checked when materializing.
    pub fn new(
        image: Arc<dyn BaseImage>,
        level: usize,
        offset: (u32, u32),
        width: u32,
        height: u32,
        mask: Option<TileMask>,
    ) -> Result<Self, TilingError> {
        if width == 0 || height == 0 {
            return Err(TilingError::config(format!(
                "tile size must be positive, got {}x{}",
                width, height
            )));
        }

        Ok(Self {
            image,
            level,
            bounds: TileBounds::new(offset.0, offset.1, width, height),
            mask,
        })
    }

    /// `(x, y)` of the top-left pixel at the tile's level.
    pub fn offset(&self) -> (u32, u32) {
        (self.bounds.x, self.bounds.y)
    }

    pub fn width(&self) -> u32 {
        self.bounds.width
    }

    pub fn height(&self) -> u32 {
        self.bounds.height
    }

    /// Level the tile was built at.
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn channels(&self) -> u32 {
        self.image.channels()
    }

    pub fn bounds(&self) -> TileBounds {
        self.bounds
    }

    pub fn mask(&self) -> Option<&TileMask> {
        self.mask.as_ref()
    }

    pub fn base_image(&self) -> &Arc<dyn BaseImage> {
        &self.image
    }

    /// Read the tile's pixels from its base image.
    ///
    /// # Errors
    ///
    /// - [`TilingError::InvalidBaseImage`] if the image has no windowed reads
    /// - [`TilingError::UnsupportedLevel`] if the source declines reads at the tile's level
    /// - [`TilingError::OutOfBounds`] if the rectangle leaves the image
    /// - [`TilingError::Io`] for read or decode failures
    pub async fn materialize(&self) -> Result<RgbImage, TilingError> {
        let windowed = self
            .image
            .as_windowed()
            .ok_or_else(|| TilingError::InvalidBaseImage {
                image: self.image.identifier().to_string(),
            })?;

        if !windowed.supports_region_reads(self.level).await? {
            return Err(TilingError::UnsupportedLevel { level: self.level });
        }

        let (image_width, image_height) =
            self.image
                .level_dimensions(self.level)
                .ok_or(TilingError::UnsupportedLevel { level: self.level })?;

        let b = self.bounds;
        if b.right() > image_width as u64 || b.bottom() > image_height as u64 {
            return Err(TilingError::OutOfBounds {
                x: b.x,
                y: b.y,
                width: b.width,
                height: b.height,
                image_width,
                image_height,
            });
        }

        debug!(
            image = self.image.identifier(),
            level = self.level,
            x = b.x,
            y = b.y,
            width = b.width,
            height = b.height,
            "Materializing tile"
        );

        windowed
            .read_window(self.level, b.x, b.y, b.width, b.height)
            .await
    }
}

impl fmt::Debug for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tile")
            .field("image", &self.image.identifier())
            .field("level", &self.level)
            .field("bounds", &self.bounds)
            .field("mask", &self.mask)
            .finish()
    }
}

/// Constructs tiles for a topology.
///
/// Building is pure: no I/O and no bounds check against the image.
pub trait TileBuilder: Send + Sync {
    fn build(
        &self,
        image: Arc<dyn BaseImage>,
        level: usize,
        offset: (u32, u32),
        width: u32,
        height: u32,
        mask: Option<TileMask>,
    ) -> Result<Tile, TilingError>;
}

/// Builds plain [`Tile`]s over slide handles.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlideTileBuilder;

impl TileBuilder for SlideTileBuilder {
    fn build(
        &self,
        image: Arc<dyn BaseImage>,
        level: usize,
        offset: (u32, u32),
        width: u32,
        height: u32,
        mask: Option<TileMask>,
    ) -> Result<Tile, TilingError> {
        Tile::new(image, level, offset, width, height, mask)
    }
}
