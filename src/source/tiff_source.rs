use async_trait::async_trait;
use image::{imageops, RgbImage};
use tracing::debug;

use super::{check_region, ImageSource};
use crate::error::SourceError;
use crate::format::TiledTiffReader;
use crate::io::RangeReader;

/// Image source over a tiled pyramidal TIFF (generic or SVS).
///
/// A region read decodes every stored tile the rectangle touches and
/// stitches the overlapping parts together. Pair it with a
/// [`BlockCache`](crate::io::BlockCache) so scattered tile reads are
/// coalesced.
#[derive(Debug)]
pub struct TiffSource<R> {
    reader: R,
    tiff: TiledTiffReader,
}

impl<R: RangeReader> TiffSource<R> {
    /// Parse the file structure behind `reader`.
    pub async fn open(reader: R) -> Result<Self, SourceError> {
        let tiff = TiledTiffReader::open(&reader).await?;
        Ok(Self { reader, tiff })
    }

    pub fn tiff(&self) -> &TiledTiffReader {
        &self.tiff
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }
}

#[async_trait]
impl<R: RangeReader + 'static> ImageSource for TiffSource<R> {
    fn identifier(&self) -> &str {
        self.reader.identifier()
    }

    fn format_name(&self) -> &str {
        self.tiff.format().name()
    }

    fn level_count(&self) -> usize {
        self.tiff.level_count()
    }

    fn level_dimensions(&self, level: usize) -> Option<(u32, u32)> {
        self.tiff.level_dimensions(level)
    }

    fn level_downsample(&self, level: usize) -> Option<f64> {
        self.tiff.level_downsample(level)
    }

    fn microns_per_pixel(&self) -> Option<f64> {
        self.tiff.mpp()
    }

    async fn read_region(
        &self,
        x: u32,
        y: u32,
        level: usize,
        width: u32,
        height: u32,
    ) -> Result<RgbImage, SourceError> {
        check_region(self, x, y, level, width, height)?;
        let (tile_width, tile_height) =
            self.tiff
                .tile_size(level)
                .ok_or(SourceError::LevelOutOfRange {
                    level,
                    level_count: self.tiff.level_count(),
                })?;

        // Region is non-empty and in bounds, so these stay inside the grid
        let first_col = x / tile_width;
        let last_col = (x + width - 1) / tile_width;
        let first_row = y / tile_height;
        let last_row = (y + height - 1) / tile_height;

        debug!(
            source = self.identifier(),
            level,
            x,
            y,
            width,
            height,
            stored_tiles = (last_col - first_col + 1) * (last_row - first_row + 1),
            "Reading region"
        );

        let mut region = RgbImage::new(width, height);
        for tile_y in first_row..=last_row {
            for tile_x in first_col..=last_col {
                let tile = self.tiff.read_tile(&self.reader, level, tile_x, tile_y).await?;

                let tile_left = tile_x * tile_width;
                let tile_top = tile_y * tile_height;

                // Intersection of the region and this stored tile, in level coordinates
                let left = x.max(tile_left);
                let top = y.max(tile_top);
                let right = (x + width).min(tile_left + tile_width);
                let bottom = (y + height).min(tile_top + tile_height);

                let (src_x, src_y) = (left - tile_left, top - tile_top);
                let (copy_w, copy_h) = (right - left, bottom - top);
                if src_x + copy_w > tile.width() || src_y + copy_h > tile.height() {
                    return Err(SourceError::Decode {
                        message: format!(
                            "tile ({}, {}) of level {} decoded to {}x{}, expected {}x{}",
                            tile_x,
                            tile_y,
                            level,
                            tile.width(),
                            tile.height(),
                            tile_width,
                            tile_height
                        ),
                    });
                }

                let part = imageops::crop_imm(&tile, src_x, src_y, copy_w, copy_h).to_image();
                imageops::replace(
                    &mut region,
                    &part,
                    (left - x) as i64,
                    (top - y) as i64,
                );
            }
        }

        Ok(region)
    }
}
