//! Overlapping tile grids.
//!
//! A topology cuts one level of an image into a grid of tiles of at most
//! `max_tile_width`×`max_tile_height` pixels, consecutive tiles sharing
//! `overlap` pixels. Along each axis:
//!
//! ```text
//! stride  = max_tile_size - overlap
//! count   = ceil(max(image_size - overlap, 1) / stride)
//! origin  = index * stride
//! size    = min(max_tile_size, image_size - origin)
//! ```
//!
//! Tiles are numbered from 1 in row-major order. Edge tiles are clipped to
//! the image, so the last column ends exactly on the right border and the
//! last row on the bottom border.

use std::fmt;
use std::sync::Arc;

use super::{Tile, TileBounds, TileBuilder};
use crate::error::TilingError;
use crate::slide::BaseImage;

/// Tile grid over one level of an image.
///
/// The image size and level are captured at construction; later changes to
/// the image's bound level do not affect an existing topology. All queries
/// take `&self` and the topology can be shared freely between tasks.
pub struct TileTopology {
    image: Arc<dyn BaseImage>,
    builder: Arc<dyn TileBuilder>,
    level: usize,
    image_width: u32,
    image_height: u32,
    max_tile_width: u32,
    max_tile_height: u32,
    overlap: u32,
    stride_x: u32,
    stride_y: u32,
    tile_columns: usize,
    tile_rows: usize,
}

impl TileTopology {
    /// Lay a grid over `image` at its currently bound level.
    ///
    /// Fails with [`TilingError::Config`] if a tile dimension is zero, if
    /// the overlap is not smaller than both tile dimensions, or if the image
    /// has no pixels.
    pub fn new(
        image: Arc<dyn BaseImage>,
        builder: Arc<dyn TileBuilder>,
        max_tile_width: u32,
        max_tile_height: u32,
        overlap: u32,
    ) -> Result<Self, TilingError> {
        if max_tile_width == 0 || max_tile_height == 0 {
            return Err(TilingError::config(format!(
                "tile dimensions must be positive, got {}x{}",
                max_tile_width, max_tile_height
            )));
        }
        if overlap >= max_tile_width || overlap >= max_tile_height {
            return Err(TilingError::config(format!(
                "overlap {} must be smaller than the tile dimensions {}x{}",
                overlap, max_tile_width, max_tile_height
            )));
        }

        let level = image.level();
        let (image_width, image_height) = image.level_dimensions(level).ok_or_else(|| {
            TilingError::config(format!(
                "image '{}' has no level {}",
                image.identifier(),
                level
            ))
        })?;
        if image_width == 0 || image_height == 0 {
            return Err(TilingError::config(format!(
                "image '{}' is empty at level {} ({}x{})",
                image.identifier(),
                level,
                image_width,
                image_height
            )));
        }

        let stride_x = max_tile_width - overlap;
        let stride_y = max_tile_height - overlap;

        Ok(Self {
            tile_columns: axis_count(image_width, overlap, stride_x),
            tile_rows: axis_count(image_height, overlap, stride_y),
            image,
            builder,
            level,
            image_width,
            image_height,
            max_tile_width,
            max_tile_height,
            overlap,
            stride_x,
            stride_y,
        })
    }

    pub fn image(&self) -> &Arc<dyn BaseImage> {
        &self.image
    }

    /// Level captured at construction.
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn image_width(&self) -> u32 {
        self.image_width
    }

    pub fn image_height(&self) -> u32 {
        self.image_height
    }

    pub fn max_tile_width(&self) -> u32 {
        self.max_tile_width
    }

    pub fn max_tile_height(&self) -> u32 {
        self.max_tile_height
    }

    pub fn overlap(&self) -> u32 {
        self.overlap
    }

    /// `(stride_x, stride_y)`: distance between origins of adjacent tiles.
    pub fn stride(&self) -> (u32, u32) {
        (self.stride_x, self.stride_y)
    }

    pub fn tile_columns(&self) -> usize {
        self.tile_columns
    }

    pub fn tile_rows(&self) -> usize {
        self.tile_rows
    }

    pub fn tile_count(&self) -> usize {
        self.tile_columns * self.tile_rows
    }

    /// `(row, col)` of tile `index`, both 0-based.
    pub fn tile_position(&self, index: usize) -> Result<(usize, usize), TilingError> {
        if index == 0 || index > self.tile_count() {
            return Err(TilingError::TileIndex {
                index,
                tile_count: self.tile_count(),
            });
        }
        let i = index - 1;
        Ok((i / self.tile_columns, i % self.tile_columns))
    }

    /// 1-based index of the tile at `(row, col)`.
    pub fn tile_index(&self, row: usize, col: usize) -> Result<usize, TilingError> {
        if row >= self.tile_rows || col >= self.tile_columns {
            return Err(TilingError::TileCoordinates {
                row,
                col,
                rows: self.tile_rows,
                columns: self.tile_columns,
            });
        }
        Ok(row * self.tile_columns + col + 1)
    }

    /// Rectangle of tile `index` without building the tile.
    pub fn tile_geometry(&self, index: usize) -> Result<TileBounds, TilingError> {
        let (row, col) = self.tile_position(index)?;
        let (x, width) = axis_span(col, self.stride_x, self.max_tile_width, self.image_width);
        let (y, height) = axis_span(row, self.stride_y, self.max_tile_height, self.image_height);
        Ok(TileBounds::new(x, y, width, height))
    }

    /// Build tile `index` (1-based, row-major).
    pub fn tile(&self, index: usize) -> Result<Tile, TilingError> {
        let bounds = self.tile_geometry(index)?;
        self.builder.build(
            self.image.clone(),
            self.level,
            (bounds.x, bounds.y),
            bounds.width,
            bounds.height,
            None,
        )
    }

    /// Build the tile at `(row, col)`.
    pub fn tile_at(&self, row: usize, col: usize) -> Result<Tile, TilingError> {
        self.tile(self.tile_index(row, col)?)
    }

    /// Indices of the up to eight tiles adjacent to `index`, ascending.
    pub fn neighbours(&self, index: usize) -> Result<Vec<usize>, TilingError> {
        let (row, col) = self.tile_position(index)?;
        let mut out = Vec::with_capacity(8);
        for r in row.saturating_sub(1)..=(row + 1).min(self.tile_rows - 1) {
            for c in col.saturating_sub(1)..=(col + 1).min(self.tile_columns - 1) {
                if (r, c) != (row, col) {
                    out.push(r * self.tile_columns + c + 1);
                }
            }
        }
        Ok(out)
    }

    /// Tiles `1..=tile_count` in order. Each call starts a fresh pass.
    pub fn iter(&self) -> TileIter<'_> {
        TileIter {
            topology: self,
            next: 1,
        }
    }
}

impl fmt::Debug for TileTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileTopology")
            .field("image", &self.image.identifier())
            .field("level", &self.level)
            .field("image_size", &(self.image_width, self.image_height))
            .field("max_tile_size", &(self.max_tile_width, self.max_tile_height))
            .field("overlap", &self.overlap)
            .field("grid", &(self.tile_rows, self.tile_columns))
            .finish()
    }
}

impl<'a> IntoIterator for &'a TileTopology {
    type Item = Result<Tile, TilingError>;
    type IntoIter = TileIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy pass over the tiles of a topology.
#[derive(Debug)]
pub struct TileIter<'a> {
    topology: &'a TileTopology,
    next: usize,
}

impl Iterator for TileIter<'_> {
    type Item = Result<Tile, TilingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.topology.tile_count() {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(self.topology.tile(index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.topology.tile_count() + 1).saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for TileIter<'_> {}

/// Tiles along one axis.
fn axis_count(image_size: u32, overlap: u32, stride: u32) -> usize {
    let span = image_size.saturating_sub(overlap).max(1);
    span.div_ceil(stride).max(1) as usize
}

/// Origin and size of the tile at `index` along one axis.
///
/// `index * stride` is always inside the image for a valid index, so the
/// origin never has to be pulled back and the clipped size is positive.
fn axis_span(index: usize, stride: u32, max_size: u32, image_size: u32) -> (u32, u32) {
    let origin = (index as u64 * stride as u64).min(image_size as u64 - 1) as u32;
    let size = max_size.min(image_size - origin);
    (origin, size)
}
