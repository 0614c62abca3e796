//! Reader for tiled pyramidal TIFF files (generic or Aperio SVS).
//!
//! Supported files:
//! - tiled organization (strip-only IFDs are never pyramid levels)
//! - JPEG tiles, abbreviated or complete, or uncompressed 8-bit RGB tiles
//! - any number of levels, including a single one

use bytes::Bytes;
use image::RgbImage;
use tracing::debug;

use crate::error::{SourceError, TiffError};
use crate::io::RangeReader;

use super::detect::SlideFormat;
use super::jpeg::{decode_rgb, prepare_tile_jpeg};
use super::svs::SvsMetadata;
use super::tiff::{Compression, PyramidLevel, TiffHeader, TiffPyramid, TiffTag, TileData};

/// A pyramid level together with its tile locations.
#[derive(Debug, Clone)]
pub struct TiledLevel {
    pub level: PyramidLevel,
    pub tile_data: TileData,
}

impl TiledLevel {
    pub fn get_tile_location(&self, tile_x: u32, tile_y: u32) -> Option<(u64, u64)> {
        let tile_index = self.level.tile_index(tile_x, tile_y)?;
        self.tile_data.get_tile_location(tile_index)
    }

    pub fn jpeg_tables(&self) -> Option<&Bytes> {
        self.tile_data.jpeg_tables.as_ref()
    }

    fn compression(&self) -> Compression {
        // Checked at open
        Compression::from_u16(self.level.compression).unwrap_or(Compression::None)
    }
}

/// Parsed structure of a tiled pyramidal TIFF.
///
/// The reader holds no file handle; every read takes the range reader it
/// was opened from.
#[derive(Debug)]
pub struct TiledTiffReader {
    pyramid: TiffPyramid,
    levels: Vec<TiledLevel>,
    format: SlideFormat,
    metadata: Option<SvsMetadata>,
}

impl TiledTiffReader {
    /// Parse the pyramid, check every level can be decoded, and load tile
    /// offset arrays.
    pub async fn open<R: RangeReader + ?Sized>(reader: &R) -> Result<Self, TiffError> {
        let pyramid = TiffPyramid::parse(reader).await?;

        for level in &pyramid.levels {
            check_level_decodable(level, &pyramid.header)?;
        }

        let mut levels = Vec::with_capacity(pyramid.levels.len());
        for level in &pyramid.levels {
            let tile_data = TileData::load(reader, level, &pyramid.header).await?;
            levels.push(TiledLevel {
                level: level.clone(),
                tile_data,
            });
        }

        let format = SlideFormat::from_description(pyramid.description.as_deref());
        let metadata = match format {
            SlideFormat::AperioSvs => pyramid.description.as_deref().map(SvsMetadata::parse),
            SlideFormat::GenericTiff => None,
        };

        debug!(
            source = reader.identifier(),
            format = format.name(),
            levels = levels.len(),
            mpp = ?metadata.as_ref().and_then(|m| m.mpp),
            "Opened tiled TIFF"
        );

        Ok(TiledTiffReader {
            pyramid,
            levels,
            format,
            metadata,
        })
    }

    pub fn header(&self) -> &TiffHeader {
        &self.pyramid.header
    }

    pub fn format(&self) -> SlideFormat {
        self.format
    }

    /// SVS metadata, present for Aperio slides only.
    pub fn metadata(&self) -> Option<&SvsMetadata> {
        self.metadata.as_ref()
    }

    /// Microns per pixel at level 0, when the file declares it.
    pub fn mpp(&self) -> Option<f64> {
        self.metadata.as_ref().and_then(|m| m.mpp)
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn get_level(&self, level: usize) -> Option<&TiledLevel> {
        self.levels.get(level)
    }

    pub fn level_dimensions(&self, level: usize) -> Option<(u32, u32)> {
        self.levels
            .get(level)
            .map(|l| (l.level.width, l.level.height))
    }

    pub fn level_downsample(&self, level: usize) -> Option<f64> {
        self.levels.get(level).map(|l| l.level.downsample)
    }

    /// Stored tile size of a level.
    pub fn tile_size(&self, level: usize) -> Option<(u32, u32)> {
        self.levels
            .get(level)
            .map(|l| (l.level.tile_width, l.level.tile_height))
    }

    fn level_data(&self, level: usize) -> Result<&TiledLevel, SourceError> {
        self.levels.get(level).ok_or(SourceError::LevelOutOfRange {
            level,
            level_count: self.levels.len(),
        })
    }

    /// Raw stored bytes of a tile.
    pub async fn read_raw_tile<R: RangeReader + ?Sized>(
        &self,
        reader: &R,
        level: usize,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<Bytes, SourceError> {
        let level_data = self.level_data(level)?;
        let (offset, size) = level_data
            .get_tile_location(tile_x, tile_y)
            .ok_or_else(|| TiffError::InvalidTagValue {
                tag: TiffTag::TileOffsets.name(),
                message: format!(
                    "tile ({}, {}) outside the {}x{} grid of level {}",
                    tile_x, tile_y, level_data.level.tiles_x, level_data.level.tiles_y, level
                ),
            })?;

        let len = usize::try_from(size).map_err(|_| TiffError::InvalidTagValue {
            tag: TiffTag::TileByteCounts.name(),
            message: format!("tile byte count {} too large", size),
        })?;
        Ok(reader.read_exact_at(offset, len).await?)
    }

    /// Decode a stored tile to RGB at its full stored size.
    ///
    /// Edge tiles are padded in the file; callers crop to the level bounds.
    pub async fn read_tile<R: RangeReader + ?Sized>(
        &self,
        reader: &R,
        level: usize,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<RgbImage, SourceError> {
        let level_data = self.level_data(level)?;
        let raw = self.read_raw_tile(reader, level, tile_x, tile_y).await?;
        let (tile_width, tile_height) = (level_data.level.tile_width, level_data.level.tile_height);

        match level_data.compression() {
            Compression::Jpeg => {
                let tables = level_data.jpeg_tables().map(|t| t.as_ref());
                decode_rgb(&prepare_tile_jpeg(tables, &raw))
            }
            _ => {
                let expected = tile_width as usize * tile_height as usize * 3;
                if raw.len() < expected {
                    return Err(SourceError::Decode {
                        message: format!(
                            "uncompressed tile ({}, {}) has {} bytes, expected {}",
                            tile_x,
                            tile_y,
                            raw.len(),
                            expected
                        ),
                    });
                }
                RgbImage::from_raw(tile_width, tile_height, raw[..expected].to_vec()).ok_or_else(
                    || SourceError::Decode {
                        message: format!("invalid {}x{} RGB buffer", tile_width, tile_height),
                    },
                )
            }
        }
    }
}

fn check_level_decodable(level: &PyramidLevel, header: &TiffHeader) -> Result<(), TiffError> {
    let compression = Compression::from_u16(level.compression);
    match compression {
        Some(c) if c.is_supported() => {}
        Some(c) => return Err(TiffError::UnsupportedCompression(c.name().to_string())),
        None => {
            return Err(TiffError::UnsupportedCompression(format!(
                "unknown ({})",
                level.compression
            )))
        }
    }

    if compression == Some(Compression::None) {
        let byte_order = header.byte_order;
        let inline = |tag: TiffTag| {
            level
                .ifd
                .get_entry_by_tag(tag)
                .and_then(|e| e.inline_u64(byte_order))
        };

        let samples = inline(TiffTag::SamplesPerPixel).unwrap_or(1);
        if samples != 3 {
            return Err(TiffError::InvalidTagValue {
                tag: TiffTag::SamplesPerPixel.name(),
                message: format!("uncompressed tiles need 3 samples per pixel, got {}", samples),
            });
        }
        if inline(TiffTag::PlanarConfiguration).unwrap_or(1) != 1 {
            return Err(TiffError::InvalidTagValue {
                tag: TiffTag::PlanarConfiguration.name(),
                message: "planar uncompressed tiles are not supported".to_string(),
            });
        }
    }

    Ok(())
}
