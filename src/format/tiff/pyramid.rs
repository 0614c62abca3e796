//! Pyramid level identification.
//!
//! A slide file chains several IFDs: the full-resolution image, its
//! downsampled copies, and usually a few associated images (thumbnail,
//! label, macro). Levels are the tiled IFDs carrying tile data whose aspect
//! ratio matches the largest one; everything else is kept aside untouched.

use bytes::Bytes;
use tracing::debug;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{ByteOrder, Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE};
use super::tags::TiffTag;
use super::values::ValueReader;

/// Upper bound on followed IFD links, guards against cyclic chains
const MAX_IFDS: usize = 100;

/// Relative aspect ratio drift still accepted for a pyramid level
const ASPECT_TOLERANCE: f64 = 0.05;

/// Smallest downsample step between consecutive levels
const MIN_DOWNSAMPLE_STEP: f64 = 1.2;

// =============================================================================
// PyramidLevel
// =============================================================================

/// A single tiled resolution level.
#[derive(Debug, Clone)]
pub struct PyramidLevel {
    /// Position in the pyramid (0 = full resolution)
    pub level_index: usize,

    /// Position of the IFD in the file's chain
    pub ifd_index: usize,

    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,

    /// Stored tile columns
    pub tiles_x: u32,

    /// Stored tile rows
    pub tiles_y: u32,

    /// Mean of the horizontal and vertical downsample relative to level 0
    pub downsample: f64,

    /// Raw Compression tag value (1 when absent)
    pub compression: u16,

    pub ifd: Ifd,
    pub tile_offsets_entry: Option<IfdEntry>,
    pub tile_byte_counts_entry: Option<IfdEntry>,
    pub jpeg_tables_entry: Option<IfdEntry>,
}

impl PyramidLevel {
    /// Returns `None` unless the IFD is tiled with known dimensions.
    fn from_ifd(ifd: Ifd, ifd_index: usize, byte_order: ByteOrder) -> Option<Self> {
        let tile_width = ifd.tile_width(byte_order).filter(|&w| w > 0)?;
        let tile_height = ifd.tile_height(byte_order).filter(|&h| h > 0)?;
        let width = ifd.image_width(byte_order).filter(|&w| w > 0)?;
        let height = ifd.image_height(byte_order).filter(|&h| h > 0)?;
        let compression = ifd.compression(byte_order).unwrap_or(1);

        let tile_offsets_entry = ifd.get_entry_by_tag(TiffTag::TileOffsets).cloned();
        let tile_byte_counts_entry = ifd.get_entry_by_tag(TiffTag::TileByteCounts).cloned();
        let jpeg_tables_entry = ifd.get_entry_by_tag(TiffTag::JpegTables).cloned();

        Some(PyramidLevel {
            level_index: 0,
            ifd_index,
            width,
            height,
            tile_width,
            tile_height,
            tiles_x: width.div_ceil(tile_width),
            tiles_y: height.div_ceil(tile_height),
            downsample: 1.0,
            compression,
            ifd,
            tile_offsets_entry,
            tile_byte_counts_entry,
            jpeg_tables_entry,
        })
    }

    pub fn has_tile_data(&self) -> bool {
        self.tile_offsets_entry.is_some() && self.tile_byte_counts_entry.is_some()
    }

    /// Total number of stored tiles.
    pub fn tile_count(&self) -> u64 {
        self.tiles_x as u64 * self.tiles_y as u64
    }

    /// Linear index of a stored tile, `None` outside the tile grid.
    pub fn tile_index(&self, tile_x: u32, tile_y: u32) -> Option<usize> {
        if tile_x >= self.tiles_x || tile_y >= self.tiles_y {
            return None;
        }
        Some(tile_y as usize * self.tiles_x as usize + tile_x as usize)
    }

    fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

// =============================================================================
// TiffPyramid
// =============================================================================

/// Pyramid levels of a TIFF file, sorted from full resolution down.
#[derive(Debug, Clone)]
pub struct TiffPyramid {
    pub header: TiffHeader,

    pub levels: Vec<PyramidLevel>,

    /// ImageDescription of the first IFD, if any
    pub description: Option<String>,

    /// IFDs that are not pyramid levels (thumbnail, label, macro)
    pub other_ifds: Vec<(usize, Ifd)>,
}

impl TiffPyramid {
    /// Parse the header and IFD chain of `reader` and identify the levels.
    ///
    /// Fails with [`TiffError::NoPyramidLevels`] when no tiled level exists.
    pub async fn parse<R: RangeReader + ?Sized>(reader: &R) -> Result<Self, TiffError> {
        let header_len = BIGTIFF_HEADER_SIZE.min(reader.size() as usize);
        let header_bytes = reader.read_exact_at(0, header_len).await?;
        let header = TiffHeader::parse(&header_bytes, reader.size())?;

        let ifds = Self::parse_all_ifds(reader, &header).await?;

        let description = match ifds
            .first()
            .and_then(|ifd| ifd.get_entry_by_tag(TiffTag::ImageDescription))
        {
            Some(entry) => Some(ValueReader::new(reader, &header).read_string(entry).await?),
            None => None,
        };

        let pyramid = Self::build_pyramid(header, ifds, description)?;
        debug!(
            source = reader.identifier(),
            levels = pyramid.levels.len(),
            associated = pyramid.other_ifds.len(),
            bigtiff = pyramid.header.is_bigtiff,
            "Parsed TIFF pyramid"
        );
        Ok(pyramid)
    }

    async fn parse_all_ifds<R: RangeReader + ?Sized>(
        reader: &R,
        header: &TiffHeader,
    ) -> Result<Vec<Ifd>, TiffError> {
        let mut ifds = Vec::new();
        let mut offset = header.first_ifd_offset;

        while offset != 0 && ifds.len() < MAX_IFDS {
            if offset >= reader.size() {
                return Err(TiffError::InvalidIfdOffset(offset));
            }

            let count_bytes = reader
                .read_exact_at(offset, header.ifd_count_size())
                .await?;
            let entry_count = header.read_entry_count(&count_bytes);

            let ifd_size = Ifd::calculate_size(entry_count, header);
            let ifd_bytes = reader.read_exact_at(offset, ifd_size).await?;
            let ifd = Ifd::parse(&ifd_bytes, header)?;

            offset = ifd.next_ifd_offset;
            ifds.push(ifd);
        }

        Ok(ifds)
    }

    fn build_pyramid(
        header: TiffHeader,
        ifds: Vec<Ifd>,
        description: Option<String>,
    ) -> Result<Self, TiffError> {
        let byte_order = header.byte_order;
        let mut candidates = Vec::new();
        let mut other_ifds = Vec::new();

        for (ifd_index, ifd) in ifds.into_iter().enumerate() {
            match PyramidLevel::from_ifd(ifd.clone(), ifd_index, byte_order) {
                Some(level) if level.has_tile_data() => candidates.push(level),
                _ => other_ifds.push((ifd_index, ifd)),
            }
        }

        // Largest first; the stable sort keeps file order between equal areas
        candidates.sort_by_key(|l| std::cmp::Reverse(l.width as u64 * l.height as u64));

        let mut levels: Vec<PyramidLevel> = Vec::with_capacity(candidates.len());
        for mut level in candidates {
            let accepted = match (levels.first(), levels.last()) {
                (Some(base), Some(previous)) => {
                    let downsample = mean_downsample(base, &level);
                    let aspect_drift = (level.aspect_ratio() / base.aspect_ratio() - 1.0).abs();
                    level.downsample = downsample;
                    aspect_drift <= ASPECT_TOLERANCE
                        && downsample / previous.downsample >= MIN_DOWNSAMPLE_STEP
                }
                _ => true,
            };

            if accepted {
                level.level_index = levels.len();
                levels.push(level);
            } else {
                other_ifds.push((level.ifd_index, level.ifd));
            }
        }

        if levels.is_empty() {
            return Err(TiffError::NoPyramidLevels);
        }

        other_ifds.sort_by_key(|(index, _)| *index);

        Ok(TiffPyramid {
            header,
            levels,
            description,
            other_ifds,
        })
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn get_level(&self, level: usize) -> Option<&PyramidLevel> {
        self.levels.get(level)
    }

    /// Dimensions of level 0.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.levels.first().map(|l| (l.width, l.height))
    }
}

fn mean_downsample(base: &PyramidLevel, level: &PyramidLevel) -> f64 {
    let dx = base.width as f64 / level.width as f64;
    let dy = base.height as f64 / level.height as f64;
    (dx + dy) / 2.0
}

// =============================================================================
// TileData
// =============================================================================

/// Tile locations and shared JPEG tables of one level.
#[derive(Debug, Clone)]
pub struct TileData {
    pub offsets: Vec<u64>,
    pub byte_counts: Vec<u64>,
    pub jpeg_tables: Option<Bytes>,
}

impl TileData {
    /// Read the TileOffsets, TileByteCounts and JPEGTables of `level`.
    pub async fn load<R: RangeReader + ?Sized>(
        reader: &R,
        level: &PyramidLevel,
        header: &TiffHeader,
    ) -> Result<Self, TiffError> {
        let values = ValueReader::new(reader, header);

        let offsets_entry = level
            .tile_offsets_entry
            .as_ref()
            .ok_or(TiffError::MissingTag("TileOffsets"))?;
        let counts_entry = level
            .tile_byte_counts_entry
            .as_ref()
            .ok_or(TiffError::MissingTag("TileByteCounts"))?;

        let offsets = values.read_u64_array(offsets_entry).await?;
        let byte_counts = values.read_u64_array(counts_entry).await?;

        let expected = level.tile_count();
        if (offsets.len() as u64) < expected || (byte_counts.len() as u64) < expected {
            return Err(TiffError::InvalidTagValue {
                tag: TiffTag::TileOffsets.name(),
                message: format!(
                    "level {} needs {} tiles, found {} offsets and {} byte counts",
                    level.level_index,
                    expected,
                    offsets.len(),
                    byte_counts.len()
                ),
            });
        }

        let jpeg_tables = match level.jpeg_tables_entry {
            Some(ref entry) => Some(values.read_bytes(entry).await?),
            None => None,
        };

        Ok(TileData {
            offsets,
            byte_counts,
            jpeg_tables,
        })
    }

    /// Offset and byte count of a stored tile.
    pub fn get_tile_location(&self, tile_index: usize) -> Option<(u64, u64)> {
        Some((
            *self.offsets.get(tile_index)?,
            *self.byte_counts.get(tile_index)?,
        ))
    }
}

// =============================================================================
// Tests
// =============================================================================
