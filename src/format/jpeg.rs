//! JPEG tile streams.
//!
//! SVS files and many pyramidal TIFFs store "abbreviated" JPEG tiles: each
//! tile lacks its quantization (DQT) and Huffman (DHT) tables, which live
//! once in the `JPEGTables` tag. Before decoding, the tables are spliced in:
//! SOI + tables content + tile content + EOI.

use bytes::{Bytes, BytesMut};
use image::{ImageFormat, RgbImage};

use crate::error::SourceError;

pub const SOI: [u8; 2] = [0xFF, 0xD8];
pub const EOI: [u8; 2] = [0xFF, 0xD9];
pub const DHT: [u8; 2] = [0xFF, 0xC4];
pub const DQT: [u8; 2] = [0xFF, 0xDB];
pub const SOS: [u8; 2] = [0xFF, 0xDA];

/// Whether `data` reaches its scan (SOS) without defining any table.
pub fn is_abbreviated_stream(data: &[u8]) -> bool {
    if data.len() < 4 || data[0..2] != SOI {
        return false;
    }

    let mut pos = 2;
    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            pos += 1;
            continue;
        }

        let marker = [data[pos], data[pos + 1]];
        if marker == DQT || marker == DHT {
            return false;
        }
        if marker == SOS {
            return true;
        }

        // Skip the marker segment using its big-endian length
        let has_length = !matches!(marker[1], 0x00 | 0x01 | 0xD0..=0xD9 | 0xFF);
        if has_length && pos + 3 < data.len() {
            let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
            pos += 2 + length;
        } else {
            pos += 2;
        }
    }

    false
}

/// Whether `data` defines at least one quantization table.
pub fn is_complete_stream(data: &[u8]) -> bool {
    data.len() >= 4 && data[0..2] == SOI && data[2..].windows(2).any(|w| w == DQT)
}

/// Splice `tables` (SOI .. EOI) in front of an abbreviated `tile_data` stream.
pub fn merge_jpeg_tables(tables: &[u8], tile_data: &[u8]) -> Bytes {
    if tables.is_empty() {
        return Bytes::copy_from_slice(tile_data);
    }
    if tile_data.is_empty() {
        return Bytes::new();
    }

    let tables_end = if tables.ends_with(&EOI) {
        tables.len() - 2
    } else {
        tables.len()
    };
    let tile_start = if tile_data.starts_with(&SOI) { 2 } else { 0 };

    let mut merged = BytesMut::with_capacity(tables_end + tile_data.len() - tile_start);
    merged.extend_from_slice(&tables[..tables_end]);
    merged.extend_from_slice(&tile_data[tile_start..]);
    merged.freeze()
}

/// Produce a self-contained JPEG stream for a stored tile.
pub fn prepare_tile_jpeg(tables: Option<&[u8]>, tile_data: &[u8]) -> Bytes {
    match tables {
        Some(tables) if !is_complete_stream(tile_data) && is_abbreviated_stream(tile_data) => {
            merge_jpeg_tables(tables, tile_data)
        }
        _ => Bytes::copy_from_slice(tile_data),
    }
}

/// Decode a complete JPEG stream into 8-bit RGB.
pub fn decode_rgb(data: &[u8]) -> Result<RgbImage, SourceError> {
    image::load_from_memory_with_format(data, ImageFormat::Jpeg)
        .map(|decoded| decoded.to_rgb8())
        .map_err(|e| SourceError::Decode {
            message: e.to_string(),
        })
}
