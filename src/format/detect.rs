//! Format detection by magic bytes and vendor markers.
//!
//! - **Pyramidal TIFF / BigTIFF**: `II`/`MM` magic with version 42 or 43.
//!   An "Aperio" marker in the first ImageDescription makes it an SVS slide.
//! - **PNG / JPEG rasters**: single-level images decoded entirely in memory.

use super::tiff::{ByteOrder, TIFF_HEADER_SIZE};

/// Bytes needed to recognise any supported container.
pub const SNIFF_LEN: usize = 16;

const APERIO_MARKER: &str = "Aperio";
const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_MAGIC: [u8; 3] = [0xFF, 0xD8, 0xFF];

/// Container recognised from the first bytes of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Tiff,
    Png,
    Jpeg,
}

impl FileKind {
    /// Recognise a container from its leading bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if is_tiff_header(bytes) {
            Some(FileKind::Tiff)
        } else if bytes.starts_with(&PNG_MAGIC) {
            Some(FileKind::Png)
        } else if bytes.starts_with(&JPEG_MAGIC) {
            Some(FileKind::Jpeg)
        } else {
            None
        }
    }
}

/// Flavour of a pyramidal TIFF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlideFormat {
    /// Aperio SVS (abbreviated JPEG tiles, metadata in ImageDescription)
    AperioSvs,

    /// Any other tiled pyramidal TIFF
    GenericTiff,
}

impl SlideFormat {
    /// Classify a TIFF by the ImageDescription of its first IFD.
    pub fn from_description(description: Option<&str>) -> Self {
        match description {
            Some(text) if text.contains(APERIO_MARKER) => SlideFormat::AperioSvs,
            _ => SlideFormat::GenericTiff,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            SlideFormat::AperioSvs => "Aperio SVS",
            SlideFormat::GenericTiff => "Generic Pyramidal TIFF",
        }
    }
}

/// Whether `bytes` start with a classic TIFF or BigTIFF header.
pub fn is_tiff_header(bytes: &[u8]) -> bool {
    if bytes.len() < TIFF_HEADER_SIZE {
        return false;
    }

    let byte_order = match [bytes[0], bytes[1]] {
        [0x49, 0x49] => ByteOrder::LittleEndian,
        [0x4D, 0x4D] => ByteOrder::BigEndian,
        _ => return false,
    };

    matches!(byte_order.read_u16(&bytes[2..4]), 42 | 43)
}
