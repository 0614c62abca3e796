//! Slide file formats.
//!
//! - **Aperio SVS**: identified by the "Aperio" marker in ImageDescription
//! - **Generic pyramidal TIFF**: any tiled TIFF/BigTIFF with JPEG or raw RGB tiles
//!
//! [`FileKind::sniff`] recognises the container from its first bytes;
//! [`TiledTiffReader`] handles both TIFF flavours.

pub mod detect;
pub mod jpeg;
pub mod svs;
pub mod tiff;
pub mod tiled;

pub use detect::{is_tiff_header, FileKind, SlideFormat, SNIFF_LEN};
pub use svs::SvsMetadata;
pub use tiled::{TiledLevel, TiledTiffReader};
