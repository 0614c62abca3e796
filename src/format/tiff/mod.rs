//! TIFF and BigTIFF structure parsing.
//!
//! - **Byte order**: declared in the header (II or MM); every multi-byte value
//!   is read through [`ByteOrder`].
//! - **Classic TIFF vs BigTIFF**: 32-bit vs 64-bit offsets, handled by the
//!   same parser.
//! - **IFD**: one per stored image. Slide files chain several of them for
//!   pyramid levels and associated images.
//! - **Inline vs offset values**: small values live in the IFD entry itself,
//!   larger ones at an offset the entry points to.

mod parser;
mod pyramid;
mod tags;
mod values;

pub use parser::{ByteOrder, Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};
pub use pyramid::{PyramidLevel, TiffPyramid, TileData};
pub use tags::{Compression, FieldType, TiffTag};
pub use values::{parse_u64_array, ValueReader};
