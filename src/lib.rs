//! # WSI Tiler
//!
//! Overlapping tile grids over Whole Slide Images.
//!
//! This library cuts one resolution level of a multi-resolution image into
//! a grid of fixed-size tiles with a declared overlap, numbers them 1-based
//! in row-major order, and reads each tile's pixels on demand. Images are
//! accessed through handles that can be rebuilt from plain descriptors, so
//! tiles can be processed in parallel with one open source per worker.
//!
//! ## Features
//!
//! - **Tile topology**: Full coverage, edge tiles clipped to the image, stable numbering
//! - **Format support**: Native parsers for Aperio SVS and pyramidal TIFF, PNG/JPEG fallback
//! - **Range-based reads**: Only the stored tiles a region touches are fetched, through a block cache
//! - **Reacquirable handles**: Handles reopen their source by path after crossing a task boundary
//! - **Parallel workflows**: A driver runs a processor over every tile with bounded concurrency
//!
//! ## Architecture
//!
//! - [`io`] - Range readers and block caching
//! - [`mod@format`] - TIFF/SVS parsers and JPEG handling
//! - [`source`] - Image sources and openers
//! - [`slide`] - Image handles and the base image traits
//! - [`tile`] - Tiles, tile builders and tile topologies
//! - [`workflow`] - Parallel per-tile processing
//! - [`config`] - Tiling configuration and CLI types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wsi_tiler::{FileSourceOpener, ImageHandle, SlideTileBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), wsi_tiler::TilingError> {
//!     let opener = Arc::new(FileSourceOpener::new());
//!     let handle = Arc::new(ImageHandle::open("slide.svs", opener, None, 0).await?);
//!
//!     let topology = handle.tile_topology(Arc::new(SlideTileBuilder), 300, 300, 0)?;
//!     for tile in topology.iter() {
//!         let tile = tile?;
//!         let pixels = tile.materialize().await?;
//!         println!("{:?} -> {:?}", tile.bounds(), pixels.dimensions());
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod io;
pub mod slide;
pub mod source;
pub mod tile;
pub mod workflow;

// Re-export commonly used types
pub use config::{Cli, Command, TilingConfig};
pub use error::{IoError, SourceError, TiffError, TilingError};
pub use format::tiff::{
    parse_u64_array, ByteOrder, Compression, FieldType, Ifd, IfdEntry, PyramidLevel, TiffHeader,
    TiffPyramid, TiffTag, TileData, ValueReader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE,
};
pub use format::jpeg::{
    is_abbreviated_stream, is_complete_stream, merge_jpeg_tables, prepare_tile_jpeg,
};
pub use format::{is_tiff_header, FileKind, SlideFormat, SvsMetadata, TiledTiffReader};
pub use io::{BlockCache, FileRangeReader, MemoryRangeReader, RangeReader};
pub use slide::{BaseImage, HandleDescriptor, ImageHandle, WindowedImage, CHANNELS};
pub use source::{FileSourceOpener, ImageSource, MemoryOpener, MemorySource, SourceOpener, TiffSource};
pub use tile::{SlideTileBuilder, Tile, TileBounds, TileBuilder, TileIter, TileMask, TileTopology};
pub use workflow::{TileFailure, TileProcessor, WorkflowDriver, WorkflowReport};
