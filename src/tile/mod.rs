//! Tiles and tile grids.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              TileTopology               │
//! │  (grid over one level, 1-based index)   │
//! └────────────────────┬────────────────────┘
//!                      │ TileBuilder
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │                  Tile                   │
//! │  (geometry + Arc<dyn BaseImage>)        │
//! └────────────────────┬────────────────────┘
//!                      │ materialize()
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │             WindowedImage               │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileTopology`]: Lays an overlapping grid over an image and builds tiles on demand
//! - [`Tile`]: A rectangle of a base image, read lazily
//! - [`TileBuilder`]: Factory the topology uses to construct tiles
//! - [`TileBounds`]: Plain pixel rectangle
//! - [`TileMask`]: Optional polygon carried by a tile

mod bounds;
mod builder;
mod topology;

pub use bounds::{TileBounds, TileMask};
pub use builder::{SlideTileBuilder, Tile, TileBuilder};
pub use topology::{TileIter, TileTopology};
