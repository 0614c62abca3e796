//! Parallel per-tile processing.
//!
//! A [`WorkflowDriver`] takes a [`HandleDescriptor`](crate::slide::HandleDescriptor)
//! rather than a live handle. Each worker rebuilds its own detached
//! [`ImageHandle`](crate::slide::ImageHandle) from the descriptor, so open
//! sources are never shared between workers; a worker's handle reopens its
//! source on the first tile it materializes.
//!
//! ```text
//! descriptor ──▶ worker slot 1: ImageHandle + TileTopology ─┐
//!            ──▶ worker slot 2: ImageHandle + TileTopology ─┼─▶ TileProcessor ─▶ WorkflowReport
//!            ──▶ worker slot N: ImageHandle + TileTopology ─┘
//! ```

mod driver;

pub use driver::{TileFailure, TileProcessor, WorkflowDriver, WorkflowReport};
