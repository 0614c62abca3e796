//! Configuration for tiling runs and the `wsi-tiler` binary.
//!
//! The library is configured programmatically through [`TilingConfig`],
//! which also deserializes from JSON with defaults for missing fields. The
//! binary parses a [`Cli`] from arguments and `WSI_TILER_*` environment
//! variables and turns it into a `TilingConfig` plus the
//! [`FileSourceOpener`] its block cache settings describe.
//!
//! # Environment Variables
//!
//! - `WSI_TILER_TILE_WIDTH` - Maximum tile width (default: 256)
//! - `WSI_TILER_TILE_HEIGHT` - Maximum tile height (default: 256)
//! - `WSI_TILER_OVERLAP` - Pixels shared by adjacent tiles (default: 0)
//! - `WSI_TILER_LEVEL` - Pyramid level to tile (default: 0)
//! - `WSI_TILER_WORKERS` - Concurrent tile workers (default: 4)
//! - `WSI_TILER_BLOCK_SIZE` - Block size in bytes for the block cache
//! - `WSI_TILER_CACHE_BLOCKS` - Max blocks cached per open slide

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::error::TilingError;
use crate::io::{DEFAULT_BLOCK_CACHE_CAPACITY, DEFAULT_BLOCK_SIZE};
use crate::source::FileSourceOpener;

// =============================================================================
// Default Values
// =============================================================================

/// Default maximum tile width.
pub const DEFAULT_TILE_WIDTH: u32 = 256;

/// Default maximum tile height.
pub const DEFAULT_TILE_HEIGHT: u32 = 256;

/// Default overlap between adjacent tiles.
pub const DEFAULT_OVERLAP: u32 = 0;

/// Default number of concurrent tile workers.
pub const DEFAULT_WORKERS: usize = 4;

const MIN_BLOCK_SIZE: usize = 1024;
const MAX_BLOCK_SIZE: usize = 16 * 1024 * 1024;

// =============================================================================
// Tiling Configuration
// =============================================================================

/// Parameters of a tiling run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilingConfig {
    pub tile_width: u32,
    pub tile_height: u32,
    pub overlap: u32,

    /// Level to tile. `None` keeps the level recorded in the handle.
    pub level: Option<usize>,

    /// Tiles processed concurrently, each worker with its own handle.
    pub workers: usize,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            tile_width: DEFAULT_TILE_WIDTH,
            tile_height: DEFAULT_TILE_HEIGHT,
            overlap: DEFAULT_OVERLAP,
            level: None,
            workers: DEFAULT_WORKERS,
        }
    }
}

impl TilingConfig {
    /// Check the parameters without touching any image.
    ///
    /// Level ranges depend on the image and are checked when the level is
    /// applied to a handle.
    pub fn validate(&self) -> Result<(), TilingError> {
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err(TilingError::config(format!(
                "tile dimensions must be positive, got {}x{}",
                self.tile_width, self.tile_height
            )));
        }
        if self.overlap >= self.tile_width || self.overlap >= self.tile_height {
            return Err(TilingError::config(format!(
                "overlap {} must be smaller than the tile dimensions {}x{}",
                self.overlap, self.tile_width, self.tile_height
            )));
        }
        if self.workers == 0 {
            return Err(TilingError::config("workers must be greater than 0"));
        }
        Ok(())
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// WSI Tiler - cut Whole Slide Images into overlapping tiles.
#[derive(Parser, Debug, Clone)]
#[command(name = "wsi-tiler")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print format, levels and resolution of an image.
    Info(InfoArgs),

    /// Print the tile grid of an image at one level.
    Tiles(TilesArgs),

    /// Write one tile to a PNG file.
    Extract(ExtractArgs),
}

#[derive(Args, Debug, Clone)]
pub struct InfoArgs {
    /// Path to a pyramidal TIFF, SVS, PNG or JPEG file.
    pub path: PathBuf,

    /// Print JSON instead of text.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

/// Grid parameters shared by `tiles` and `extract`.
#[derive(Args, Debug, Clone)]
pub struct GridArgs {
    /// Maximum tile width in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_WIDTH, env = "WSI_TILER_TILE_WIDTH")]
    pub tile_width: u32,

    /// Maximum tile height in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_HEIGHT, env = "WSI_TILER_TILE_HEIGHT")]
    pub tile_height: u32,

    /// Pixels shared by adjacent tiles.
    #[arg(long, default_value_t = DEFAULT_OVERLAP, env = "WSI_TILER_OVERLAP")]
    pub overlap: u32,

    /// Pyramid level (0 is full resolution).
    #[arg(long, default_value_t = 0, env = "WSI_TILER_LEVEL")]
    pub level: usize,

    /// Block size in bytes for the block cache.
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, env = "WSI_TILER_BLOCK_SIZE")]
    pub block_size: usize,

    /// Maximum number of blocks cached per open slide.
    #[arg(long, default_value_t = DEFAULT_BLOCK_CACHE_CAPACITY, env = "WSI_TILER_CACHE_BLOCKS")]
    pub cache_blocks: usize,
}

#[derive(Args, Debug, Clone)]
pub struct TilesArgs {
    pub path: PathBuf,

    #[command(flatten)]
    pub grid: GridArgs,

    /// Materialize every tile with this many workers and report failures.
    #[arg(long, env = "WSI_TILER_WORKERS")]
    pub read: Option<usize>,

    /// Print JSON instead of text.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ExtractArgs {
    pub path: PathBuf,

    #[command(flatten)]
    pub grid: GridArgs,

    /// 1-based tile index, row-major.
    #[arg(long)]
    pub index: usize,

    /// Output PNG file.
    #[arg(short, long)]
    pub output: PathBuf,
}

impl GridArgs {
    pub fn to_config(&self, workers: usize) -> TilingConfig {
        TilingConfig {
            tile_width: self.tile_width,
            tile_height: self.tile_height,
            overlap: self.overlap,
            level: Some(self.level),
            workers,
        }
    }

    /// File opener with the block cache these arguments describe.
    pub fn opener(&self) -> Result<FileSourceOpener, TilingError> {
        if self.cache_blocks == 0 {
            return Err(TilingError::config("cache_blocks must be greater than 0"));
        }
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.block_size) {
            return Err(TilingError::config(format!(
                "block_size {} must be between 1KB and 16MB",
                self.block_size
            )));
        }
        Ok(FileSourceOpener::with_block_cache(
            self.block_size,
            self.cache_blocks,
        ))
    }
}

// =============================================================================
// Tests
// =============================================================================
